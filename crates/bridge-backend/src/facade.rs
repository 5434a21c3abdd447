// bridge-backend/src/facade.rs

use bridge_codec::{encode_address, Chain, HexAddress};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::chain::{ChainDetector, Network};
use crate::types::*;
use crate::{BackendClient, BackendError, BackendResult, Cancellation};

/// Blocks a stake output needs before it can be spent
pub const DEFAULT_MATURE_BLOCK_HEIGHT: u64 = 2000;

#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Overrides `DEFAULT_MATURE_BLOCK_HEIGHT`
    pub mature_block_height: Option<u64>,
    /// Where regtest auto-mining sends rewards; a fresh wallet address otherwise
    pub generate_to_address: Option<String>,
    /// Skip transactions that cannot be resolved when building full blocks
    pub ignore_unknown_transactions: bool,
}

/// Typed access to the backend node.
///
/// Cloning is cheap; clones share the transport and the chain detector.
#[derive(Clone)]
pub struct Backend {
    client: Arc<dyn BackendClient>,
    chain: Arc<ChainDetector>,
    options: BackendOptions,
}

impl Backend {
    pub fn new(client: Arc<dyn BackendClient>, network: Network, options: BackendOptions) -> Self {
        Self {
            client,
            chain: Arc::new(ChainDetector::new(network)),
            options,
        }
    }

    /// Start chain detection if the network was left on `auto`
    pub fn start(&self) -> Option<JoinHandle<()>> {
        self.chain.spawn_probe(self.client.clone())
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    pub fn detector(&self) -> &Arc<ChainDetector> {
        &self.chain
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Chain the backend runs on, waiting for detection if needed
    pub async fn chain(&self, cancel: &Cancellation) -> BackendResult<Chain> {
        self.chain.wait(cancel).await
    }

    pub fn mature_block_height(&self) -> u64 {
        self.options
            .mature_block_height
            .unwrap_or(DEFAULT_MATURE_BLOCK_HEIGHT)
    }

    pub fn ignore_unknown_transactions(&self) -> bool {
        self.options.ignore_unknown_transactions
    }

    /// Block generation is only available on regtest
    pub async fn can_generate(&self, cancel: &Cancellation) -> bool {
        matches!(self.chain(cancel).await, Ok(Chain::RegTest))
    }

    /// Mine one block on regtest; failures are logged, not returned
    pub async fn generate_if_possible(&self, cancel: &Cancellation) {
        if !self.can_generate(cancel).await {
            return;
        }
        let address = match &self.options.generate_to_address {
            Some(address) => address.clone(),
            None => match self.get_new_address().await {
                Ok(address) => address,
                Err(e) => {
                    tracing::error!(error = %e, "Couldn't get address to generate to");
                    return;
                }
            },
        };
        if let Err(e) = self.generate_to_address(1, &address).await {
            tracing::error!(error = %e, "Error generating new block");
        }
    }

    /// Base58 form of a raw address on the detected chain
    pub async fn to_base58(&self, address: &HexAddress, cancel: &Cancellation) -> BackendResult<String> {
        let chain = self.chain(cancel).await?;
        Ok(encode_address(address, chain))
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> BackendResult<T> {
        decode(self.client.call(method, params).await?)
    }

    // ==================== CHAIN ====================

    pub async fn get_blockchain_info(&self) -> BackendResult<BlockchainInfo> {
        self.request("getblockchaininfo", json!([])).await
    }

    pub async fn get_block_count(&self) -> BackendResult<u64> {
        self.request("getblockcount", json!([])).await
    }

    pub async fn get_block_hash(&self, height: u64) -> BackendResult<String> {
        self.request("getblockhash", json!([height])).await
    }

    pub async fn get_block(&self, hash: &str) -> BackendResult<BlockResponse> {
        self.request("getblock", json!([hash])).await
    }

    pub async fn get_mining_info(&self) -> BackendResult<MiningInfo> {
        self.request("getmininginfo", json!([])).await
    }

    pub async fn get_staking_info(&self) -> BackendResult<StakingInfo> {
        self.request("getstakinginfo", json!([])).await
    }

    // ==================== TRANSACTIONS ====================

    /// Wallet view of a transaction; fails with `InvalidAddress` for foreign ones
    pub async fn get_transaction(&self, txid: &str) -> BackendResult<TransactionResponse> {
        self.request("gettransaction", json!([txid])).await
    }

    pub async fn get_raw_transaction(&self, txid: &str) -> BackendResult<RawTransactionResponse> {
        self.request("getrawtransaction", json!([txid, true])).await
    }

    pub async fn decode_raw_transaction(&self, hex: &str) -> BackendResult<DecodedRawTransaction> {
        self.request("decoderawtransaction", json!([hex])).await
    }

    /// `None` when the output is spent or unknown
    pub async fn get_transaction_out(
        &self,
        txid: &str,
        n: u32,
        include_mempool: bool,
    ) -> BackendResult<Option<Value>> {
        let value = self
            .client
            .call("gettxout", json!([txid, n, include_mempool]))
            .await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    pub async fn get_transaction_receipt(&self, txid: &str) -> BackendResult<Vec<TransactionReceipt>> {
        self.request("gettransactionreceipt", json!([txid])).await
    }

    pub async fn send_raw_transaction(&self, hex: &str) -> BackendResult<String> {
        self.request("sendrawtransaction", json!([hex])).await
    }

    // ==================== CONTRACTS ====================

    pub async fn search_logs(&self, req: &SearchLogsRequest) -> BackendResult<Vec<TransactionReceipt>> {
        let params = serde_json::to_value(req).map_err(|e| BackendError::Decode(e.to_string()))?;
        self.request("searchlogs", params).await
    }

    pub async fn call_contract(&self, req: &CallContractRequest) -> BackendResult<CallContractResponse> {
        self.request("callcontract", req.to_params()).await
    }

    pub async fn get_account_info(&self, hex_address: &str) -> BackendResult<AccountInfo> {
        self.request("getaccountinfo", json!([hex_address])).await
    }

    pub async fn get_storage(&self, hex_address: &str, block: Option<u64>) -> BackendResult<StorageResponse> {
        let params = match block {
            Some(block) => json!([hex_address, block]),
            None => json!([hex_address]),
        };
        self.request("getstorage", params).await
    }

    pub async fn send_to_contract(&self, req: &SendToContractRequest) -> BackendResult<SendToContractResponse> {
        self.request("sendtocontract", req.to_params()).await
    }

    pub async fn create_contract(&self, req: &CreateContractRequest) -> BackendResult<CreateContractResponse> {
        self.request("createcontract", req.to_params()).await
    }

    // ==================== WALLET / ADDRESSES ====================

    pub async fn send_to_address(&self, req: &SendToAddressRequest) -> BackendResult<String> {
        self.request("sendtoaddress", req.to_params()).await
    }

    pub async fn get_address_utxos(&self, base58: &str) -> BackendResult<Vec<AddressUtxo>> {
        self.request("getaddressutxos", json!([{ "addresses": [base58] }])).await
    }

    pub async fn get_address_balance(&self, base58: &str) -> BackendResult<AddressBalance> {
        self.request("getaddressbalance", json!([{ "addresses": [base58] }])).await
    }

    pub async fn get_new_address(&self) -> BackendResult<String> {
        self.request("getnewaddress", json!([])).await
    }

    /// Hex address (no prefix) to the wallet's base58 form
    pub async fn from_hex_address(&self, hex_address: &str) -> BackendResult<String> {
        self.request("fromhexaddress", json!([hex_address])).await
    }

    /// Base58 address to hex (no prefix)
    pub async fn get_hex_address(&self, base58: &str) -> BackendResult<String> {
        self.request("gethexaddress", json!([base58])).await
    }

    pub async fn generate_to_address(&self, blocks: u64, address: &str) -> BackendResult<Vec<String>> {
        self.request("generatetoaddress", json!([blocks, address])).await
    }

    // ==================== NETWORK ====================

    pub async fn get_peer_info(&self) -> BackendResult<Vec<Value>> {
        self.request("getpeerinfo", json!([])).await
    }

    pub async fn get_network_info(&self) -> BackendResult<NetworkInfo> {
        self.request("getnetworkinfo", json!([])).await
    }

    /// Pass-through for methods without a typed wrapper
    pub async fn raw(&self, method: &str, params: Value) -> BackendResult<Value> {
        self.client.call(method, params).await
    }
}
