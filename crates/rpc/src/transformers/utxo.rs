// rpc/src/transformers/utxo.rs

//! `qtum_getUTXOs`: unspent outputs of an address, classified by script.

use async_trait::async_trait;
use bridge_backend::types::AddressUtxo;
use bridge_backend::Backend;
use bridge_codec::{HexAddress, NativeAmount, ScriptType};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use super::Transformer;
use crate::{RequestContext, RpcError, RpcResult, Utxo};

const SATOSHI_PER_COIN: u64 = 100_000_000;

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![Arc::new(GetUtxos { backend: backend.clone() })]
}

/// Positional params: address, then an optional minimum sum (in coins), then
/// script type names. The minimum may be left out, in which case type names
/// start at the second position and every output is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct UtxoRequest {
    pub address: String,
    /// Zero means "no minimum"
    pub min_sum: Decimal,
    /// Empty means every type
    pub types: HashSet<ScriptType>,
}

impl UtxoRequest {
    pub fn parse(params: &[Value]) -> RpcResult<Self> {
        let strings = params
            .iter()
            .map(|p| {
                p.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RpcError::InvalidParams("couldn't unmarshal request parameters".into()))
            })
            .collect::<RpcResult<Vec<_>>>()?;

        let address = strings
            .first()
            .cloned()
            .ok_or_else(|| RpcError::InvalidParams("couldn't unmarshal request parameters".into()))?;

        let mut min_sum = Decimal::ZERO;
        let mut types_start = 2;
        let mut all = strings.len() < 2;
        if let Some(second) = strings.get(1) {
            match Decimal::from_str(second) {
                Ok(sum) => min_sum = sum,
                Err(_) if ScriptType::from_str(second).is_ok() => types_start = 1,
                Err(_) => {
                    return Err(RpcError::InvalidParams(
                        "couldn't unmarshal request parameters".into(),
                    ))
                }
            }
        }

        let mut types = HashSet::new();
        for name in strings.iter().skip(types_start) {
            // unknown names are ignored
            if let Ok(kind) = ScriptType::from_str(name) {
                if kind == ScriptType::All {
                    all = true;
                }
                types.insert(kind);
            }
        }
        if strings.len() > 3 && types.is_empty() {
            return Err(RpcError::InvalidParams("unknown script type requested".into()));
        }
        if all {
            types.clear();
        }

        Ok(Self {
            address,
            min_sum,
            types,
        })
    }

    fn wants(&self, kind: ScriptType) -> bool {
        self.types.is_empty() || self.types.contains(&kind)
    }

    fn min_satoshis(&self) -> Decimal {
        self.min_sum * Decimal::from(SATOSHI_PER_COIN)
    }
}

pub struct GetUtxos {
    backend: Backend,
}

impl GetUtxos {
    fn to_utxo(utxo: &AddressUtxo, kind: ScriptType) -> RpcResult<Utxo> {
        let amount = NativeAmount::from_satoshis(utxo.satoshis).to_coins()?;
        Ok(Utxo {
            address: utxo.address.clone(),
            txid: utxo.txid.clone(),
            vout: utxo.output_index,
            amount: amount.to_string(),
            safe: true,
            spendable: true,
            confirmations: 0,
            height: utxo.height,
            script_type: kind.to_string(),
            script_pub_key: utxo.script.clone(),
            redeem_script: None,
        })
    }
}

#[async_trait]
impl Transformer for GetUtxos {
    fn method_name(&self) -> &'static str {
        "qtum_getUTXOs"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let req = UtxoRequest::parse(&params)?;
        let address = HexAddress::from_hex(&req.address)
            .map_err(|_| RpcError::InvalidParams("couldn't validate parameters value".into()))?;
        let base58 = self
            .backend
            .to_base58(&address, &ctx.cancel)
            .await
            .map_err(|_| {
                RpcError::InvalidParams("couldn't convert Ethereum address to Qtum address".into())
            })?;

        let unspent = self
            .backend
            .get_address_utxos(&base58)
            .await
            .map_err(|e| RpcError::Callback(e.to_string()))?;
        let block_count = self
            .backend
            .get_block_count()
            .await
            .map_err(|e| RpcError::Callback(e.to_string()))?;
        let block_count = i64::try_from(block_count)
            .map_err(|_| RpcError::Internal(format!("block height {} out of range", block_count)))?;
        let mature_after = i64::try_from(self.backend.mature_block_height()).unwrap_or(i64::MAX);

        let minimum = req.min_satoshis();
        let querying_all = minimum.is_zero();
        let mut sum = Decimal::ZERO;
        let mut selected = Vec::new();

        for entry in &unspent {
            let kind = ScriptType::classify_hex(&entry.script, None);
            if !req.wants(kind) {
                continue;
            }
            let mut utxo = Self::to_utxo(entry, kind)?;

            if entry.is_stake && block_count <= entry.height.saturating_add(mature_after) {
                utxo.safe = false;
                if !req.wants(ScriptType::Immature) {
                    continue;
                }
            }

            utxo.confirmations = block_count - entry.height;
            if utxo.confirmations < 0 {
                return Err(RpcError::Internal(format!(
                    "computed negative confirmations: {} - {}",
                    block_count, entry.height
                )));
            }

            if utxo.safe {
                sum += Decimal::from(entry.satoshis);
            }
            selected.push(utxo);
            if !querying_all && sum >= minimum {
                return serde_json::to_value(selected).map_err(|e| RpcError::Internal(e.to_string()));
            }
        }

        if !querying_all {
            return Err(RpcError::Callback(
                "required minimum amount is greater than total amount of UTXOs".into(),
            ));
        }
        serde_json::to_value(selected).map_err(|e| RpcError::Internal(e.to_string()))
    }
}
