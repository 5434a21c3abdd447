// bridge-backend/src/chain.rs

//! Chain identity detection.
//!
//! The detector is a three-state machine `Unknown -> Probing -> Known`. A
//! single probe task owns the transition to `Known`; readers subscribe to a
//! watch channel and wake once it resolves or their request is cancelled.

use bridge_codec::Chain;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::BlockchainInfo;
use crate::{BackendClient, BackendError, BackendResult, Cancellation};

/// Backoff step between probe attempts
pub const PROBE_BACKOFF_STEP: Duration = Duration::from_millis(250);
/// Attempt count at which backoff stops growing
pub const PROBE_BACKOFF_CAP: u32 = 10;

/// Configured network; `Auto` asks the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Auto,
    Main,
    Test,
    RegTest,
}

impl Network {
    pub fn chain(&self) -> Option<Chain> {
        match self {
            Network::Auto => None,
            Network::Main => Some(Chain::Main),
            Network::Test => Some(Chain::Test),
            Network::RegTest => Some(Chain::RegTest),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Network::Auto),
            "main" => Ok(Network::Main),
            "test" => Ok(Network::Test),
            "regtest" => Ok(Network::RegTest),
            other => Err(format!("invalid network '{}': expected auto, main, test or regtest", other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Auto => f.write_str("auto"),
            Network::Main => f.write_str("main"),
            Network::Test => f.write_str("test"),
            Network::RegTest => f.write_str("regtest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Unknown,
    Probing,
    Known(Chain),
}

pub struct ChainDetector {
    state: watch::Sender<ChainState>,
}

impl ChainDetector {
    pub fn new(network: Network) -> Self {
        let initial = match network.chain() {
            Some(chain) => ChainState::Known(chain),
            None => ChainState::Unknown,
        };
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn state(&self) -> ChainState {
        *self.state.borrow()
    }

    pub fn known(&self) -> Option<Chain> {
        match self.state() {
            ChainState::Known(chain) => Some(chain),
            _ => None,
        }
    }

    /// Start the probe task if the chain is still unknown.
    ///
    /// Returns `None` when the chain was configured or a probe is running.
    pub fn spawn_probe(self: &Arc<Self>, client: Arc<dyn BackendClient>) -> Option<JoinHandle<()>> {
        let started = self.state.send_if_modified(|state| {
            if *state == ChainState::Unknown {
                *state = ChainState::Probing;
                true
            } else {
                false
            }
        });
        if !started {
            return None;
        }
        let detector = self.clone();
        Some(tokio::spawn(async move { detector.probe(client).await }))
    }

    /// Retries without limit; an unreachable backend keeps readers waiting
    /// until their own cancellation fires.
    async fn probe(&self, client: Arc<dyn BackendClient>) {
        let mut attempt: u32 = 0;
        loop {
            match fetch_chain_tag(client.as_ref()).await {
                Ok(tag) => match tag.parse::<Chain>() {
                    Ok(chain) => {
                        self.state.send_replace(ChainState::Known(chain));
                        tracing::info!(%chain, "Detected chain type");
                        return;
                    }
                    Err(_) => {
                        tracing::error!(chain = %tag, "Unknown chain type in getblockchaininfo");
                    }
                },
                Err(e) => {
                    tracing::debug!(error = %e, "getblockchaininfo failed");
                }
            }

            let backoff = PROBE_BACKOFF_STEP * attempt.min(PROBE_BACKOFF_CAP);
            tracing::debug!(?backoff, "Failed to detect chain type, backing off");
            tokio::time::sleep(backoff).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Wait for the chain to be known, or for `cancel` to fire
    pub async fn wait(&self, cancel: &Cancellation) -> BackendResult<Chain> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ChainState::Known(chain) => return Ok(chain),
                ChainState::Unknown => return Err(BackendError::ChainNotDetected),
                ChainState::Probing => {}
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(BackendError::ChainNotDetected);
                    }
                }
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            }
        }
    }
}

async fn fetch_chain_tag(client: &dyn BackendClient) -> BackendResult<String> {
    let value = client.call("getblockchaininfo", serde_json::json!([])).await?;
    if value.is_null() {
        return Err(BackendError::EmptyResponse);
    }
    let info: BlockchainInfo =
        serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(info.chain.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancelHandle, MockBackend};
    use serde_json::json;

    #[tokio::test]
    async fn test_configured_chain_is_known() {
        let detector = Arc::new(ChainDetector::new(Network::RegTest));
        let mock = Arc::new(MockBackend::new());
        assert!(detector.spawn_probe(mock.clone()).is_none());
        assert_eq!(detector.wait(&Cancellation::never()).await.unwrap(), Chain::RegTest);
        assert_eq!(mock.calls("getblockchaininfo"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_until_recognised() {
        let mock = Arc::new(MockBackend::new());
        mock.push_error("getblockchaininfo", BackendError::Unreachable("down".into()));
        mock.push("getblockchaininfo", json!({"chain": "moon", "blocks": 1, "headers": 1}));
        mock.push("getblockchaininfo", json!({"chain": "RegTest", "blocks": 1, "headers": 1}));

        let detector = Arc::new(ChainDetector::new(Network::Auto));
        let probe = detector.spawn_probe(mock.clone()).unwrap();
        assert_eq!(detector.state(), ChainState::Probing);
        // second spawn is a no-op
        assert!(detector.spawn_probe(mock.clone()).is_none());

        let chain = detector.wait(&Cancellation::never()).await.unwrap();
        assert_eq!(chain, Chain::RegTest);
        probe.await.unwrap();
        assert_eq!(mock.calls("getblockchaininfo"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_respects_cancellation() {
        let mock = Arc::new(MockBackend::new());
        mock.push_error("getblockchaininfo", BackendError::Unreachable("down".into()));

        let detector = Arc::new(ChainDetector::new(Network::Auto));
        let _probe = detector.spawn_probe(mock.clone()).unwrap();

        let handle = CancelHandle::new();
        let token = handle.token();
        let waiter = {
            let detector = detector.clone();
            tokio::spawn(async move { detector.wait(&token).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
        assert_eq!(waiter.await.unwrap(), Err(BackendError::Cancelled));
        assert_eq!(detector.state(), ChainState::Probing);
    }

    #[test]
    fn test_parse_network() {
        assert_eq!("auto".parse::<Network>().unwrap(), Network::Auto);
        assert_eq!("REGTEST".parse::<Network>().unwrap(), Network::RegTest);
        assert!("moon".parse::<Network>().is_err());
    }
}
