// rpc/src/health.rs

//! Liveness/readiness checks against the backend node.

use bridge_backend::{BackendError, Backend, Cancellation};
use bridge_codec::Chain;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const CHAIN_WAIT: Duration = Duration::from_secs(10);
const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
/// Height drop beyond which the loss is considered serious
const LOST_BLOCKS_THRESHOLD: u64 = 10;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthError {
    #[error("backend has no connections")]
    NoConnections,
    #[error("Cannot detect chain backend is connected to")]
    ChainNotDetected,
    #[error("-logevents might not be enabled: {0}")]
    LogEventsDisabled(String),
    #[error("Block syncing seems stalled")]
    SyncStalled,
    #[error("Lost a few blocks, expected block height to be higher")]
    LostFewBlocks,
    #[error("Lost a lot of blocks, expected block height to be higher")]
    LostManyBlocks,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Outcome of comparing two block heights taken some time apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSync {
    Healthy,
    Stalled,
    LostFew,
    LostMany,
}

impl BlockSync {
    pub fn classify(last: u64, current: u64) -> Self {
        if current == last {
            BlockSync::Stalled
        } else if current > last {
            BlockSync::Healthy
        } else if last - current > LOST_BLOCKS_THRESHOLD {
            BlockSync::LostMany
        } else {
            BlockSync::LostFew
        }
    }

    /// Delay before the height is fetched again
    pub fn recheck_after(&self) -> Duration {
        match self {
            BlockSync::Healthy => Duration::from_secs(5 * 60),
            BlockSync::Stalled => Duration::from_secs(15),
            BlockSync::LostFew => Duration::from_secs(10),
            BlockSync::LostMany => Duration::from_secs(60),
        }
    }

    fn into_result(self) -> Result<(), HealthError> {
        match self {
            BlockSync::Healthy => Ok(()),
            BlockSync::Stalled => Err(HealthError::SyncStalled),
            BlockSync::LostFew => Err(HealthError::LostFewBlocks),
            BlockSync::LostMany => Err(HealthError::LostManyBlocks),
        }
    }
}

#[derive(Debug, Default)]
struct SyncTracker {
    last_block: u64,
    next_check: Option<Instant>,
    status: Option<BlockSync>,
}

/// Failing checks by name; empty when healthy
#[derive(Debug, Default)]
pub struct HealthReport {
    pub failures: Vec<(&'static str, String)>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .failures
            .iter()
            .map(|(name, message)| (name.to_string(), Value::String(message.clone())))
            .collect();
        Value::Object(map)
    }
}

pub struct HealthChecker {
    backend: Backend,
    sync: Mutex<SyncTracker>,
}

impl HealthChecker {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            sync: Mutex::new(SyncTracker::default()),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        let results = [
            ("backend-connection", self.check_connection().await),
            ("backend-logevents-enabled", self.check_log_events().await),
            ("backend-blocks-syncing", self.check_block_sync().await),
        ];
        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(check = name, error = %e, "Health check failed");
                report.failures.push((name, e.to_string()));
            }
        }
        report
    }

    pub async fn check_connection(&self) -> Result<(), HealthError> {
        let info = self.backend.get_network_info().await?;
        let chain = tokio::time::timeout(CHAIN_WAIT, self.backend.chain(&Cancellation::never()))
            .await
            .map_err(|_| HealthError::ChainNotDetected)?
            .map_err(|_| HealthError::ChainNotDetected)?;
        if chain == Chain::RegTest {
            return Ok(());
        }
        if info.connections == 0 {
            return Err(HealthError::NoConnections);
        }
        Ok(())
    }

    pub async fn check_log_events(&self) -> Result<(), HealthError> {
        match self.backend.get_transaction_receipt(ZERO_HASH).await {
            Err(BackendError::Internal(msg)) => Err(HealthError::LogEventsDisabled(msg)),
            _ => Ok(()),
        }
    }

    /// Compares the backend height with the one seen at the previous check.
    /// Between checks the cached verdict is returned.
    pub async fn check_block_sync(&self) -> Result<(), HealthError> {
        let mut tracker = self.sync.lock().await;
        if let (Some(next), Some(status)) = (tracker.next_check, tracker.status) {
            if Instant::now() < next {
                return status.into_result();
            }
        }

        let current = self.backend.get_blockchain_info().await?.blocks;
        let status = BlockSync::classify(tracker.last_block, current);
        match status {
            BlockSync::Healthy => tracker.last_block = current,
            BlockSync::LostMany => tracker.last_block = 0,
            BlockSync::Stalled | BlockSync::LostFew => {}
        }
        tracing::debug!(last = tracker.last_block, current, ?status, "Checked block sync");
        tracker.status = Some(status);
        tracker.next_check = Some(Instant::now() + status.recheck_after());
        status.into_result()
    }
}
