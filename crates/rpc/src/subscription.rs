// rpc/src/subscription.rs

//! Push subscriptions over persistent connections.
//!
//! A `Session` belongs to one WebSocket connection and owns the outbound
//! message queue of that connection. Subscriptions are registered in the
//! shared `SubscriptionRegistry`; the `SubscriptionAgent` polls the backend
//! for new blocks and pushes notifications into the owning session's queue.
//! Dropping a session removes every subscription it created.

use bridge_backend::Backend;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::params::LogQuery;
use crate::transformers::block::new_head;
use crate::transformers::logs::search;
use crate::{BackendContext, RpcError, RpcNotification, RpcResult};

/// Default delay between two backend height polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    NewHeads,
    Logs(LogQuery),
}

struct Subscription {
    kind: SubscriptionKind,
    sink: mpsc::UnboundedSender<String>,
}

impl Subscription {
    /// False once the connection is gone
    fn notify(&self, id: &str, result: Value) -> bool {
        let message = match serde_json::to_string(&RpcNotification::new(id, result)) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(subscription = %id, error = %e, "Couldn't encode notification");
                return true;
            }
        };
        self.sink.send(message).is_ok()
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, kind: SubscriptionKind, sink: mpsc::UnboundedSender<String>) -> String {
        let id = format!("0x{}", hex::encode(rand::random::<[u8; 16]>()));
        let subscription = Arc::new(Subscription { kind, sink });
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), subscription);
        id
    }

    fn remove(&self, id: &str) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    fn snapshot(&self) -> Vec<(String, Arc<Subscription>)> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscription state of one persistent connection
pub struct Session {
    registry: Arc<SubscriptionRegistry>,
    sink: mpsc::UnboundedSender<String>,
    owned: Mutex<HashSet<String>>,
}

impl Session {
    pub fn new(registry: Arc<SubscriptionRegistry>, sink: mpsc::UnboundedSender<String>) -> Self {
        Self {
            registry,
            sink,
            owned: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self, kind: SubscriptionKind) -> String {
        let id = self.registry.insert(kind, self.sink.clone());
        self.owned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone());
        tracing::debug!(subscription = %id, "Subscription added");
        id
    }

    /// False when the id is unknown to this session, including when it was
    /// already removed
    pub fn unsubscribe(&self, id: &str) -> bool {
        let owned = self
            .owned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        owned && self.registry.remove(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.owned.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let owned = std::mem::take(&mut *self.owned.lock().unwrap_or_else(|e| e.into_inner()));
        for id in owned {
            self.registry.remove(&id);
        }
    }
}

/// Heights already delivered by the agent
#[derive(Debug, Default)]
pub struct PollCursor {
    height: Option<u64>,
    /// Log subscriptions whose last search failed, with the last height
    /// they were searched up to
    lagging: HashMap<String, u64>,
}

impl PollCursor {
    pub fn height(&self) -> Option<u64> {
        self.height
    }
}

/// Background poller feeding the registry
pub struct SubscriptionAgent {
    backend: Backend,
    registry: Arc<SubscriptionRegistry>,
    interval: Duration,
}

impl SubscriptionAgent {
    pub fn new(backend: Backend, registry: Arc<SubscriptionRegistry>, interval: Duration) -> Self {
        Self {
            backend,
            registry,
            interval,
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cursor = PollCursor::default();
        tracing::info!(interval = ?self.interval, "Subscription agent started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll(&mut cursor).await {
                        tracing::warn!(error = %e, "Subscription poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Subscription agent stopped");
    }

    async fn head(&self, height: u64) -> RpcResult<Value> {
        let hash = self
            .backend
            .get_block_hash(height)
            .await
            .with_context(|| format!("getblockhash {}", height))?;
        let block = self
            .backend
            .get_block(&hash)
            .await
            .with_context(|| format!("getblock {}", hash))?;
        serde_json::to_value(new_head(&block)).map_err(|e| RpcError::Internal(e.to_string()))
    }

    /// One poll step.
    ///
    /// With no subscribers nothing is fetched and the cursor is reset, so a
    /// later subscriber only sees blocks mined after it subscribed. A head
    /// that cannot be fetched stops the cursor before it; a failed log search
    /// only holds back its own subscription, which is retried next step.
    pub async fn poll(&self, cursor: &mut PollCursor) -> RpcResult<()> {
        let subscriptions = self.registry.snapshot();
        if subscriptions.is_empty() {
            *cursor = PollCursor::default();
            return Ok(());
        }

        let current = self
            .backend
            .get_block_count()
            .await
            .context("getblockcount")?;
        let last = match cursor.height {
            None => {
                cursor.height = Some(current);
                return Ok(());
            }
            Some(last) => last,
        };
        cursor
            .lagging
            .retain(|id, _| subscriptions.iter().any(|(live, _)| live == id));
        if current <= last && cursor.lagging.is_empty() {
            return Ok(());
        }

        let mut closed = Vec::new();
        let mut failure = None;
        let wants_heads = subscriptions
            .iter()
            .any(|(_, s)| s.kind == SubscriptionKind::NewHeads);
        let mut notified = if wants_heads { last } else { current.max(last) };
        if wants_heads {
            for height in last + 1..=current {
                let head = match self.head(height).await {
                    Ok(head) => head,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                for (id, sub) in &subscriptions {
                    if sub.kind == SubscriptionKind::NewHeads && !sub.notify(id, head.clone()) {
                        closed.push(id.clone());
                    }
                }
                notified = height;
            }
        }

        for (id, sub) in &subscriptions {
            let query = match &sub.kind {
                SubscriptionKind::Logs(query) => query,
                SubscriptionKind::NewHeads => continue,
            };
            let from = cursor.lagging.get(id).copied().unwrap_or(last) + 1;
            if from > notified {
                continue;
            }
            let logs = match search(&self.backend, query, from, notified).await {
                Ok(logs) => logs,
                Err(e) => {
                    tracing::warn!(subscription = %id, error = %e, "Log search failed, will retry");
                    cursor.lagging.insert(id.clone(), from - 1);
                    continue;
                }
            };
            cursor.lagging.remove(id);
            for log in logs {
                let value = match serde_json::to_value(log) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::error!(subscription = %id, error = %e, "Couldn't encode log");
                        continue;
                    }
                };
                if !sub.notify(id, value) {
                    closed.push(id.clone());
                    break;
                }
            }
        }

        for id in closed {
            tracing::debug!(subscription = %id, "Dropping subscription of closed connection");
            cursor.lagging.remove(&id);
            self.registry.remove(&id);
        }
        cursor.height = Some(notified);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
