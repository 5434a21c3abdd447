// rpc/src/filter.rs

//! Poll-based filters.
//!
//! Each filter remembers the next block it has yet to report. The cursor sits behind
//! an async mutex that pollers hold across the backend query, so concurrent
//! polls of one filter never report the same range twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};

use crate::params::LogQuery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    Block,
    PendingTransaction,
    Log(LogQuery),
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Block => "block",
            FilterKind::PendingTransaction => "pendingTransaction",
            FilterKind::Log(_) => "log",
        }
    }
}

#[derive(Debug)]
pub struct Filter {
    pub id: u64,
    pub kind: FilterKind,
    next_block: Mutex<u64>,
}

impl Filter {
    pub fn new(id: u64, kind: FilterKind, next_block: u64) -> Self {
        Self {
            id,
            kind,
            next_block: Mutex::new(next_block),
        }
    }

    /// Exclusive access to the first height not yet reported
    pub async fn cursor(&self) -> MutexGuard<'_, u64> {
        self.next_block.lock().await
    }

    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.id)
    }
}

/// All live filters, keyed by numeric id
pub struct FilterRegistry {
    filters: RwLock<HashMap<u64, Arc<Filter>>>,
    next_id: AtomicU64,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, kind: FilterKind, next_block: u64) -> Arc<Filter> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let filter = Arc::new(Filter::new(id, kind, next_block));
        self.filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, filter.clone());
        tracing::debug!(id, kind = filter.kind.as_str(), next_block, "Filter installed");
        filter
    }

    pub fn get(&self, id: u64) -> Option<Arc<Filter>> {
        self.filters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// True when the filter existed
    pub fn remove(&self, id: u64) -> bool {
        let removed = self
            .filters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            tracing::debug!(id, "Filter uninstalled");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.filters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
