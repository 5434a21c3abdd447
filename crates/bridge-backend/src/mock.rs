// bridge-backend/src/mock.rs

//! Scripted backend for tests.
//!
//! Responses are queued per method. Each call pops the front of the queue;
//! the last queued response is kept and replayed for every later call.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::{BackendClient, BackendError, BackendResult};

type Scripted = BackendResult<Value>;

#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, method: &str, result: Value) {
        self.enqueue(method, Ok(result));
    }

    pub fn push_error(&self, method: &str, error: BackendError) {
        self.enqueue(method, Err(error));
    }

    fn enqueue(&self, method: &str, response: Scripted) {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses.entry(method.to_string()).or_default().push_back(response);
    }

    /// Number of times `method` was called
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Parameters of every call made to `method`, in order
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn call(&self, method: &str, params: Value) -> BackendResult<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((method.to_string(), params));

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let queue = match responses.get_mut(method) {
            Some(queue) if !queue.is_empty() => queue,
            _ => {
                return Err(BackendError::Rpc {
                    code: -32601,
                    message: format!("no scripted response for {}", method),
                })
            }
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Err(BackendError::EmptyResponse))
        } else {
            queue.front().cloned().unwrap_or(Err(BackendError::EmptyResponse))
        }
    }
}
