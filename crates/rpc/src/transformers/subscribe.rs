// rpc/src/transformers/subscribe.rs

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Transformer;
use crate::params::{expect_len, string_param, LogQuery};
use crate::subscription::SubscriptionKind;
use crate::{RequestContext, RpcError, RpcResult};

pub(super) fn transformers() -> Vec<Arc<dyn Transformer>> {
    vec![Arc::new(Subscribe), Arc::new(Unsubscribe)]
}

/// Only persistent connections carry a session
pub struct Subscribe;

#[async_trait]
impl Transformer for Subscribe {
    fn method_name(&self) -> &'static str {
        "eth_subscribe"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let session = match &ctx.session {
            Some(session) => session,
            None => {
                tracing::debug!("eth_subscribe only supported over websocket");
                return Err(RpcError::MethodNotFound(self.method_name().into()));
            }
        };
        expect_len(&params, 1)?;
        let kind = match string_param(&params, 0, "subscription type")? {
            "newHeads" => SubscriptionKind::NewHeads,
            "logs" => SubscriptionKind::Logs(LogQuery::parse(params.get(1))?),
            other => {
                return Err(RpcError::InvalidParams(format!(
                    "unsupported subscription type {}",
                    other
                )))
            }
        };
        Ok(json!(session.subscribe(kind)))
    }
}

pub struct Unsubscribe;

#[async_trait]
impl Transformer for Unsubscribe {
    fn method_name(&self) -> &'static str {
        "eth_unsubscribe"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let session = ctx
            .session
            .as_ref()
            .ok_or_else(|| RpcError::MethodNotFound(self.method_name().into()))?;
        expect_len(&params, 1)?;
        let id = string_param(&params, 0, "subscription id")?;
        Ok(json!(session.unsubscribe(id)))
    }
}
