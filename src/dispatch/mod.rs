//! Host-side order handling.
//!
//! Orders carry a JSON payload whose `"type"` field names the handler.
//! The registry resolves that tag and hands back a boxed future; the
//! driver spawns it and keeps stepping the interpreter while it runs.
//! Handlers never see handles, only exported JSON, so they stay `Send`
//! and know nothing about the value arena.

use std::fmt;
use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use rand::Rng;
use serde_json::{json, Value as Json};
use thiserror::Error;
use tracing::debug;

use crate::protocol::OrderId;

/// How an order handler can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order payload is not an object with a string `type` field")]
    MalformedPayload,
    #[error("no handler registered for order type `{0}`")]
    UnknownType(String),
    #[error("order field `{0}` is missing or invalid")]
    InvalidField(String),
    #[error("{0}")]
    Failed(String),
}

/// The in-flight half of one order.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Option<Json>, OrderError>> + Send>>;

/// An order handler: JSON payload in, optional JSON result out.
pub type Handler = Arc<dyn Fn(Json) -> HandlerFuture + Send + Sync>;

/// One finished order, sent back to the driver over its completion
/// channel.
#[derive(Debug)]
pub struct Completion {
    pub id: OrderId,
    pub result: Result<Option<Json>, OrderError>,
}

/// Maps order type tags to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin order types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("delay", delay_order);
        registry.register("fetch", fetch_order);
        registry.register("echo", echo_order);
        registry.register("fail", fail_order);
        registry
    }

    /// Register a handler under a type tag, replacing any previous one.
    pub fn register<F, Fut>(
        &mut self,
        tag: impl Into<String>,
        handler: F,
    ) where
        F: Fn(Json) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Json>, OrderError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.insert(tag.into(), handler);
    }

    /// The handler registered for a tag.
    pub fn get(
        &self,
        tag: &str,
    ) -> Option<&Handler> {
        self.handlers.get(tag)
    }

    /// Registered type tags, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve an order payload to its handler and start it. Tag
    /// resolution failures surface as already-failed futures, so the
    /// caller treats every order uniformly.
    pub fn dispatch(
        &self,
        id: OrderId,
        payload: Option<Json>,
    ) -> HandlerFuture {
        let Some(payload) = payload else {
            return Box::pin(ready(Err(OrderError::MalformedPayload)));
        };
        let tag = match payload.get("type").and_then(Json::as_str) {
            Some(tag) => tag.to_string(),
            None => return Box::pin(ready(Err(OrderError::MalformedPayload))),
        };
        let Some(handler) = self.handlers.get(tag.as_str()) else {
            return Box::pin(ready(Err(OrderError::UnknownType(tag))));
        };
        debug!(order = %id, order_type = %tag, "order dispatched");
        handler(payload)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tags", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

static DEFAULT_HANDLERS: Lazy<Arc<HandlerRegistry>> =
    Lazy::new(|| Arc::new(HandlerRegistry::with_builtins()));

/// The shared builtin registry.
pub fn default_handlers() -> Arc<HandlerRegistry> {
    Arc::clone(&DEFAULT_HANDLERS)
}

/// `{"type": "delay", "ms": 50}`: sleep, then settle with undefined.
async fn delay_order(payload: Json) -> Result<Option<Json>, OrderError> {
    let ms = payload
        .get("ms")
        .and_then(Json::as_f64)
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .ok_or_else(|| OrderError::InvalidField("ms".into()))?;
    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
    Ok(None)
}

/// `{"type": "fetch", "url": "..."}`: a canned response after a random
/// latency in the 30..=120ms band.
async fn fetch_order(payload: Json) -> Result<Option<Json>, OrderError> {
    let url = payload
        .get("url")
        .and_then(Json::as_str)
        .ok_or_else(|| OrderError::InvalidField("url".into()))?
        .to_string();
    let latency: u64 = rand::rng().random_range(30..=120);
    tokio::time::sleep(Duration::from_millis(latency)).await;
    Ok(Some(json!({
        "url": url,
        "status": 200,
        "body": { "ok": true },
    })))
}

/// `{"type": "echo", "value": ...}`: settle with the given value.
async fn echo_order(payload: Json) -> Result<Option<Json>, OrderError> {
    Ok(Some(payload.get("value").cloned().unwrap_or(Json::Null)))
}

/// `{"type": "fail", "message": "..."}`: always reject.
async fn fail_order(payload: Json) -> Result<Option<Json>, OrderError> {
    let message = payload
        .get("message")
        .and_then(Json::as_str)
        .unwrap_or("ordered failure");
    Err(OrderError::Failed(message.to_string()))
}
