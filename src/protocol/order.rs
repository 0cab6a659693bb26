//! Orders: host-addressed async requests raised by guest code.

use std::fmt;

use crate::arena::Handle;

/// Unique order identifier, monotonically increasing per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderId(pub u64);

impl OrderId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for OrderId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl From<OrderId> for u64 {
    fn from(val: OrderId) -> Self {
        val.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Order({})", self.0)
    }
}

/// One outstanding host-side async unit requested by guest code.
///
/// The payload handle is owned by the issuing context and is only
/// guaranteed valid until execution resumes; hosts copy what they need out
/// of it before the next `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub payload: Option<Handle>,
}

/// Host answer for exactly one order.
#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub id: OrderId,
    /// A value handle (shared with the context; the host keeps its release
    /// obligation) or an error message.
    pub result: Result<Option<Handle>, String>,
}

impl OrderResponse {
    /// Answer an order with a value (or undefined when `None`).
    pub fn ok(
        id: OrderId,
        value: Option<Handle>,
    ) -> Self {
        Self {
            id,
            result: Ok(value),
        }
    }

    /// Answer an order with an error message.
    pub fn err(
        id: OrderId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            result: Err(message.into()),
        }
    }
}

/// What the context recorded as an order's answer, as seen by the engine
/// when execution resumes.
#[derive(Debug, Clone)]
pub enum OrderAnswer {
    /// Answered with a value handle (usually a promise) or undefined.
    Value(Option<Handle>),
    /// Answered with an error.
    Error(String),
}
