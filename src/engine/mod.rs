//! The interpreter seam.
//!
//! The protocol treats script execution as an opaque prepare/run box: the
//! driver never sees inside, it only reacts to statuses. `Engine` is that
//! box. Engines raise work through the engine-facing services on
//! `Context` (placing orders, requesting imports, emitting console lines)
//! and yield a `RunSignal`, which the context folds together with its
//! drained buffers into the full `StepReport`.

pub mod scripted;

use thiserror::Error;

use crate::arena::Handle;
use crate::context::Context;

pub use scripted::{Plan, PlanStep, ScriptedEngine};

/// `prepare` failure. Fatal to that prepare call only; the context stays
/// reusable for a fresh prepare.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error in {filename}: {message}")]
pub struct ParseError {
    pub filename: String,
    pub message: String,
}

impl ParseError {
    pub fn new(
        filename: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            message: message.into(),
        }
    }
}

/// Transport-level engine failure. Unlike a guest error, this means the
/// boundary itself broke; it is fatal for the whole context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine transport failed: {0}")]
    Transport(String),
}

/// Raw yield of one `run` call, before the context attaches the drained
/// import/order/console buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSignal {
    /// Yielded voluntarily; run again.
    Continue,
    /// Finished with an optional result (an owned handle for the host).
    Complete(Option<Handle>),
    /// Blocked on the imports queued in the context.
    NeedImports,
    /// Blocked on pending or in-flight orders.
    Suspended,
    /// Guest code failed with an uncaught error.
    Failed(String),
    /// Nothing prepared.
    Done,
}

/// A single-threaded script interpreter embedded behind the protocol.
///
/// No two calls on the same context run concurrently; the driver owns the
/// context and serializes every boundary crossing.
pub trait Engine {
    /// Load a program. On error the engine holds no program and the context
    /// is untouched.
    fn prepare(
        &mut self,
        ctx: &mut Context,
        source: &str,
        filename: &str,
    ) -> Result<(), ParseError>;

    /// Execute until completion or the next yield point.
    fn run(
        &mut self,
        ctx: &mut Context,
    ) -> Result<RunSignal, EngineError>;
}
