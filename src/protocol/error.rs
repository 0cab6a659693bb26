//! Protocol violations: embedding bugs that must fail loudly.

use thiserror::Error;

use crate::arena::HandleError;
use crate::protocol::order::OrderId;

/// Driver or host misuse of the embedding protocol. These indicate a bug in
/// the embedding, never in guest code, so they are fatal to the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// An order was fulfilled, resolved or rejected a second time.
    #[error("{0} was already settled")]
    OrderAlreadySettled(OrderId),
    /// A response named an order this context never issued.
    #[error("{0} was never issued by this context")]
    UnknownOrder(OrderId),
    /// `create_order_promise` was called twice for the same order.
    #[error("{0} already has a promise bound to it")]
    DuplicateOrderPromise(OrderId),
    /// A response carried a handle that does not dereference.
    #[error("response for {id} carried a bad value handle")]
    BadResponseValue {
        id: OrderId,
        #[source]
        source: HandleError,
    },
    /// A module was provided under an empty path.
    #[error("module provided under an empty path")]
    EmptyModulePath,
    /// A NeedImports step reported no import requests.
    #[error("NeedImports step reported no import requests")]
    EmptyImportRound,
    /// Import resolution did not converge within the configured cap,
    /// usually a missing or circular module.
    #[error("import resolution exceeded {cap} rounds without converging")]
    ImportRoundsExceeded { cap: u32 },
    /// The engine suspended although no orders are pending and none are in
    /// flight, so no event could ever wake it.
    #[error("suspended with no pending orders and no work in flight")]
    SuspendedWithoutWork,
    /// The engine reported no active execution in the middle of a drive.
    #[error("engine reported no active execution mid-drive")]
    UnexpectedDone,
    /// The completion channel closed while completions were outstanding.
    #[error("completion channel closed with work in flight")]
    CompletionChannelClosed,
}
