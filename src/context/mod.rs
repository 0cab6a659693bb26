//! One interpreter instance: value storage, order table, module registry
//! and the buffers drained into each step report.
//!
//! The context is the serialization point of the protocol. The host side
//! calls `provide_module`, `create_order_promise`, `resolve_promise`,
//! `reject_promise` and `fulfill_orders`; the engine side calls
//! `place_order`, `cancel_order`, `request_import` and `console` while a
//! `run` is executing. The driver owns the context mutably, so no two
//! boundary crossings ever overlap.

use hashbrown::HashMap;
use indexmap::IndexMap;
use tracing::debug;

use crate::arena::{Handle, HandleResult, ValueStore};
use crate::engine::{Engine, EngineError, ParseError, RunSignal};
use crate::protocol::{
    ConsoleEntry, ConsoleLevel, ImportRequest, ModulePath, Order, OrderAnswer, OrderId,
    OrderResponse, ProtocolViolation, Status, StepReport,
};

#[derive(Debug)]
struct OrderRecord {
    /// Payload handle, owned by the context until the context drops.
    #[allow(dead_code)]
    payload: Option<Handle>,
    /// Promise bound via `create_order_promise`, if any.
    promise: Option<Handle>,
    /// The host's answer, once fulfilled.
    answer: Option<OrderAnswer>,
    cancelled: bool,
}

/// One interpreter instance with its own handle space, order-id sequence
/// and module registry.
#[derive(Debug, Default)]
pub struct Context {
    store: ValueStore,
    orders: HashMap<OrderId, OrderRecord>,
    next_order: u64,
    pending: Vec<Order>,
    cancelled: Vec<OrderId>,
    imports: Vec<ImportRequest>,
    console: Vec<ConsoleEntry>,
    modules: IndexMap<ModulePath, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value storage for this context.
    #[inline]
    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Mutable value storage for this context.
    #[inline]
    pub fn store_mut(&mut self) -> &mut ValueStore {
        &mut self.store
    }

    /// Total orders issued over the context's lifetime.
    #[inline]
    pub fn orders_issued(&self) -> u64 {
        self.next_order
    }

    /// Number of distinct module paths provided so far.
    #[inline]
    pub fn modules_provided(&self) -> usize {
        self.modules.len()
    }

    // === boundary crossings (host side) ===

    /// Load a program into `engine` for this context.
    pub fn prepare<E: Engine>(
        &mut self,
        engine: &mut E,
        source: &str,
        filename: &str,
    ) -> Result<(), ParseError> {
        engine.prepare(self, source, filename)
    }

    /// Execute one step and assemble the report, draining the console,
    /// import, pending and cancellation buffers exactly once.
    pub fn run<E: Engine>(
        &mut self,
        engine: &mut E,
    ) -> Result<StepReport, EngineError> {
        let signal = engine.run(self)?;
        Ok(self.finish(signal))
    }

    /// Supply source text for a resolved module path. Idempotent: providing
    /// a path that already has source is a no-op, which is what breaks
    /// re-request loops.
    pub fn provide_module(
        &mut self,
        path: ModulePath,
        source: impl Into<String>,
    ) -> Result<(), ProtocolViolation> {
        if path.as_str().is_empty() {
            return Err(ProtocolViolation::EmptyModulePath);
        }
        if self.modules.contains_key(&path) {
            debug!(module = %path, "module already provided, ignoring");
            return Ok(());
        }
        debug!(module = %path, "module provided");
        self.modules.insert(path, source.into());
        Ok(())
    }

    /// True once `provide_module` has run for this path.
    pub fn module_provided(
        &self,
        path: &ModulePath,
    ) -> bool {
        self.modules.contains_key(path)
    }

    /// Source text registered for a path.
    pub fn module_source(
        &self,
        path: &ModulePath,
    ) -> Option<&str> {
        self.modules.get(path).map(String::as_str)
    }

    /// Create the promise that will settle an issued order. Returns an
    /// owned handle; the host releases it after settling.
    pub fn create_order_promise(
        &mut self,
        id: OrderId,
    ) -> Result<Handle, ProtocolViolation> {
        let record = self
            .orders
            .get(&id)
            .ok_or(ProtocolViolation::UnknownOrder(id))?;
        if record.promise.is_some() {
            return Err(ProtocolViolation::DuplicateOrderPromise(id));
        }
        let handle = self.store.promise(Some(id));
        // The record keeps its own reference beside the host's.
        if let Err(err) = self.store.retain_shared(handle) {
            unreachable!("freshly allocated promise must retain: {err}");
        }
        if let Some(record) = self.orders.get_mut(&id) {
            record.promise = Some(handle);
        }
        Ok(handle)
    }

    /// Resolve a promise with a value (undefined when `None`). The value
    /// handle is shared; the caller keeps its release obligation.
    pub fn resolve_promise(
        &mut self,
        promise: Handle,
        value: Option<Handle>,
    ) -> HandleResult<()> {
        self.store.settle_fulfill(promise, value)?;
        debug!(promise = %promise, "promise resolved");
        Ok(())
    }

    /// Reject a promise with an error message.
    pub fn reject_promise(
        &mut self,
        promise: Handle,
        message: impl Into<String>,
    ) -> HandleResult<()> {
        let message = message.into();
        self.store.settle_reject(promise, message.clone())?;
        debug!(promise = %promise, error = %message, "promise rejected");
        Ok(())
    }

    /// Answer orders in bulk. Each order accepts exactly one answer;
    /// answering twice is a protocol violation. Responses for cancelled
    /// orders are discarded silently. Value handles are shared; the caller
    /// keeps its release obligation.
    pub fn fulfill_orders(
        &mut self,
        responses: &[OrderResponse],
    ) -> Result<(), ProtocolViolation> {
        for response in responses {
            let id = response.id;
            let record = self
                .orders
                .get(&id)
                .ok_or(ProtocolViolation::UnknownOrder(id))?;
            if record.cancelled {
                debug!(order = %id, "response for cancelled order discarded");
                continue;
            }
            if record.answer.is_some() {
                return Err(ProtocolViolation::OrderAlreadySettled(id));
            }
            let answer = match &response.result {
                Ok(Some(value)) => {
                    self.store
                        .retain_shared(*value)
                        .map_err(|source| ProtocolViolation::BadResponseValue { id, source })?;
                    OrderAnswer::Value(Some(*value))
                }
                Ok(None) => OrderAnswer::Value(None),
                Err(message) => OrderAnswer::Error(message.clone()),
            };
            debug!(order = %id, "order fulfilled");
            if let Some(record) = self.orders.get_mut(&id) {
                record.answer = Some(answer);
            }
        }
        Ok(())
    }

    // === engine-facing services ===

    /// Issue a new order. The payload handle transfers to the context; the
    /// engine must not release it.
    pub fn place_order(
        &mut self,
        payload: Option<Handle>,
    ) -> OrderId {
        let id = OrderId(self.next_order);
        self.next_order += 1;
        if let Some(h) = payload {
            self.store.transfer_to_shared(h);
        }
        self.orders.insert(
            id,
            OrderRecord {
                payload,
                promise: None,
                answer: None,
                cancelled: false,
            },
        );
        self.pending.push(Order { id, payload });
        debug!(order = %id, "order placed");
        id
    }

    /// Abandon an order. Its id is reported in the next step's cancellation
    /// list; any late completion for it must be discarded silently.
    pub fn cancel_order(
        &mut self,
        id: OrderId,
    ) {
        match self.orders.get_mut(&id) {
            Some(record) if !record.cancelled => {
                record.cancelled = true;
                self.cancelled.push(id);
                debug!(order = %id, "order cancelled");
            }
            Some(_) => {}
            None => debug!(order = %id, "cancel for unknown order ignored"),
        }
    }

    /// True once an order has been cancelled.
    pub fn order_cancelled(
        &self,
        id: OrderId,
    ) -> bool {
        self.orders.get(&id).is_some_and(|r| r.cancelled)
    }

    /// The answer recorded for an order, once the host fulfilled it.
    pub fn order_answer(
        &self,
        id: OrderId,
    ) -> Option<&OrderAnswer> {
        self.orders.get(&id).and_then(|r| r.answer.as_ref())
    }

    /// Queue an unresolved import for the next report.
    pub fn request_import(
        &mut self,
        request: ImportRequest,
    ) {
        self.imports.push(request);
    }

    /// Buffer one console line for the next report.
    pub fn console(
        &mut self,
        level: ConsoleLevel,
        message: impl Into<String>,
    ) {
        self.console.push(ConsoleEntry {
            level,
            message: message.into(),
        });
    }

    // === report assembly ===

    fn finish(
        &mut self,
        signal: RunSignal,
    ) -> StepReport {
        let (status, value, error) = match signal {
            RunSignal::Continue => (Status::Continue, None, None),
            RunSignal::Complete(value) => (Status::Complete, value, None),
            RunSignal::NeedImports => (Status::NeedImports, None, None),
            RunSignal::Suspended => (Status::Suspended, None, None),
            RunSignal::Failed(message) => (Status::Error, None, Some(message)),
            RunSignal::Done => (Status::Done, None, None),
        };
        let report = StepReport {
            status,
            value,
            imports: std::mem::take(&mut self.imports),
            pending: std::mem::take(&mut self.pending),
            cancelled: std::mem::take(&mut self.cancelled),
            error,
            console: std::mem::take(&mut self.console),
        };
        debug!(
            status = %report.status,
            pending = report.pending.len(),
            imports = report.imports.len(),
            cancelled = report.cancelled.len(),
            "step finished"
        );
        report
    }
}
