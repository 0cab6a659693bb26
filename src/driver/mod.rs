//! The suspend/resume execution loop.
//!
//! A drive owns one program from prepare to completion. The driver steps
//! the engine, and after every step: forwards console output to the sink,
//! releases promises of cancelled orders, loads requested modules, and
//! dispatches newly pending orders onto spawned tasks. When the engine
//! suspends with work in flight, the driver parks on its completion
//! channel until one order finishes, settles the matching promise and
//! steps again. Completions land on an unbounded channel, so handler
//! tasks never block on a slow driver.
//!
//! One drive is single-threaded with respect to the context: handler
//! tasks run concurrently, but every handle access happens on the driver
//! between steps.

use std::sync::Arc;

use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::arena::{Handle, HandleError};
use crate::context::Context;
use crate::dispatch::{default_handlers, Completion, HandlerRegistry};
use crate::engine::{Engine, EngineError, ParseError};
use crate::protocol::{
    ConsoleSink, ModulePath, OrderId, OrderResponse, ProtocolViolation, StandardSink, Status,
};
use crate::resolver::{ModuleLoader, StaticModules};

/// Where a driver currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    /// No drive started, or the last prepare failed.
    #[default]
    Ready,
    /// Stepping the engine.
    Running,
    /// Loading modules for a NeedImports step.
    AwaitingImports,
    /// Parked on the completion channel.
    AwaitingOrders,
    /// The last drive completed.
    Completed,
    /// The last drive failed.
    Failed,
}

/// Driver tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Import rounds allowed per drive before the driver gives up on
    /// module resolution converging.
    pub max_import_rounds: u32,
    /// Log one line per step at info level.
    pub trace_steps: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_import_rounds: 100,
            trace_steps: false,
        }
    }
}

/// Counters for one drive. Reset when the next drive starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverStats {
    runs: u64,
    import_rounds: u64,
    orders_dispatched: u64,
    orders_resolved: u64,
    orders_rejected: u64,
    orders_cancelled: u64,
    completions_discarded: u64,
}

impl DriverStats {
    /// Engine steps executed.
    #[inline]
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// NeedImports rounds served.
    #[inline]
    pub fn import_rounds(&self) -> u64 {
        self.import_rounds
    }

    /// Orders handed to the handler registry.
    #[inline]
    pub fn orders_dispatched(&self) -> u64 {
        self.orders_dispatched
    }

    /// Order promises resolved with a value.
    #[inline]
    pub fn orders_resolved(&self) -> u64 {
        self.orders_resolved
    }

    /// Order promises rejected.
    #[inline]
    pub fn orders_rejected(&self) -> u64 {
        self.orders_rejected
    }

    /// Orders abandoned by the engine.
    #[inline]
    pub fn orders_cancelled(&self) -> u64 {
        self.orders_cancelled
    }

    /// Completions that arrived for cancelled or foreign orders.
    #[inline]
    pub fn completions_discarded(&self) -> u64 {
        self.completions_discarded
    }
}

/// A drive failure.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The program did not parse; the driver stays `Ready`.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Guest code failed with an uncaught error.
    #[error("guest error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The loader had no source for a requested module.
    #[error("no module for `{specifier}` (resolved to {resolved})")]
    UnknownModule {
        specifier: String,
        resolved: ModulePath,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Handle(#[from] HandleError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Drives one engine over one context.
pub struct Driver<E> {
    engine: E,
    context: Context,
    loader: Box<dyn ModuleLoader>,
    handlers: Arc<HandlerRegistry>,
    sink: Arc<dyn ConsoleSink>,
    config: DriverConfig,
    state: DriverState,
    stats: DriverStats,
}

impl<E: Engine> Driver<E> {
    /// A driver with the builtin handler registry, an empty module table
    /// and the standard console sink.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, DriverConfig::default())
    }

    pub fn with_config(
        engine: E,
        config: DriverConfig,
    ) -> Self {
        Self {
            engine,
            context: Context::new(),
            loader: Box::new(StaticModules::new()),
            handlers: default_handlers(),
            sink: Arc::new(StandardSink),
            config,
            state: DriverState::Ready,
            stats: DriverStats::default(),
        }
    }

    /// Replace the module loader.
    pub fn set_loader(
        &mut self,
        loader: impl ModuleLoader + 'static,
    ) {
        self.loader = Box::new(loader);
    }

    /// Replace the handler registry.
    pub fn set_handlers(
        &mut self,
        handlers: Arc<HandlerRegistry>,
    ) {
        self.handlers = handlers;
    }

    /// Replace the console sink.
    pub fn set_sink(
        &mut self,
        sink: Arc<dyn ConsoleSink>,
    ) {
        self.sink = sink;
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    #[inline]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run a program to completion. Returns the completion value as an
    /// owned handle; the caller releases it.
    ///
    /// The context persists across drives: values, module sources and
    /// order history survive, so a later program can read what an earlier
    /// one built.
    pub async fn drive(
        &mut self,
        source: &str,
        filename: &str,
    ) -> DriverResult<Option<Handle>> {
        self.stats = DriverStats::default();
        self.state = DriverState::Ready;
        self.context
            .prepare(&mut self.engine, source, filename)
            .map_err(|err| {
                debug!(filename = %filename, error = %err, "prepare failed");
                err
            })?;
        self.state = DriverState::Running;
        let result = self.drive_loop().await;
        self.state = match result {
            Ok(_) => DriverState::Completed,
            Err(_) => DriverState::Failed,
        };
        result
    }

    async fn drive_loop(&mut self) -> DriverResult<Option<Handle>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut in_flight: HashMap<OrderId, Handle> = HashMap::new();
        let result = self.pump(&tx, &mut rx, &mut in_flight).await;
        // The driver's promise references; the order records keep theirs.
        for (_, promise) in in_flight.drain() {
            let _ = self.context.store_mut().release(promise);
        }
        result
    }

    async fn pump(
        &mut self,
        tx: &mpsc::UnboundedSender<Completion>,
        rx: &mut mpsc::UnboundedReceiver<Completion>,
        in_flight: &mut HashMap<OrderId, Handle>,
    ) -> DriverResult<Option<Handle>> {
        let mut import_rounds: u32 = 0;
        loop {
            // Everything that finished while we were stepping settles
            // before the engine resumes, so one step sees all of it.
            while let Ok(completion) = rx.try_recv() {
                self.settle(completion, in_flight)?;
            }

            let report = self.context.run(&mut self.engine)?;
            self.stats.runs += 1;
            if self.config.trace_steps {
                info!(
                    step = self.stats.runs,
                    status = %report.status,
                    pending = report.pending.len(),
                    in_flight = in_flight.len(),
                    "step"
                );
            }

            for entry in &report.console {
                self.sink.write(entry.level, &entry.message);
            }

            for id in &report.cancelled {
                self.stats.orders_cancelled += 1;
                if let Some(promise) = in_flight.remove(id) {
                    self.context.store_mut().release(promise)?;
                }
            }

            match report.status {
                Status::Continue => {}
                Status::Complete => return Ok(report.value),
                Status::Error => {
                    let message = report
                        .error
                        .unwrap_or_else(|| "unspecified guest error".to_string());
                    return Err(DriverError::Runtime(message));
                }
                Status::Done => return Err(ProtocolViolation::UnexpectedDone.into()),
                Status::NeedImports => {
                    self.state = DriverState::AwaitingImports;
                    import_rounds += 1;
                    self.stats.import_rounds += 1;
                    if import_rounds > self.config.max_import_rounds {
                        return Err(ProtocolViolation::ImportRoundsExceeded {
                            cap: self.config.max_import_rounds,
                        }
                        .into());
                    }
                    if report.imports.is_empty() {
                        return Err(ProtocolViolation::EmptyImportRound.into());
                    }
                    for request in &report.imports {
                        if self.context.module_provided(&request.resolved_path) {
                            debug!(module = %request.resolved_path, "requested module already provided");
                            continue;
                        }
                        let Some(source) = self.loader.load(&request.resolved_path) else {
                            return Err(DriverError::UnknownModule {
                                specifier: request.specifier.clone(),
                                resolved: request.resolved_path.clone(),
                            });
                        };
                        self.context
                            .provide_module(request.resolved_path.clone(), source)?;
                    }
                    self.state = DriverState::Running;
                }
                Status::Suspended => {
                    for order in &report.pending {
                        let payload = match order.payload {
                            Some(handle) => self.context.store().export_json(handle)?,
                            None => None,
                        };
                        let promise = self.context.create_order_promise(order.id)?;
                        self.context
                            .fulfill_orders(&[OrderResponse::ok(order.id, Some(promise))])?;
                        in_flight.insert(order.id, promise);
                        self.stats.orders_dispatched += 1;

                        let task = self.handlers.dispatch(order.id, payload);
                        let tx = tx.clone();
                        let id = order.id;
                        tokio::spawn(async move {
                            // The drive may already be over; that is fine.
                            let _ = tx.send(Completion {
                                id,
                                result: task.await,
                            });
                        });
                    }
                    if in_flight.is_empty() {
                        return Err(ProtocolViolation::SuspendedWithoutWork.into());
                    }
                    self.state = DriverState::AwaitingOrders;
                    let Some(completion) = rx.recv().await else {
                        return Err(ProtocolViolation::CompletionChannelClosed.into());
                    };
                    self.settle(completion, in_flight)?;
                    self.state = DriverState::Running;
                }
            }
        }
    }

    /// Apply one completion: resolve or reject the order's promise, then
    /// release the driver's reference to it. Completions for orders no
    /// longer in flight (cancelled mid-run) are discarded.
    fn settle(
        &mut self,
        completion: Completion,
        in_flight: &mut HashMap<OrderId, Handle>,
    ) -> DriverResult<()> {
        let Some(promise) = in_flight.remove(&completion.id) else {
            self.stats.completions_discarded += 1;
            debug!(order = %completion.id, "completion for abandoned order discarded");
            return Ok(());
        };
        match completion.result {
            Ok(Some(json)) => {
                let value = self.context.store_mut().json_import(&json);
                self.context.resolve_promise(promise, Some(value))?;
                self.context.store_mut().release(value)?;
                self.stats.orders_resolved += 1;
            }
            Ok(None) => {
                self.context.resolve_promise(promise, None)?;
                self.stats.orders_resolved += 1;
            }
            Err(err) => {
                self.context.reject_promise(promise, err.to_string())?;
                self.stats.orders_rejected += 1;
            }
        }
        self.context.store_mut().release(promise)?;
        Ok(())
    }
}
