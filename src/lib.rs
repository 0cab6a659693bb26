//! Quayside Embedding Protocol
//!
//! A suspend/resume protocol between an embedded single-threaded script
//! engine and its async host: opaque value handles, order dispatch and
//! two-phase module loading.
//!
//! # Example
//!
//! ```json
//! {
//!   "steps": [
//!     { "op": "order", "var": "page", "payload": { "type": "fetch", "url": "https://a" } },
//!     { "op": "await", "var": "page" },
//!     { "op": "complete", "value": { "$": "page" } }
//!   ]
//! }
//! ```
//!
//! # Crate Features
//!
//! - `debug`: Enable extra debug assertions

#![doc(html_root_url = "https://docs.rs/quayside")]
#![warn(rust_2018_idioms)]
#![allow(dead_code)]

// Public modules
pub mod arena;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod protocol;
pub mod resolver;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::Result;
pub use thiserror::Error;

pub use arena::{Handle, HandleError, HandleResult, JsonError, Kind, PromiseState, ValueStore};
pub use context::Context;
pub use dispatch::{default_handlers, Completion, HandlerRegistry, OrderError};
pub use driver::{Driver, DriverConfig, DriverError, DriverResult, DriverState, DriverStats};
pub use engine::{Engine, EngineError, ParseError, Plan, PlanStep, RunSignal, ScriptedEngine};
pub use protocol::{
    ConsoleEntry, ConsoleLevel, ConsoleSink, ImportRequest, MemorySink, ModulePath, Order,
    OrderAnswer, OrderId, OrderResponse, ProtocolViolation, StandardSink, Status, StepReport,
};
pub use resolver::{DirModules, ModuleLoader, StaticModules};

use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const NAME: &str = "Quayside";

/// A self-contained scenario: a step plan plus the module sources it
/// imports, keyed by resolved path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub main: Plan,
    #[serde(default = "Scenario::default_entry")]
    pub entry: String,
    #[serde(default)]
    pub modules: IndexMap<String, String>,
}

impl Scenario {
    fn default_entry() -> String {
        "/main.ts".to_string()
    }
}

/// Drive a scenario to completion and return its result as JSON text
/// (`None` when the program completed with undefined or a value that does
/// not serialize).
///
/// # Example
///
/// ```no_run
/// use quayside::{run_scenario, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let scenario = r#"{
///         "main": { "steps": [ { "op": "complete", "value": 42 } ] }
///     }"#;
///     let result = run_scenario(scenario).await?;
///     // Numbers are double-precision end to end, so 42 prints as 42.0.
///     assert_eq!(result.as_deref(), Some("42.0"));
///     Ok(())
/// }
/// ```
pub async fn run_scenario(source: &str) -> Result<Option<String>> {
    let scenario: Scenario =
        serde_json::from_str(source).context("scenario did not parse")?;
    debug!(
        entry = %scenario.entry,
        steps = scenario.main.steps.len(),
        modules = scenario.modules.len(),
        "scenario loaded"
    );
    let modules: StaticModules = scenario
        .modules
        .iter()
        .map(|(path, source)| (path.as_str(), source.as_str()))
        .collect();

    let mut driver = Driver::new(ScriptedEngine::new());
    driver.set_loader(modules);

    let program = serde_json::to_string(&scenario.main)?;
    let result = driver.drive(&program, &scenario.entry).await?;
    match result {
        Some(handle) => {
            let text = driver.context().store().json_stringify(handle)?;
            driver.context_mut().store_mut().release(handle)?;
            Ok(text)
        }
        None => Ok(None),
    }
}

use std::fs;
use std::path::Path;

/// Drive a scenario file to completion.
pub async fn run_scenario_file(path: &Path) -> Result<Option<String>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    debug!(file = %path.display(), "scenario file read");
    run_scenario(&source).await
}
