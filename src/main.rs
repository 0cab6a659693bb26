//! Quayside Embedding Protocol - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quayside::util::logger;
use quayside::{run_scenario, run_scenario_file, NAME, VERSION};
use std::path::PathBuf;

/// Suspend/resume embedding protocol for single-threaded script engines
#[derive(Parser, Debug)]
#[command(name = "quayside")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Scenario file to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Evaluate a scenario from the command line
    Eval {
        /// Scenario JSON to evaluate
        #[arg(value_name = "SCENARIO")]
        scenario: String,
    },

    /// Run the built-in order fan-out demo
    Demo,

    /// Run the built-in module loading demo
    Modules,

    /// Print version information
    Version,
}

const DEMO_SCENARIO: &str = r#"{
  "main": { "steps": [
    { "op": "console", "message": "starting demo" },
    { "op": "order", "var": "warmup", "payload": { "type": "delay", "ms": 25 } },
    { "op": "await", "var": "warmup" },
    { "op": "order", "var": "a", "payload": { "type": "fetch", "url": "https://example.test/a" } },
    { "op": "order", "var": "b", "payload": { "type": "fetch", "url": "https://example.test/b" } },
    { "op": "order", "var": "c", "payload": { "type": "fetch", "url": "https://example.test/c" } },
    { "op": "await_all", "vars": ["a", "b", "c"] },
    { "op": "console", "message": "all fetches settled" },
    { "op": "complete", "value": { "$": "a" } }
  ] }
}"#;

const MODULES_SCENARIO: &str = r#"{
  "main": { "steps": [
    { "op": "import", "specifier": "./lib/math.ts" },
    { "op": "import", "specifier": "./lib/utils.ts" },
    { "op": "console", "message": "modules loaded" },
    { "op": "complete", "value": 42 }
  ] },
  "modules": {
    "/lib/math.ts": "export const PI = 3.14159;",
    "/lib/utils.ts": "export function id(x) { return x; }"
  }
}"#;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        logger::init_debug();
    } else {
        logger::init_cli();
    }

    match args.command {
        Commands::Run { file } => {
            let result = run_scenario_file(&file)
                .await
                .with_context(|| format!("Failed to run: {}", file.display()))?;
            if let Some(text) = result {
                println!("{text}");
            }
        }
        Commands::Eval { scenario } => {
            let result = run_scenario(&scenario)
                .await
                .context("Failed to evaluate scenario")?;
            if let Some(text) = result {
                println!("{text}");
            }
        }
        Commands::Demo => {
            let result = run_scenario(DEMO_SCENARIO)
                .await
                .context("Demo scenario failed")?;
            if let Some(text) = result {
                println!("{text}");
            }
        }
        Commands::Modules => {
            let result = run_scenario(MODULES_SCENARIO)
                .await
                .context("Modules scenario failed")?;
            if let Some(text) = result {
                println!("{text}");
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
