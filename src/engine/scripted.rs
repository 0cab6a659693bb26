//! A deterministic engine driven by a JSON step plan.
//!
//! Plans exist so hosts can be exercised without embedding a real
//! interpreter: each step maps onto one boundary crossing (place an order,
//! await its promise, request an import, emit console output), and the
//! engine walks them with an ordinary program counter. Suspension is
//! re-entrant: a blocked step is re-evaluated from scratch on the next
//! `run`, so every check it performs must be read-only until it commits.
//!
//! A minimal plan:
//!
//! ```json
//! {
//!   "steps": [
//!     { "op": "order", "var": "w", "payload": { "type": "delay", "ms": 5 } },
//!     { "op": "await", "var": "w" },
//!     { "op": "complete", "value": "done" }
//!   ]
//! }
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::arena::{Handle, Kind, PromiseState};
use crate::context::Context;
use crate::engine::{Engine, EngineError, ParseError, RunSignal};
use crate::protocol::{ConsoleLevel, ImportRequest, ModulePath, OrderAnswer, OrderId};

/// A parsed step plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// One plan step, tagged by `"op"` in the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
    /// Emit one console line.
    Console {
        #[serde(default)]
        level: ConsoleLevel,
        message: String,
    },
    /// Issue an order and bind its id to `var`. Consecutive order steps
    /// batch into a single suspension.
    Order {
        var: String,
        #[serde(default)]
        payload: Option<Json>,
    },
    /// Block until the order bound to `var` settles. Rebinds `var` to the
    /// settled value. A rejection fails the program unless `catch` is set,
    /// which rebinds `var` to the error message instead.
    Await {
        var: String,
        #[serde(default)]
        catch: bool,
    },
    /// Block until every listed order settles. Any rejection fails the
    /// program.
    AwaitAll { vars: Vec<String> },
    /// Block until the first of the listed orders settles, then cancel the
    /// rest. A winning rejection fails the program.
    Race { vars: Vec<String> },
    /// Import a module, requesting it from the host when unprovided.
    /// Consecutive unprovided imports batch into a single request round.
    Import {
        specifier: String,
        #[serde(default)]
        from: Option<String>,
    },
    /// Request a module on every run without ever advancing. Hosts use
    /// this to exercise their re-request limits.
    ImportLoop { specifier: String },
    /// Suspend with no pending work.
    Stall,
    /// Yield voluntarily; execution continues on the next run.
    Yield,
    /// Finish the program. `{"$": "var"}` completes with the value bound
    /// to `var`; any other JSON completes with that document.
    Complete {
        #[serde(default)]
        value: Option<Json>,
    },
    /// Fail the program with an uncaught error.
    Fail { message: String },
}

/// What a plan variable currently holds.
#[derive(Debug, Clone, PartialEq)]
enum Binding {
    /// An issued order, not yet awaited.
    Order(OrderId),
    /// A settled value (`None` means undefined).
    Settled(Option<Handle>),
    /// A rejection message captured by `catch`.
    Caught(String),
}

/// Read-only settlement check of a binding.
enum Settle {
    NotYet,
    Value(Option<Handle>),
    Rejected(String),
}

#[derive(Debug)]
struct Program {
    filename: String,
    steps: Vec<PlanStep>,
    pc: usize,
    vars: HashMap<String, Binding>,
}

/// Engine that replays a JSON step plan.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    program: Option<Program>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for ScriptedEngine {
    fn prepare(
        &mut self,
        _ctx: &mut Context,
        source: &str,
        filename: &str,
    ) -> Result<(), ParseError> {
        let plan: Plan = serde_json::from_str(source).map_err(|err| {
            self.program = None;
            ParseError::new(filename, err.to_string())
        })?;
        debug!(filename = %filename, steps = plan.steps.len(), "plan prepared");
        self.program = Some(Program {
            filename: filename.to_string(),
            steps: plan.steps,
            pc: 0,
            vars: HashMap::new(),
        });
        Ok(())
    }

    fn run(
        &mut self,
        ctx: &mut Context,
    ) -> Result<RunSignal, EngineError> {
        let Some(program) = self.program.as_mut() else {
            return Ok(RunSignal::Done);
        };
        loop {
            let Some(step) = program.steps.get(program.pc).cloned() else {
                self.program = None;
                return Ok(RunSignal::Complete(None));
            };
            match step {
                PlanStep::Console { level, message } => {
                    ctx.console(level, message);
                    program.pc += 1;
                }
                PlanStep::Order { var, payload } => {
                    let handle = payload.as_ref().map(|json| ctx.store_mut().json_import(json));
                    let id = ctx.place_order(handle);
                    program.vars.insert(var, Binding::Order(id));
                    program.pc += 1;
                }
                PlanStep::Await { var, catch } => {
                    match check_var(ctx, program, &var)? {
                        Settle::NotYet => return Ok(RunSignal::Suspended),
                        Settle::Value(value) => {
                            program.vars.insert(var, Binding::Settled(value));
                            program.pc += 1;
                        }
                        Settle::Rejected(message) => {
                            if catch {
                                program.vars.insert(var, Binding::Caught(message));
                                program.pc += 1;
                            } else {
                                self.program = None;
                                return Ok(RunSignal::Failed(message));
                            }
                        }
                    }
                }
                PlanStep::AwaitAll { vars } => {
                    let mut settled = Vec::with_capacity(vars.len());
                    for var in &vars {
                        match check_var(ctx, program, var)? {
                            Settle::NotYet => return Ok(RunSignal::Suspended),
                            Settle::Value(value) => settled.push((var.clone(), value)),
                            Settle::Rejected(message) => {
                                self.program = None;
                                return Ok(RunSignal::Failed(message));
                            }
                        }
                    }
                    for (var, value) in settled {
                        program.vars.insert(var, Binding::Settled(value));
                    }
                    program.pc += 1;
                }
                PlanStep::Race { vars } => {
                    let mut winner = None;
                    for var in &vars {
                        match check_var(ctx, program, var)? {
                            Settle::NotYet => {}
                            outcome => {
                                winner = Some((var.clone(), outcome));
                                break;
                            }
                        }
                    }
                    let Some((var, outcome)) = winner else {
                        return Ok(RunSignal::Suspended);
                    };
                    for loser in vars.iter().filter(|v| **v != var) {
                        if let Some(Binding::Order(id)) = program.vars.get(loser) {
                            ctx.cancel_order(*id);
                        }
                    }
                    match outcome {
                        Settle::Value(value) => {
                            program.vars.insert(var, Binding::Settled(value));
                            program.pc += 1;
                        }
                        Settle::Rejected(message) => {
                            self.program = None;
                            return Ok(RunSignal::Failed(message));
                        }
                        Settle::NotYet => unreachable!("winner is settled"),
                    }
                }
                PlanStep::Import { specifier, from } => {
                    let importer = Some(ModulePath::new(
                        from.as_deref().unwrap_or(&program.filename),
                    ));
                    let resolved = ModulePath::resolve(&specifier, importer.as_ref());
                    if ctx.module_provided(&resolved) {
                        program.pc += 1;
                        continue;
                    }
                    ctx.request_import(ImportRequest {
                        specifier,
                        resolved_path: resolved,
                        importer,
                    });
                    // Batch the directly following unprovided imports into
                    // the same round; pc stays here so they re-check once
                    // the host answers.
                    let mut ahead = program.pc + 1;
                    while let Some(PlanStep::Import { specifier, from }) =
                        program.steps.get(ahead)
                    {
                        let importer = Some(ModulePath::new(
                            from.as_deref().unwrap_or(&program.filename),
                        ));
                        let resolved = ModulePath::resolve(specifier, importer.as_ref());
                        if !ctx.module_provided(&resolved) {
                            ctx.request_import(ImportRequest {
                                specifier: specifier.clone(),
                                resolved_path: resolved,
                                importer,
                            });
                        }
                        ahead += 1;
                    }
                    return Ok(RunSignal::NeedImports);
                }
                PlanStep::ImportLoop { specifier } => {
                    let importer = Some(ModulePath::new(&program.filename));
                    let resolved = ModulePath::resolve(&specifier, importer.as_ref());
                    ctx.request_import(ImportRequest {
                        specifier,
                        resolved_path: resolved,
                        importer,
                    });
                    return Ok(RunSignal::NeedImports);
                }
                PlanStep::Stall => return Ok(RunSignal::Suspended),
                PlanStep::Yield => {
                    program.pc += 1;
                    return Ok(RunSignal::Continue);
                }
                PlanStep::Complete { value } => {
                    let result = complete_value(ctx, program, value.as_ref());
                    self.program = None;
                    return result;
                }
                PlanStep::Fail { message } => {
                    self.program = None;
                    return Ok(RunSignal::Failed(message));
                }
            }
        }
    }
}

/// Resolve a `complete` payload into the handle handed back to the host.
fn complete_value(
    ctx: &mut Context,
    program: &Program,
    value: Option<&Json>,
) -> Result<RunSignal, EngineError> {
    let Some(json) = value else {
        return Ok(RunSignal::Complete(None));
    };
    if let Some(var) = substitution(json) {
        return match program.vars.get(var) {
            Some(Binding::Settled(Some(handle))) => {
                ctx.store_mut()
                    .retain_owned(*handle)
                    .map_err(|err| EngineError::Transport(err.to_string()))?;
                Ok(RunSignal::Complete(Some(*handle)))
            }
            Some(Binding::Settled(None)) => Ok(RunSignal::Complete(None)),
            Some(Binding::Caught(message)) => {
                let handle = ctx.store_mut().string(message.clone());
                Ok(RunSignal::Complete(Some(handle)))
            }
            Some(Binding::Order(_)) => {
                Ok(RunSignal::Failed(format!("variable `{var}` was not awaited")))
            }
            None => Ok(RunSignal::Failed(format!("unknown variable `{var}`"))),
        };
    }
    let handle = ctx.store_mut().json_import(json);
    Ok(RunSignal::Complete(Some(handle)))
}

/// `{"$": "var"}` substitution form.
fn substitution(json: &Json) -> Option<&str> {
    let map = json.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("$")?.as_str()
}

/// Check whether a variable's order has settled, without committing
/// anything. Settled and caught bindings report their stored outcome.
fn check_var(
    ctx: &Context,
    program: &Program,
    var: &str,
) -> Result<Settle, EngineError> {
    let binding = program
        .vars
        .get(var)
        .ok_or_else(|| EngineError::Transport(format!("unknown variable `{var}`")))?;
    let id = match binding {
        Binding::Settled(value) => return Ok(Settle::Value(*value)),
        Binding::Caught(message) => return Ok(Settle::Rejected(message.clone())),
        Binding::Order(id) => *id,
    };
    let Some(answer) = ctx.order_answer(id) else {
        return Ok(Settle::NotYet);
    };
    let handle = match answer {
        OrderAnswer::Error(message) => return Ok(Settle::Rejected(message.clone())),
        OrderAnswer::Value(None) => return Ok(Settle::Value(None)),
        OrderAnswer::Value(Some(handle)) => *handle,
    };
    let kind = ctx
        .store()
        .kind_of(handle)
        .map_err(|err| EngineError::Transport(err.to_string()))?;
    if kind != Kind::Promise {
        return Ok(Settle::Value(Some(handle)));
    }
    let state = ctx
        .store()
        .promise_state(handle)
        .map_err(|err| EngineError::Transport(err.to_string()))?;
    Ok(match state {
        PromiseState::Pending { .. } => Settle::NotYet,
        PromiseState::Fulfilled { value } => Settle::Value(*value),
        PromiseState::Rejected { message } => Settle::Rejected(message.clone()),
    })
}
