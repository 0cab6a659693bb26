//! Driver integration tests
//!
//! Full drives through the scripted engine: order fan-out, promise
//! settlement, cancellation, console forwarding and failure modes. Timing
//! tests run on the paused tokio clock, so sleeps advance deterministically
//! and elapsed times are exact.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as Json};

use quayside::{
    Driver, DriverConfig, DriverError, DriverState, HandlerRegistry, MemorySink, OrderError,
    ProtocolViolation, ScriptedEngine,
};

/// Registry with a `wait` order: sleep `ms`, then settle with `ms`.
fn wait_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register("wait", |payload: Json| async move {
        let ms = payload
            .get("ms")
            .and_then(Json::as_u64)
            .ok_or_else(|| OrderError::InvalidField("ms".into()))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Some(json!(ms)))
    });
    registry.register("explode", |_payload| async {
        Err(OrderError::Failed("explode handler always fails".into()))
    });
    Arc::new(registry)
}

fn wait_driver() -> Driver<ScriptedEngine> {
    let mut driver = Driver::new(ScriptedEngine::new());
    driver.set_handlers(wait_registry());
    driver.set_sink(Arc::new(MemorySink::new()));
    driver
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_overlaps_order_latencies() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "first", "payload": { "type": "wait", "ms": 100 } },
        { "op": "await", "var": "first" },
        { "op": "order", "var": "a", "payload": { "type": "wait", "ms": 50 } },
        { "op": "order", "var": "b", "payload": { "type": "wait", "ms": 100 } },
        { "op": "order", "var": "c", "payload": { "type": "wait", "ms": 200 } },
        { "op": "await_all", "vars": ["a", "b", "c"] },
        { "op": "complete", "value": { "$": "c" } }
    ] }"#;

    let start = tokio::time::Instant::now();
    let result = driver.drive(plan, "/main.ts").await.unwrap();
    // Sequential execution would take 450ms; the fan-out overlaps the
    // three waits, so the whole drive is 100 + 200.
    assert_eq!(start.elapsed(), Duration::from_millis(300));

    let handle = result.unwrap();
    assert_eq!(driver.context().store().as_number(handle).unwrap(), 200.0);
    driver.context_mut().store_mut().release(handle).unwrap();

    assert_eq!(driver.state(), DriverState::Completed);
    assert_eq!(driver.stats().orders_dispatched(), 4);
    assert_eq!(driver.stats().orders_resolved(), 4);
    assert_eq!(driver.stats().orders_rejected(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_race_cancels_loser_and_discards_its_completion() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "fast", "payload": { "type": "wait", "ms": 50 } },
        { "op": "order", "var": "slow", "payload": { "type": "wait", "ms": 500 } },
        { "op": "race", "vars": ["fast", "slow"] },
        { "op": "order", "var": "tail", "payload": { "type": "wait", "ms": 1000 } },
        { "op": "await", "var": "tail" },
        { "op": "complete", "value": { "$": "fast" } }
    ] }"#;

    let result = driver.drive(plan, "/main.ts").await.unwrap();
    let handle = result.unwrap();
    assert_eq!(driver.context().store().as_number(handle).unwrap(), 50.0);
    driver.context_mut().store_mut().release(handle).unwrap();

    // The losing wait was cancelled, and its completion (landing while
    // `tail` kept the drive alive) was discarded.
    assert_eq!(driver.stats().orders_cancelled(), 1);
    assert_eq!(driver.stats().completions_discarded(), 1);
    assert_eq!(driver.stats().orders_dispatched(), 3);
    assert_eq!(driver.stats().orders_resolved(), 2);
}

#[tokio::test]
async fn test_every_dispatched_order_settles_exactly_once() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "a", "payload": { "type": "wait", "ms": 1 } },
        { "op": "order", "var": "b", "payload": { "type": "wait", "ms": 2 } },
        { "op": "order", "var": "bad", "payload": { "type": "explode" } },
        { "op": "await_all", "vars": ["a", "b"] },
        { "op": "await", "var": "bad", "catch": true },
        { "op": "complete" }
    ] }"#;

    driver.drive(plan, "/main.ts").await.unwrap();
    let stats = driver.stats();
    assert_eq!(stats.orders_dispatched(), 3);
    assert_eq!(stats.orders_resolved(), 2);
    assert_eq!(stats.orders_rejected(), 1);
    assert_eq!(
        stats.orders_dispatched(),
        stats.orders_resolved() + stats.orders_rejected()
    );
}

#[tokio::test]
async fn test_uncaught_rejection_fails_the_drive() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "bad", "payload": { "type": "explode" } },
        { "op": "await", "var": "bad" },
        { "op": "complete" }
    ] }"#;

    let err = driver.drive(plan, "/main.ts").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Runtime(ref message) if message == "explode handler always fails"
    ));
    assert_eq!(driver.state(), DriverState::Failed);
}

#[tokio::test]
async fn test_caught_rejection_completes_with_message() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "bad", "payload": { "type": "explode" } },
        { "op": "await", "var": "bad", "catch": true },
        { "op": "complete", "value": { "$": "bad" } }
    ] }"#;

    let result = driver.drive(plan, "/main.ts").await.unwrap();
    let handle = result.unwrap();
    assert_eq!(
        driver.context().store().as_str(handle).unwrap(),
        Some("explode handler always fails")
    );
    driver.context_mut().store_mut().release(handle).unwrap();
}

#[tokio::test]
async fn test_tag_resolution_failures_reject_like_any_order() {
    // No `type` field and an unknown type both surface as rejections the
    // guest can catch, not as driver errors.
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "untyped", "payload": { "ms": 1 } },
        { "op": "order", "var": "unknown", "payload": { "type": "teleport" } },
        { "op": "await", "var": "untyped", "catch": true },
        { "op": "await", "var": "unknown", "catch": true },
        { "op": "complete", "value": { "$": "unknown" } }
    ] }"#;

    let result = driver.drive(plan, "/main.ts").await.unwrap();
    assert_eq!(driver.stats().orders_rejected(), 2);
    let handle = result.unwrap();
    assert_eq!(
        driver.context().store().as_str(handle).unwrap(),
        Some("no handler registered for order type `teleport`")
    );
    driver.context_mut().store_mut().release(handle).unwrap();
}

#[tokio::test]
async fn test_console_forwarded_once_in_emission_order() {
    let sink = Arc::new(MemorySink::new());
    let mut driver = wait_driver();
    driver.set_sink(sink.clone());

    let plan = r#"{ "steps": [
        { "op": "console", "message": "before" },
        { "op": "order", "var": "w", "payload": { "type": "wait", "ms": 1 } },
        { "op": "await", "var": "w" },
        { "op": "console", "level": "warn", "message": "after" },
        { "op": "complete" }
    ] }"#;

    driver.drive(plan, "/main.ts").await.unwrap();
    let entries = sink.take();
    let lines: Vec<_> = entries
        .iter()
        .map(|e| (e.level.as_str(), e.message.as_str()))
        .collect();
    assert_eq!(lines, vec![("log", "before"), ("warn", "after")]);
}

#[tokio::test]
async fn test_guest_failure_reports_error_not_panic() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [ { "op": "fail", "message": "deliberate" } ] }"#;
    let err = driver.drive(plan, "/main.ts").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Runtime(ref message) if message == "deliberate"
    ));
}

#[tokio::test]
async fn test_yield_steps_are_counted() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "yield" },
        { "op": "yield" },
        { "op": "complete" }
    ] }"#;
    driver.drive(plan, "/main.ts").await.unwrap();
    // Two voluntary yields plus the completing step.
    assert_eq!(driver.stats().runs(), 3);
}

#[tokio::test]
async fn test_values_survive_across_drives() {
    let mut driver = wait_driver();
    let result = driver
        .drive(
            r#"{ "steps": [ { "op": "complete", "value": { "kept": true } } ] }"#,
            "/main.ts",
        )
        .await
        .unwrap();
    let kept = result.unwrap();

    // A second drive on the same driver must not invalidate the handle.
    driver
        .drive(r#"{ "steps": [ { "op": "complete" } ] }"#, "/again.ts")
        .await
        .unwrap();

    let flag = driver.context_mut().store_mut().get(kept, "kept").unwrap();
    assert_eq!(driver.context().store().as_bool(flag).unwrap(), Some(true));
    let store = driver.context_mut().store_mut();
    store.release(flag).unwrap();
    store.release(kept).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trailing_work_does_not_block_completion() {
    let mut driver = wait_driver();
    let plan = r#"{ "steps": [
        { "op": "order", "var": "slow", "payload": { "type": "wait", "ms": 60000 } },
        { "op": "order", "var": "quick", "payload": { "type": "wait", "ms": 1 } },
        { "op": "await", "var": "quick" },
        { "op": "complete", "value": { "$": "quick" } }
    ] }"#;

    let start = tokio::time::Instant::now();
    let result = driver.drive(plan, "/main.ts").await.unwrap();
    // The drive ends when the program completes, not when the ignored
    // minute-long order does.
    assert_eq!(start.elapsed(), Duration::from_millis(1));
    let handle = result.unwrap();
    driver.context_mut().store_mut().release(handle).unwrap();
    assert_eq!(driver.stats().orders_resolved(), 1);
}

#[tokio::test]
async fn test_config_is_carried() {
    let driver = Driver::with_config(
        ScriptedEngine::new(),
        DriverConfig {
            max_import_rounds: 7,
            trace_steps: true,
        },
    );
    assert_eq!(driver.config().max_import_rounds, 7);
    assert!(driver.config().trace_steps);
    assert_eq!(driver.state(), DriverState::Ready);
}

#[tokio::test]
async fn test_empty_import_round_is_a_violation() {
    use quayside::{Context, Engine, EngineError, ParseError, RunSignal};

    // An engine that claims to need imports without requesting any.
    struct Liar;
    impl Engine for Liar {
        fn prepare(
            &mut self,
            _ctx: &mut Context,
            _source: &str,
            _filename: &str,
        ) -> Result<(), ParseError> {
            Ok(())
        }
        fn run(
            &mut self,
            _ctx: &mut Context,
        ) -> Result<RunSignal, EngineError> {
            Ok(RunSignal::NeedImports)
        }
    }

    let mut driver = Driver::new(Liar);
    let err = driver.drive("", "/main.ts").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Protocol(ProtocolViolation::EmptyImportRound)
    ));
}

#[tokio::test]
async fn test_done_mid_drive_is_a_violation() {
    use quayside::{Context, Engine, EngineError, ParseError, RunSignal};

    struct Quitter;
    impl Engine for Quitter {
        fn prepare(
            &mut self,
            _ctx: &mut Context,
            _source: &str,
            _filename: &str,
        ) -> Result<(), ParseError> {
            Ok(())
        }
        fn run(
            &mut self,
            _ctx: &mut Context,
        ) -> Result<RunSignal, EngineError> {
            Ok(RunSignal::Done)
        }
    }

    let mut driver = Driver::new(Quitter);
    let err = driver.drive("", "/main.ts").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Protocol(ProtocolViolation::UnexpectedDone)
    ));
}
