//! Module loading integration tests
//!
//! Two-phase loading through the driver: batched import rounds, relative
//! specifier resolution, idempotent provides across drives, the round cap
//! and directory-backed loaders.

use quayside::{
    DirModules, Driver, DriverConfig, DriverError, ModulePath, ProtocolViolation, ScriptedEngine,
    StaticModules,
};

fn lib_modules() -> StaticModules {
    [
        ("/lib/math.ts", "export const PI = 3.14159;"),
        ("/lib/utils.ts", "export function id(x) { return x; }"),
        ("/shared/util.ts", "export const ORIGIN = [0, 0];"),
    ]
    .into_iter()
    .collect()
}

fn module_driver() -> Driver<ScriptedEngine> {
    let mut driver = Driver::new(ScriptedEngine::new());
    driver.set_loader(lib_modules());
    driver
}

#[tokio::test]
async fn test_consecutive_imports_batch_into_one_round() {
    let mut driver = module_driver();
    let plan = r#"{ "steps": [
        { "op": "import", "specifier": "./lib/math.ts" },
        { "op": "import", "specifier": "./lib/utils.ts" },
        { "op": "console", "message": "loaded" },
        { "op": "import", "specifier": "./shared/util.ts" },
        { "op": "complete", "value": 1 }
    ] }"#;

    let result = driver.drive(plan, "/main.ts").await.unwrap();
    let handle = result.unwrap();
    driver.context_mut().store_mut().release(handle).unwrap();

    // The two adjacent imports travel in one round; the one after the
    // console step needs its own.
    assert_eq!(driver.stats().import_rounds(), 2);
    assert_eq!(driver.context().modules_provided(), 3);
}

#[tokio::test]
async fn test_relative_specifiers_resolve_against_importer() {
    let mut driver = module_driver();
    // `from` stands in for the module the import appears in.
    let plan = r#"{ "steps": [
        { "op": "import", "specifier": "./lib/math.ts" },
        { "op": "import", "specifier": "../shared/util.ts", "from": "/lib/math.ts" },
        { "op": "complete" }
    ] }"#;

    driver.drive(plan, "/main.ts").await.unwrap();
    let provided = ModulePath::new("/shared/util.ts");
    assert!(driver.context().module_provided(&provided));
}

#[tokio::test]
async fn test_unknown_module_fails_the_drive() {
    let mut driver = Driver::new(ScriptedEngine::new());
    let plan = r#"{ "steps": [
        { "op": "import", "specifier": "./lib/missing.ts" },
        { "op": "complete" }
    ] }"#;

    let err = driver.drive(plan, "/main.ts").await.unwrap_err();
    match err {
        DriverError::UnknownModule { specifier, resolved } => {
            assert_eq!(specifier, "./lib/missing.ts");
            assert_eq!(resolved.as_str(), "/lib/missing.ts");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_rerequesting_provided_module_hits_the_round_cap() {
    let mut driver = Driver::with_config(
        ScriptedEngine::new(),
        DriverConfig {
            max_import_rounds: 2,
            trace_steps: false,
        },
    );
    driver.set_loader(lib_modules());

    // The plan never stops asking for a module it already has.
    let plan = r#"{ "steps": [
        { "op": "import_loop", "specifier": "./lib/math.ts" }
    ] }"#;

    let err = driver.drive(plan, "/main.ts").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Protocol(ProtocolViolation::ImportRoundsExceeded { cap: 2 })
    ));
}

#[tokio::test]
async fn test_modules_persist_across_drives() {
    let mut driver = module_driver();
    let plan = r#"{ "steps": [
        { "op": "import", "specifier": "./lib/math.ts" },
        { "op": "complete" }
    ] }"#;

    driver.drive(plan, "/main.ts").await.unwrap();
    assert_eq!(driver.stats().import_rounds(), 1);

    // Second drive: the module is already provided, so the import
    // advances without a round trip to the loader.
    driver.drive(plan, "/main.ts").await.unwrap();
    assert_eq!(driver.stats().import_rounds(), 0);
    assert_eq!(driver.context().modules_provided(), 1);
}

#[tokio::test]
async fn test_dir_modules_back_a_drive() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib");
    std::fs::create_dir_all(&lib).unwrap();
    std::fs::write(lib.join("math.ts"), "export const PI = 3;").unwrap();

    let mut driver = Driver::new(ScriptedEngine::new());
    driver.set_loader(DirModules::index(dir.path()).unwrap());

    let plan = r#"{ "steps": [
        { "op": "import", "specifier": "./lib/math.ts" },
        { "op": "complete", "value": "ok" }
    ] }"#;

    let result = driver.drive(plan, "/main.ts").await.unwrap();
    let handle = result.unwrap();
    driver.context_mut().store_mut().release(handle).unwrap();

    let provided = ModulePath::new("/lib/math.ts");
    assert_eq!(
        driver.context().module_source(&provided),
        Some("export const PI = 3;")
    );
}
