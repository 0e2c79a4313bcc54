//! Tests for the script exchange against small hand-written guests.

use std::sync::Arc;

use crate::config::DecodeMode;
use crate::config::EvalConfig;
use crate::error::Error;
use crate::exchange::guest_failure;
use crate::instance::GuestInstance;
use crate::runtime::Runtime;

/// Echo guest: the script region doubles as the result.
const ECHO: &str = r#"
(module
    (memory (export "memory") 1)
    (global $script (mut i32) (i32.const 0))
    (func (export "allocate_script") (param $len i32) (result i32)
        ;; Scripts longer than 64 bytes get no room.
        (if (i32.gt_u (local.get $len) (i32.const 64))
            (then (return (i32.const 0))))
        (global.set $script (i32.const 1024))
        (i32.const 1024))
    (func (export "run_js") (result i32)
        (global.get $script))
)
"#;

async fn instance(wat: &str, config: EvalConfig) -> GuestInstance {
    let runtime = Arc::new(Runtime::new().expect("Failed to create runtime"));
    let bytes = wat::parse_str(wat).expect("Failed to parse wat");
    let id = runtime.register_module(&bytes).expect("Failed to register module");
    runtime
        .instantiate(id)
        .expect("Failed to find module")
        .config(config)
        .build()
        .await
        .expect("Failed to build instance")
}

fn returning(body: &str) -> String {
    format!(
        r#"
        (module
            (memory (export "memory") 1)
            (data (i32.const 2048) "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
            (data (i32.const 4096) "\ff\fe ok")
            (func (export "allocate_script") (param i32) (result i32) (i32.const 1024))
            (func (export "run_js") (result i32) {})
        )
        "#,
        body
    )
}

#[tokio::test]
async fn test_echo_returns_script() {
    let guest = instance(ECHO, EvalConfig::default()).await;
    assert_eq!(guest.evaluate("hello").await.expect("Failed to evaluate"), "hello");
    assert_eq!(guest.evaluate("é ✓").await.expect("Failed to evaluate"), "é ✓");
    assert_eq!(guest.evaluations().await, 2);
}

#[tokio::test]
async fn test_shorter_script_after_longer_one() {
    // The terminator written after each script hides the longer leftover.
    let guest = instance(ECHO, EvalConfig::default()).await;
    guest.evaluate("a much longer script").await.expect("Failed to evaluate");
    assert_eq!(guest.evaluate("short").await.expect("Failed to evaluate"), "short");
}

#[tokio::test]
async fn test_allocator_null_is_graceful() {
    let guest = instance(ECHO, EvalConfig::default()).await;
    let err = guest.evaluate(&"x".repeat(65)).await.unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { requested: 65 }));
    assert!(!guest.is_poisoned().await);
    assert_eq!(guest.evaluate("ok").await.expect("Failed to evaluate"), "ok");
}

#[tokio::test]
async fn test_allocator_trap_poisons() {
    let guest = instance(
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "allocate_script") (param i32) (result i32) unreachable)
            (func (export "run_js") (result i32) (i32.const 16))
        )
        "#,
        EvalConfig::default(),
    )
    .await;

    let err = guest.evaluate("1").await.unwrap_err();
    assert!(matches!(err, Error::AllocationFailed { requested: 1 }));
    assert!(guest.is_poisoned().await);

    let err = guest.evaluate("1").await.unwrap_err();
    assert!(matches!(err, Error::InstancePoisoned(id) if id == guest.id()));
}

#[tokio::test]
async fn test_script_region_past_memory_end() {
    let guest = instance(
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "allocate_script") (param i32) (result i32) (i32.const 65534))
            (func (export "run_js") (result i32) (i32.const 16))
        )
        "#,
        EvalConfig::default(),
    )
    .await;

    // "a" plus its terminator fits exactly; "ab" plus terminator does not.
    guest.evaluate("a").await.expect("Failed to evaluate");
    let err = guest.evaluate("ab").await.unwrap_err();
    assert!(matches!(
        err,
        Error::OutOfBoundsAccess { offset: 65534, len: 3, memory_size: 65536 }
    ));
    assert!(guest.is_poisoned().await);
}

#[tokio::test]
async fn test_null_result_is_graceful() {
    let guest = instance(&returning("(i32.const 0)"), EvalConfig::default()).await;
    let err = guest.evaluate("throw 1").await.unwrap_err();
    assert!(matches!(err, Error::EvaluationTrap(_)));
    assert!(!guest.is_poisoned().await);
}

#[tokio::test]
async fn test_result_offset_out_of_bounds_poisons() {
    let guest = instance(&returning("(i32.const -1)"), EvalConfig::default()).await;
    let err = guest.evaluate("1").await.unwrap_err();
    assert!(matches!(err, Error::OutOfBoundsAccess { offset: 4294967295, .. }));
    assert!(guest.is_poisoned().await);
}

#[tokio::test]
async fn test_scan_cap_bounds_result() {
    let body = "(i32.const 2048)";

    let guest = instance(&returning(body), EvalConfig::default()).await;
    assert_eq!(guest.evaluate("").await.expect("Failed to evaluate"), "A".repeat(32));

    let guest = instance(&returning(body), EvalConfig::default().max_result_len(16)).await;
    let err = guest.evaluate("").await.unwrap_err();
    assert!(matches!(err, Error::UnterminatedResult { offset: 2048, scanned: 17 }));
    assert!(guest.is_poisoned().await);
}

#[tokio::test]
async fn test_result_exactly_at_scan_cap() {
    let body = "(i32.const 2048)";

    let guest = instance(&returning(body), EvalConfig::default().max_result_len(32)).await;
    assert_eq!(guest.evaluate("").await.expect("Failed to evaluate"), "A".repeat(32));

    let guest = instance(&returning(body), EvalConfig::default().max_result_len(31)).await;
    let err = guest.evaluate("").await.unwrap_err();
    assert!(matches!(err, Error::UnterminatedResult { offset: 2048, scanned: 32 }));
}

#[tokio::test]
async fn test_strict_and_lossy_decoding() {
    let body = "(i32.const 4096)";

    let guest = instance(&returning(body), EvalConfig::default()).await;
    let err = guest.evaluate("").await.unwrap_err();
    assert!(matches!(err, Error::InvalidEncoding { valid_up_to: 0 }));
    assert!(!guest.is_poisoned().await);

    let guest = instance(&returning(body), EvalConfig::default().decode(DecodeMode::Lossy)).await;
    assert_eq!(
        guest.evaluate("").await.expect("Failed to evaluate"),
        "\u{FFFD}\u{FFFD} ok"
    );
}

#[tokio::test]
async fn test_eval_trap_names_the_trap() {
    let guest = instance(&returning("unreachable"), EvalConfig::default()).await;
    match guest.evaluate("1").await {
        Err(Error::EvaluationTrap(msg)) => assert!(msg.contains("unreachable"), "{}", msg),
        other => panic!("expected EvaluationTrap, got {:?}", other),
    }
    assert!(guest.is_poisoned().await);
}

#[test]
fn test_guest_failure_ignores_plain_errors() {
    assert!(guest_failure(&wasmtime::Error::msg("linker failed")).is_none());
    let exit = wasmtime::Error::new(wasmtime_wasi::I32Exit(3));
    assert_eq!(guest_failure(&exit).as_deref(), Some("guest exited with status 3"));
}
