//! Integration tests for the evalrun runtime.

use std::sync::Arc;

use rand::Rng;

use evalrun::Runtime;
use evalrun::StubTable;
use evalrun::source::EmbeddedSource;
use evalrun::source::FileSource;

/// Helper to load guest fixtures.
fn wasm(name: &str) -> Vec<u8> {
    let path = format!("tests/fixtures/{}.wat", name);
    wat::parse_file(&path).unwrap_or_else(|e| panic!("Could not compile fixture {}: {}", path, e))
}

fn runtime() -> Arc<Runtime> {
    Arc::new(Runtime::new().expect("Failed to create runtime"))
}

/// A random NUL-free UTF-8 string of at most `max_bytes` bytes.
fn random_script(rng: &mut impl Rng, max_bytes: usize) -> String {
    let target = rng.gen_range(0..=max_bytes);
    let mut script = String::new();
    while script.len() < target {
        let c: char = rng.r#gen();
        if c == '\0' || script.len() + c.len_utf8() > target {
            continue;
        }
        script.push(c);
    }
    script
}

// --- Test 1: Basic Runtime Creation ---

#[tokio::test]
async fn test_runtime_creation() {
    let rt = Runtime::new().expect("Failed to create runtime");
    assert_eq!(rt.instance_count(), 0);
    assert_eq!(rt.module_count(), 0);
}

// --- Test 2: Module Registration ---

#[tokio::test]
async fn test_module_registration() {
    let rt = runtime();
    let id = rt.register_module(&wasm("echo")).expect("Failed to register module");
    let module = rt.get_module(id).expect("Failed to get module");
    assert_eq!(module.ledger().imports.len(), 4);
    assert_eq!(module.bytes(), wasm("echo").as_slice());
}

// --- Test 3: Load and Evaluate ---

#[tokio::test]
async fn test_load_and_evaluate() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("echo"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load echo guest");

    assert_eq!(guest.evaluate("print('hi')").await.expect("Failed to evaluate"), "print('hi')");
    assert_eq!(rt.instance_count(), 1);
}

// --- Test 4: Randomized Round-Trip ---

#[tokio::test]
async fn test_round_trip_random_scripts() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("echo"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load echo guest");

    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let script = random_script(&mut rng, 4096);
        let result = guest.evaluate(&script).await.expect("Failed to evaluate");
        assert_eq!(result, script);
    }
    assert!(!guest.is_poisoned().await);
}

// --- Test 5: Idempotent Load ---

#[tokio::test]
async fn test_two_instances_agree() {
    let rt = runtime();
    let bytes = wasm("adder");
    let a = rt.load(&bytes, StubTable::wasi_preview1()).await.expect("Failed to load first");
    let b = rt.load(&bytes, StubTable::wasi_preview1()).await.expect("Failed to load second");
    assert_ne!(a.id(), b.id());

    for script in ["1+1", "12+30", "7", "0+0+0+5"] {
        let ra = a.evaluate(script).await.expect("Failed to evaluate");
        let rb = b.evaluate(script).await.expect("Failed to evaluate");
        assert_eq!(ra, rb);
    }
}

// --- Test 6: Arithmetic Guest ---

#[tokio::test]
async fn test_arithmetic_guest() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("adder"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load adder guest");

    assert_eq!(guest.evaluate("1+1").await.expect("Failed to evaluate"), "2");
    assert_eq!(guest.evaluate("40+2").await.expect("Failed to evaluate"), "42");
    // An empty script is a valid (if pointless) program.
    assert_eq!(guest.evaluate("").await.expect("Failed to evaluate"), "0");
}

// --- Test 7: Capacity Boundary ---

#[tokio::test]
async fn test_capacity_boundary() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("echo"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load echo guest");

    let full = "x".repeat(4096);
    assert_eq!(guest.evaluate(&full).await.expect("Failed to evaluate"), full);

    let over = "x".repeat(4097);
    let err = guest.evaluate(&over).await.unwrap_err();
    assert!(matches!(err, evalrun::Error::AllocationFailed { requested: 4097 }));

    // Allocation failures leave the instance usable.
    assert_eq!(guest.evaluate("still here").await.expect("Failed to evaluate"), "still here");
}

// --- Test 8: Registry Release ---

#[tokio::test]
async fn test_release_instance() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("echo"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load echo guest");
    let id = guest.id();

    assert!(rt.get_instance(id).is_ok());
    rt.release_instance(id).expect("Failed to release instance");
    assert_eq!(rt.instance_count(), 0);
    assert!(matches!(rt.get_instance(id), Err(evalrun::Error::InstanceNotFound(_))));
    assert!(matches!(rt.release_instance(id), Err(evalrun::Error::InstanceNotFound(_))));

    // The caller's handle keeps the instance alive.
    assert_eq!(guest.evaluate("after").await.expect("Failed to evaluate"), "after");
}

// --- Test 9: Module Sources ---

#[tokio::test]
async fn test_register_from_sources() -> anyhow::Result<()> {
    let rt = runtime();

    let dir = std::env::temp_dir().join(format!("evalrun-source-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("adder.wasm");
    std::fs::write(&path, wasm("adder"))?;

    let from_file = rt.register_source(&FileSource::new(&path)).await?;

    let bytes: &'static [u8] = Box::leak(wasm("echo").into_boxed_slice());
    let from_memory = rt.register_source(&EmbeddedSource::new("echo", bytes)).await?;

    assert_ne!(from_file, from_memory);
    assert_eq!(rt.module_count(), 2);

    let guest = rt.instantiate(from_file)?.build().await?;
    assert_eq!(guest.evaluate("2+2").await?, "4");

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

// --- Test 10: Parallel Instances ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_instances() {
    let rt = runtime();
    let bytes = wasm("adder");

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let rt = Arc::clone(&rt);
        let bytes = bytes.clone();
        tasks.push(tokio::spawn(async move {
            let guest = rt
                .load(&bytes, StubTable::wasi_preview1())
                .await
                .expect("Failed to load adder guest");
            let mut results = Vec::new();
            for j in 0..20u32 {
                let out = guest
                    .evaluate(&format!("{}+{}", i, j))
                    .await
                    .expect("Failed to evaluate");
                results.push((i + j, out));
            }
            results
        }));
    }

    for task in tasks {
        for (expected, out) in task.await.expect("Task panicked") {
            assert_eq!(out, expected.to_string());
        }
    }
    assert_eq!(rt.instance_count(), 8);
}

// --- Test 11: Concurrent Calls On One Instance ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_are_serialized() {
    let rt = runtime();
    let guest = rt
        .load(&wasm("echo"), StubTable::wasi_preview1())
        .await
        .expect("Failed to load echo guest");

    // Every script shares the same scratch region; interleaving would mix them.
    let mut tasks = Vec::new();
    for i in 0..16 {
        let guest = guest.clone();
        tasks.push(tokio::spawn(async move {
            let script = format!("task-{}-{}", i, "y".repeat(i * 37));
            let out = guest.evaluate(&script).await.expect("Failed to evaluate");
            assert_eq!(out, script);
        }));
    }
    for task in tasks {
        task.await.expect("Task panicked");
    }
    assert_eq!(guest.evaluations().await, 16);
}
