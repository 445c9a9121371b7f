//! End-to-end behaviour of the engine through its public API
//!
//! Covers the externally visible contract: creation, message context,
//! fault handling, timeouts, view isolation, duplicates, replay determinism
//! and persistence.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::json;
use spire_core::{
    Dispatcher, EngineConfig, Fault, JsonFileStore, Receipt, ReplayConfig, Replayer, StateStore,
    Value, ViewResponse,
};
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(format!("../../tests/fixtures/{}", path))
}

fn json_value(v: serde_json::Value) -> Value {
    Value::from_json(&v)
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(EngineConfig::default())
}

fn create(d: &mut Dispatcher, id: &str, program: &str) -> Receipt {
    d.create(id, program, Value::empty_object(), "alice", &Value::Null, 1)
}

fn transact(d: &mut Dispatcher, id: &str) -> Receipt {
    d.transact(id, "func", Value::Null, "bob", &Value::Null, 2)
}

fn storage(d: &Dispatcher, id: &str) -> Value {
    d.registry().lookup(id).unwrap().storage.clone()
}

fn provisioned(d: &Dispatcher, id: &str) -> bool {
    d.registry().lookup(id).unwrap().provisioned
}

fn replay_config() -> ReplayConfig {
    ReplayConfig {
        start_block: 1,
        ..ReplayConfig::default()
    }
}

// ── Creation ──────────────────────────────────────────────

#[test]
fn test_creation_commits_init_result() {
    let mut d = dispatcher();
    assert_eq!(create(&mut d, "test", "return 'storage';"), Receipt::Created);
    assert_eq!(storage(&d, "test"), Value::from("storage"));
    assert!(provisioned(&d, "test"));
}

#[test]
fn test_duplicate_creation_keeps_first_entry() {
    let mut d = dispatcher();
    create(&mut d, "test", "return 'first';");
    assert_eq!(create(&mut d, "test", "return 'second';"), Receipt::Duplicate);
    assert_eq!(storage(&d, "test"), Value::from("first"));
    assert_eq!(d.registry().lookup("test").unwrap().program, "return 'first';");
}

#[test]
fn test_failed_init_deprovisions() {
    let mut d = dispatcher();
    let receipt = create(&mut d, "bad", "return (;");
    assert!(matches!(receipt, Receipt::CreateFaulted(Fault::Syntax(_))));
    assert!(!provisioned(&d, "bad"));
    assert_eq!(storage(&d, "bad"), Value::empty_object());
}

// ── Message context ───────────────────────────────────────

#[test]
fn test_transaction_context_is_observed_exactly() {
    let mut d = dispatcher();
    create(&mut d, "ctx", "if (msg.type == 'init') return null; return msg;");
    let args = json_value(json!(["arg1", "arg2"]));
    let receipt = d.transact("ctx", "func", args, "alice", &Value::from("block-here"), 50);
    assert_eq!(receipt, Receipt::Committed);
    assert_eq!(
        storage(&d, "ctx"),
        json_value(json!({
            "type": "transaction",
            "func": "func",
            "args": ["arg1", "arg2"],
            "sender": "alice",
            "block": "block-here",
            "blockNumber": 50
        }))
    );
}

#[test]
fn test_init_context() {
    let mut d = dispatcher();
    d.create("init", "return msg;", json_value(json!({"x": 1})), "carol", &Value::Integer(9), 7);
    assert_eq!(
        storage(&d, "init"),
        json_value(json!({
            "type": "init",
            "func": "",
            "args": {"x": 1},
            "sender": "carol",
            "block": 9,
            "blockNumber": 7
        }))
    );
}

// ── Faults ────────────────────────────────────────────────

#[test]
fn test_fault_deprovisions_and_keeps_storage() {
    let mut d = dispatcher();
    create(&mut d, "f", "if (msg.type == 'init') return {kept: true}; storage.kept = false; throw 'error';");
    assert!(matches!(transact(&mut d, "f"), Receipt::Deprovisioned(Fault::Thrown(_))));
    assert!(!provisioned(&d, "f"));
    assert_eq!(storage(&d, "f"), json_value(json!({"kept": true})));
}

#[test]
fn test_timeout_deprovisions_without_blocking() {
    let mut d = Dispatcher::new(EngineConfig {
        timeout_ms: 100,
        fuel: u64::MAX,
        ..EngineConfig::default()
    });
    create(&mut d, "spin", "if (msg.type == 'init') return {n: 1}; while (true) { storage.n += 1; }");
    let start = Instant::now();
    assert_eq!(transact(&mut d, "spin"), Receipt::Deprovisioned(Fault::Timeout));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!provisioned(&d, "spin"));
    assert_eq!(storage(&d, "spin"), json_value(json!({"n": 1})));
}

#[test]
fn test_deprovisioned_rejects_transacts() {
    let mut d = dispatcher();
    create(&mut d, "once", "if (msg.type == 'init') return {n: 0}; if (msg.func == 'boom') throw 'x'; storage.n += 1; return storage;");
    d.transact("once", "boom", Value::Null, "bob", &Value::Null, 2);
    let frozen = storage(&d, "once");
    assert_eq!(d.transact("once", "inc", Value::Null, "bob", &Value::Null, 3), Receipt::Ignored);
    assert_eq!(storage(&d, "once"), frozen);
}

#[test]
fn test_transact_to_unknown_is_ignored() {
    let mut d = dispatcher();
    assert_eq!(transact(&mut d, "ghost"), Receipt::Ignored);
    assert!(d.registry().is_empty());
}

// ── Views ─────────────────────────────────────────────────

#[test]
fn test_view_is_read_only() {
    let mut d = dispatcher();
    create(&mut d, "v", "if (msg.type == 'init') return {n: 1}; if (msg.type == 'view') { storage.n = 100; return storage.n * 2; } return storage;");
    assert_eq!(d.view("v", "double", Value::Null), ViewResponse::Result(Value::Integer(200)));
    assert_eq!(storage(&d, "v"), json_value(json!({"n": 1})));
    assert!(provisioned(&d, "v"));
}

#[test]
fn test_view_nonexistent() {
    let d = dispatcher();
    assert_eq!(
        serde_json::to_value(d.view("nope", "f", Value::Null)).unwrap(),
        json!({"error": "NonexistentDappError"})
    );
}

#[test]
fn test_view_execution_error() {
    let mut d = dispatcher();
    create(&mut d, "v", "if (msg.type == 'view') return now(); return {};");
    assert_eq!(
        serde_json::to_value(d.view("v", "f", Value::Null)).unwrap(),
        json!({"error": "ExecutionError"})
    );
    assert!(provisioned(&d, "v"));
}

// ── Sandbox ───────────────────────────────────────────────

#[test]
fn test_forbidden_capabilities_fault_in_sandbox() {
    let mut d = dispatcher();
    for (id, program) in [("a", "return now();"), ("b", "return env('HOME');"), ("c", "require('fs');")] {
        assert!(matches!(create(&mut d, id, program), Receipt::CreateFaulted(Fault::Forbidden(_))));
    }
}

#[test]
fn test_capabilities_available_without_sandbox() {
    let mut d = Dispatcher::new(EngineConfig {
        sandboxed: false,
        ..EngineConfig::default()
    });
    assert_eq!(create(&mut d, "a", "print('created'); return typeOf(now());"), Receipt::Created);
    assert_eq!(storage(&d, "a"), Value::from("integer"));
}

// ── Hostile programs ──────────────────────────────────────

#[test]
fn test_long_operator_chain_faults_as_syntax() {
    let mut d = dispatcher();
    let program = format!("return 0{}", "+1".repeat(100_000));
    assert!(matches!(create(&mut d, "chain", &program), Receipt::CreateFaulted(Fault::Syntax(_))));

    let program = format!("return 0{}", "+1".repeat(20_000));
    assert!(matches!(create(&mut d, "chain2", &program), Receipt::CreateFaulted(Fault::Syntax(_))));
    assert!(!provisioned(&d, "chain2"));
}

#[test]
fn test_long_member_chain_faults_as_syntax() {
    let mut d = dispatcher();
    let program = format!("return msg{}", ".a".repeat(100_000));
    assert!(matches!(create(&mut d, "members", &program), Receipt::CreateFaulted(Fault::Syntax(_))));

    let program = format!("return msg{}", ".a".repeat(10_000));
    assert!(matches!(create(&mut d, "members2", &program), Receipt::CreateFaulted(Fault::Syntax(_))));

    let program = format!("return storage{}", "[0]".repeat(10_000));
    assert!(matches!(create(&mut d, "index", &program), Receipt::CreateFaulted(Fault::Syntax(_))));
}

#[test]
fn test_oversized_program_faults_as_syntax() {
    let mut d = dispatcher();
    let program = format!("return 1;{}", " ".repeat(200_000));
    assert!(matches!(create(&mut d, "huge", &program), Receipt::CreateFaulted(Fault::Syntax(_))));
}

#[test]
fn test_non_finite_numbers_never_commit() {
    let mut d = dispatcher();
    assert!(matches!(
        create(&mut d, "inf", "return {x: 1e999};"),
        Receipt::CreateFaulted(Fault::Syntax(_))
    ));
    assert!(matches!(
        create(&mut d, "mul", "return {x: 1e308 * 10};"),
        Receipt::CreateFaulted(Fault::Runtime(_))
    ));
    assert_eq!(storage(&d, "inf"), Value::empty_object());
}

#[test]
fn test_saved_state_matches_live_state() {
    let mut d = dispatcher();
    create(
        &mut d,
        "num",
        "if (msg.type == 'view') return storage.x > 1; return {x: 1.5, y: [0.25, -2]};",
    );
    create(&mut d, "inf", "return {x: 1e999};");
    let live_view = d.view("num", "big", Value::Null);
    assert_eq!(live_view, ViewResponse::Result(Value::Boolean(true)));

    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("state.json"));
    store.save(&d.registry().snapshot(1)).unwrap();
    let (registry, cursor) = spire_core::Registry::restore(store.load().unwrap().unwrap());
    assert_eq!(cursor, 1);

    let restored = Dispatcher::with_registry(EngineConfig::default(), registry);
    assert_eq!(restored.registry(), d.registry());
    assert_eq!(
        restored.registry().state_digest().unwrap(),
        d.registry().state_digest().unwrap()
    );
    assert_eq!(restored.view("num", "big", Value::Null), live_view);
}

// ── Replay & persistence ──────────────────────────────────

fn replay_fixture(state: PathBuf) -> (Dispatcher, JsonFileStore) {
    let feed = BufReader::new(File::open(fixture("feeds/counter.jsonl")).unwrap());
    let mut replayer =
        Replayer::open(EngineConfig::default(), replay_config(), JsonFileStore::new(state)).unwrap();
    replayer.replay(feed).unwrap();
    replayer.into_parts()
}

#[test]
fn test_replay_fixture_final_state() {
    let dir = TempDir::new().unwrap();
    let (d, _) = replay_fixture(dir.path().join("state.json"));
    assert_eq!(
        storage(&d, "counter"),
        json_value(json!({
            "owner": "alice",
            "count": 6,
            "history": [{"who": "bob", "block": 2}, {"who": "carol", "block": 3}]
        }))
    );
    assert!(!provisioned(&d, "fragile"));
    assert_eq!(d.view("counter", "count", Value::Null), ViewResponse::Result(Value::Integer(6)));
}

#[test]
fn test_replay_determinism_same_digest() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let (a, _) = replay_fixture(first.path().join("state.json"));
    let (b, _) = replay_fixture(second.path().join("state.json"));
    assert_eq!(a.registry().state_digest().unwrap(), b.registry().state_digest().unwrap());
}

#[test]
fn test_persistence_round_trip() {
    let dir = TempDir::new().unwrap();
    let (d, store) = replay_fixture(dir.path().join("state.json"));
    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.cursor, 3);
    assert_eq!(snapshot, d.registry().snapshot(3));

    let resumed =
        Replayer::open(EngineConfig::default(), replay_config(), JsonFileStore::new(store.path())).unwrap();
    assert_eq!(resumed.cursor(), 3);
    assert_eq!(
        resumed.dispatcher().registry().state_digest().unwrap(),
        d.registry().state_digest().unwrap()
    );
}

#[test]
fn test_replay_determinism_100_iterations() {
    let feed = std::fs::read_to_string(fixture("feeds/counter.jsonl")).unwrap();
    let digest = || {
        let mut replayer =
            Replayer::open(EngineConfig::default(), replay_config(), spire_core::MemoryStore::new()).unwrap();
        replayer.replay(feed.as_bytes()).unwrap();
        replayer.dispatcher().registry().state_digest().unwrap()
    };
    let first = digest();
    for i in 0..100 {
        assert_eq!(first, digest(), "Determinism failure at iteration {}", i);
    }
}
