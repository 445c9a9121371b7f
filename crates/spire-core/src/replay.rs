//! Block feed replay
//!
//! A feed is JSON Lines, one block per line, in chain order. Each block is
//! `{ "number": n, "transactions": [ { "operations": [[name, body], …] } ] }`
//! plus whatever other fields the chain provides; the whole block object is
//! what programs see as `msg.block`.
//!
//! Replay resumes from the store's cursor. Blocks at or below the cursor are
//! skipped, a gap in block numbers is an error, and state is saved whenever
//! the block number is a multiple of the save interval and at end of feed.

use std::io::BufRead;

use serde::Serialize;
use serde_json::Value as Json;

use crate::config::{EngineConfig, ReplayConfig};
use crate::dispatcher::Dispatcher;
use crate::gate::Gate;
use crate::provisioning::Receipt;
use crate::registry::Registry;
use crate::store::StateStore;
use crate::value::Value;
use crate::{Error, Result};

/// Counters for one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub blocks_applied: u64,
    pub blocks_skipped: u64,
    pub operations: u64,
    pub rejected: u64,
    pub created: u64,
    pub committed: u64,
    pub deprovisioned: u64,
    pub ignored: u64,
    /// Last block applied, after the run
    pub cursor: u64,
}

impl ReplaySummary {
    fn record(&mut self, receipt: &Receipt) {
        self.operations += 1;
        match receipt {
            Receipt::Created => self.created += 1,
            Receipt::Committed => self.committed += 1,
            Receipt::CreateFaulted(_) | Receipt::Deprovisioned(_) => self.deprovisioned += 1,
            Receipt::Duplicate | Receipt::NotAllowed | Receipt::Ignored => self.ignored += 1,
        }
    }
}

pub struct Replayer<S: StateStore> {
    dispatcher: Dispatcher,
    store: S,
    gate: Gate,
    save_interval: u64,
    next_block: u64,
}

impl<S: StateStore> Replayer<S> {
    /// Restore from `store`, or start empty at the configured start block
    pub fn open(engine: EngineConfig, replay: ReplayConfig, store: S) -> Result<Self> {
        let (registry, next_block) = match store.load()? {
            Some(snapshot) => {
                let (registry, cursor) = Registry::restore(snapshot);
                tracing::info!(cursor, dapps = registry.len(), "state restored");
                (registry, cursor + 1)
            }
            None => {
                tracing::info!(start_block = replay.start_block, "no saved state, starting fresh");
                (Registry::new(), replay.start_block)
            }
        };
        Ok(Replayer {
            dispatcher: Dispatcher::with_registry(engine, registry),
            store,
            gate: Gate::new(&replay.op_prefix),
            save_interval: replay.save_interval,
            next_block,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of the last block applied
    pub fn cursor(&self) -> u64 {
        self.next_block.saturating_sub(1)
    }

    /// Replay every block in `feed` and save at the end
    pub fn replay<R: BufRead>(&mut self, feed: R) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        for (index, line) in feed.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let block: Json = serde_json::from_str(&line)
                .map_err(|e| Error::Feed(format!("line {}: {}", index + 1, e)))?;
            self.apply_block(&block, &mut summary)
                .map_err(|e| match e {
                    Error::Feed(msg) => Error::Feed(format!("line {}: {}", index + 1, msg)),
                    other => other,
                })?;
        }
        self.save()?;
        summary.cursor = self.cursor();
        tracing::info!(
            cursor = summary.cursor,
            applied = summary.blocks_applied,
            operations = summary.operations,
            "replay finished"
        );
        Ok(summary)
    }

    /// Apply one block if it is the next one expected
    pub fn apply_block(&mut self, block: &Json, summary: &mut ReplaySummary) -> Result<()> {
        let number = block
            .get("number")
            .and_then(Json::as_u64)
            .ok_or_else(|| Error::Feed("block has no numeric 'number'".into()))?;
        if number < self.next_block {
            summary.blocks_skipped += 1;
            return Ok(());
        }
        if number > self.next_block {
            return Err(Error::Feed(format!(
                "expected block {}, found block {}",
                self.next_block, number
            )));
        }

        let payload = Value::from_json(block);
        for (name, body) in operations(block) {
            match self.gate.admit(name, body) {
                Ok(Some(op)) => {
                    let id = op.id().to_string();
                    let receipt = self.dispatcher.apply(op, &payload, number);
                    tracing::debug!(block = number, dapp = %id, receipt = receipt.kind(), "operation applied");
                    summary.record(&receipt);
                }
                Ok(None) => {}
                Err(Error::Rejected { key, reason }) => {
                    tracing::warn!(block = number, key = %key, reason = %reason, "operation rejected");
                    summary.rejected += 1;
                }
                Err(other) => return Err(other),
            }
        }

        self.next_block = number + 1;
        summary.blocks_applied += 1;
        if self.save_interval > 0 && number % self.save_interval == 0 {
            self.save()?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let snapshot = self.dispatcher.registry().snapshot(self.cursor());
        self.store.save(&snapshot)?;
        tracing::info!(cursor = snapshot.cursor, "state saved");
        Ok(())
    }

    pub fn into_parts(self) -> (Dispatcher, S) {
        (self.dispatcher, self.store)
    }
}

/// `[name, body]` pairs of every operation in the block, in order
fn operations(block: &Json) -> impl Iterator<Item = (&str, &Json)> {
    block
        .get("transactions")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tx| tx.get("operations").and_then(Json::as_array))
        .flatten()
        .filter_map(|op| match op.as_array().map(Vec::as_slice) {
            Some([name, body]) => name.as_str().map(|name| (name, body)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn config(start_block: u64, save_interval: u64) -> ReplayConfig {
        ReplayConfig {
            start_block,
            save_interval,
            ..ReplayConfig::default()
        }
    }

    fn block(number: u64, ops: Vec<Json>) -> String {
        json!({
            "number": number,
            "witness": "w",
            "transactions": [{"operations": ops}]
        })
        .to_string()
    }

    fn create(id: &str, source: &str) -> Json {
        json!(["custom_json", {
            "id": "spire_dapp_create",
            "json": json!({"id": id, "source": source, "args": {}}).to_string(),
            "required_posting_auths": ["alice"]
        }])
    }

    fn transact(id: &str, func: &str) -> Json {
        json!(["custom_json", {
            "id": "spire_transact",
            "json": json!({"id": id, "func": func, "args": {}}).to_string(),
            "required_posting_auths": ["bob"]
        }])
    }

    #[test]
    fn test_operations_iterates_in_order() {
        let b: Json = serde_json::from_str(&block(1, vec![json!(["vote", {}]), json!("bad"), json!(["a", {"x": 1}])])).unwrap();
        let names: Vec<&str> = operations(&b).map(|(name, _)| name).collect();
        assert_eq!(names, vec!["vote", "a"]);
    }

    #[test]
    fn test_replay_applies_and_saves() {
        let feed = [
            block(5, vec![create("counter", "if (msg.type == 'init') return {n: 0}; storage.n += 1; return storage;")]),
            block(6, vec![transact("counter", "inc"), transact("counter", "inc")]),
            block(7, vec![json!(["vote", {"voter": "x"}])]),
        ]
        .join("\n");
        let mut replayer = Replayer::open(EngineConfig::default(), config(5, 100), MemoryStore::new()).unwrap();
        let summary = replayer.replay(feed.as_bytes()).unwrap();
        assert_eq!(summary.blocks_applied, 3);
        assert_eq!(summary.operations, 3);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.committed, 2);
        assert_eq!(summary.cursor, 7);

        let (dispatcher, store) = replayer.into_parts();
        let saved = store.saved().unwrap();
        assert_eq!(saved.cursor, 7);
        assert_eq!(saved.dapps, dispatcher.registry().snapshot(7).dapps);
        assert_eq!(
            saved.dapps["counter"].storage,
            Value::from_json(&json!({"n": 2}))
        );
    }

    #[test]
    fn test_block_payload_visible_to_program() {
        let feed = block(3, vec![create("b", "return [msg.blockNumber, msg.block.witness, msg.sender];")]);
        let mut replayer = Replayer::open(EngineConfig::default(), config(3, 100), MemoryStore::new()).unwrap();
        replayer.replay(feed.as_bytes()).unwrap();
        assert_eq!(
            replayer.dispatcher().registry().lookup("b").unwrap().storage,
            Value::from_json(&json!([3, "w", "alice"]))
        );
    }

    #[test]
    fn test_periodic_save_on_interval() {
        let feed = [block(9, vec![]), block(10, vec![]), block(11, vec![])].join("\n");
        let store = MemoryStore::new();
        let mut replayer = Replayer::open(EngineConfig::default(), config(9, 5), store).unwrap();
        let mut summary = ReplaySummary::default();
        let mut lines = feed.lines();
        for _ in 0..2 {
            let b: Json = serde_json::from_str(lines.next().unwrap()).unwrap();
            replayer.apply_block(&b, &mut summary).unwrap();
        }
        let (_, store) = replayer.into_parts();
        assert_eq!(store.saved().map(|s| s.cursor), Some(10));
    }

    #[test]
    fn test_resume_skips_applied_blocks() {
        let store = MemoryStore::new();
        let first = [
            block(1, vec![create("c", "if (msg.type == 'init') return {n: 0}; storage.n += 1; return storage;")]),
            block(2, vec![transact("c", "inc")]),
        ]
        .join("\n");
        let mut replayer = Replayer::open(EngineConfig::default(), config(1, 100), store).unwrap();
        replayer.replay(first.as_bytes()).unwrap();
        let (_, store) = replayer.into_parts();

        let second = [
            block(1, vec![create("c", "return 'again';")]),
            block(2, vec![transact("c", "inc")]),
            block(3, vec![transact("c", "inc")]),
        ]
        .join("\n");
        let mut resumed = Replayer::open(EngineConfig::default(), config(1, 100), store).unwrap();
        assert_eq!(resumed.cursor(), 2);
        let summary = resumed.replay(second.as_bytes()).unwrap();
        assert_eq!(summary.blocks_skipped, 2);
        assert_eq!(summary.blocks_applied, 1);
        assert_eq!(
            resumed.dispatcher().registry().lookup("c").unwrap().storage,
            Value::from_json(&json!({"n": 2}))
        );
    }

    #[test]
    fn test_gap_is_an_error() {
        let feed = [block(1, vec![]), block(3, vec![])].join("\n");
        let mut replayer = Replayer::open(EngineConfig::default(), config(1, 100), MemoryStore::new()).unwrap();
        let err = replayer.replay(feed.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Feed(msg) if msg.contains("line 2")));
    }

    #[test]
    fn test_malformed_line_aborts() {
        let feed = format!("{}\nnot json\n", block(1, vec![]));
        let mut replayer = Replayer::open(EngineConfig::default(), config(1, 100), MemoryStore::new()).unwrap();
        assert!(matches!(replayer.replay(feed.as_bytes()), Err(Error::Feed(_))));
    }

    #[test]
    fn test_rejected_operations_are_counted() {
        let bad = json!(["custom_json", {
            "id": "spire_transact",
            "json": "{\"id\": \"UPPER\", \"func\": \"f\", \"args\": {}}",
            "required_posting_auths": ["bob"]
        }]);
        let mut replayer = Replayer::open(EngineConfig::default(), config(1, 100), MemoryStore::new()).unwrap();
        let summary = replayer.replay(block(1, vec![bad]).as_bytes()).unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.operations, 0);
    }
}
