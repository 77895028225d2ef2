use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redolink_common::state::{checkpoint_key, parse_checkpoint_key, schema_key};
use redolink_common::{FileOffset, RedoError, Result, Scn, Seq, StateStore, Xid};
use redolink_schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const CHECKPOINT_MAX_SIZE: usize = 64 * 1024 * 1024;

/// Resume hint for the oldest transaction still open at checkpoint time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinTran {
    pub seq: u32,
    pub offset: u64,
    pub xid: String,
}

/// The persisted checkpoint record (`<db>-chkpt-<scn>`). The schema rides
/// either embedded or as a reference to a detached `<db>-schema-<scn>`
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub database: String,
    pub scn: u64,
    pub resetlogs: u32,
    pub activation: u32,
    pub time: u32,
    pub seq: u32,
    pub offset: u64,
    pub switch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tran: Option<MinTran>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_ref_scn: Option<u64>,
}

impl Checkpoint {
    /// The `(sequence, offset)` replay must restart from: the oldest open
    /// transaction when one exists, the checkpoint position otherwise.
    pub fn resume_point(&self) -> (Seq, FileOffset) {
        match &self.min_tran {
            Some(min) => (Seq(min.seq), FileOffset(min.offset)),
            None => (Seq(self.seq), FileOffset(self.offset)),
        }
    }
}

pub fn min_tran_from(seq: Seq, offset: FileOffset, xid: Xid) -> MinTran {
    MinTran {
        seq: seq.0,
        offset: offset.0,
        xid: xid.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Cadence gate (parser side)
// ---------------------------------------------------------------------------

/// Decides when the parser publishes a checkpoint: time OR bytes processed,
/// whichever first, and always on log switch or schema change.
pub struct CheckpointGate {
    interval: Duration,
    interval_bytes: u64,
    last_time: Option<Instant>,
    last_offset: u64,
}

impl CheckpointGate {
    pub fn new(interval: Duration, interval_bytes: u64) -> CheckpointGate {
        CheckpointGate {
            interval,
            interval_bytes,
            last_time: None,
            last_offset: 0,
        }
    }

    pub fn should_checkpoint(&mut self, offset: FileOffset, switch: bool, schema_changed: bool) -> bool {
        let now = Instant::now();
        let due = match self.last_time {
            None => true,
            Some(last) => {
                now.duration_since(last) >= self.interval
                    || offset.0.saturating_sub(self.last_offset) >= self.interval_bytes
            }
        };
        if due || switch || schema_changed {
            self.last_time = Some(now);
            self.last_offset = offset.0;
            return true;
        }
        false
    }

    /// A log switch resets the byte baseline; offsets restart per file.
    pub fn note_switch(&mut self) {
        self.last_offset = 0;
    }
}

// ---------------------------------------------------------------------------
// Checkpointer (writer side)
// ---------------------------------------------------------------------------

pub struct RecoveredState {
    pub checkpoint: Checkpoint,
    pub schema: Option<SchemaSnapshot>,
}

/// Owns checkpoint persistence against the state store: serialization,
/// retention and recovery selection.
pub struct Checkpointer {
    state: Arc<dyn StateStore>,
    database: String,
    keep: usize,
    keep_all: bool,
    known: BTreeSet<u64>,
    with_schema: BTreeSet<u64>,
}

impl Checkpointer {
    pub fn new(
        state: Arc<dyn StateStore>,
        database: impl Into<String>,
        keep: usize,
        keep_all: bool,
    ) -> Checkpointer {
        Checkpointer {
            state,
            database: database.into(),
            keep: keep.max(1),
            keep_all,
            known: BTreeSet::new(),
            with_schema: BTreeSet::new(),
        }
    }

    /// Persist one checkpoint (plus a detached schema snapshot when given)
    /// and apply retention. Every checkpoint references the newest snapshot
    /// at or below its SCN, so any of them can seed recovery.
    pub fn write(&mut self, checkpoint: &Checkpoint, schema: Option<&SchemaSnapshot>) -> Result<()> {
        let mut record = checkpoint.clone();
        if let Some(snapshot) = schema {
            let key = schema_key(&self.database, Scn(checkpoint.scn));
            self.state.write(&key, Scn(checkpoint.scn), &snapshot.to_json()?)?;
            self.with_schema.insert(checkpoint.scn);
        }
        record.schema_ref_scn = self
            .with_schema
            .range(..=checkpoint.scn)
            .next_back()
            .copied();

        let payload = serde_json::to_vec(&record)
            .map_err(|e| RedoError::StateStore(e.to_string()))?;
        let key = checkpoint_key(&self.database, Scn(checkpoint.scn));
        self.state.write(&key, Scn(checkpoint.scn), &payload)?;
        self.known.insert(checkpoint.scn);
        debug!(scn = checkpoint.scn, seq = checkpoint.seq, "checkpoint written");

        self.apply_retention()
    }

    /// Keep the newest `checkpoint-keep` records plus the most recent one
    /// carrying a schema snapshot; schema snapshot files stay (older
    /// checkpoints may still reference them).
    fn apply_retention(&mut self) -> Result<()> {
        if self.keep_all {
            return Ok(());
        }
        let newest_with_schema = self.with_schema.iter().next_back().copied();
        let keep_from = self.known.iter().rev().nth(self.keep - 1).copied();
        let Some(keep_from) = keep_from else {
            return Ok(());
        };

        let doomed: Vec<u64> = self
            .known
            .iter()
            .filter(|&&scn| scn < keep_from && Some(scn) != newest_with_schema)
            .copied()
            .collect();
        for scn in doomed {
            self.state.drop_entry(&checkpoint_key(&self.database, Scn(scn)))?;
            self.known.remove(&scn);
        }
        Ok(())
    }

    /// Startup recovery: list the store, consider checkpoints at or below
    /// the requested SCN (all of them when none is requested), load
    /// descending until one parses, and bring its schema along.
    pub fn recover(&mut self, start_scn: Option<Scn>) -> Result<Option<RecoveredState>> {
        self.known.clear();
        for name in self.state.list()? {
            if let Some(scn) = parse_checkpoint_key(&self.database, &name) {
                self.known.insert(scn.0);
            }
        }
        info!(count = self.known.len(), "checkpoints found in state store");

        let limit = start_scn.map(|s| s.0).unwrap_or(u64::MAX);
        let candidates: Vec<u64> = self
            .known
            .iter()
            .rev()
            .filter(|&&scn| scn <= limit)
            .copied()
            .collect();

        for scn in candidates {
            match self.load_one(scn) {
                Ok(state) => return Ok(Some(state)),
                Err(e) => {
                    warn!(scn, error = %e, "checkpoint unusable, trying an older one");
                }
            }
        }
        Ok(None)
    }

    fn load_one(&mut self, scn: u64) -> Result<RecoveredState> {
        let key = checkpoint_key(&self.database, Scn(scn));
        let payload = self
            .state
            .read(&key, CHECKPOINT_MAX_SIZE)?
            .ok_or_else(|| RedoError::StateStore(format!("{} disappeared", key)))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&payload)
            .map_err(|e| RedoError::StateStore(format!("{}: {}", key, e)))?;
        if checkpoint.database != self.database {
            return Err(RedoError::StateStore(format!(
                "{} belongs to database {:?}",
                key, checkpoint.database
            )));
        }

        // a checkpoint is only usable with the schema it saw
        let ref_scn = checkpoint.schema_ref_scn.ok_or_else(|| {
            RedoError::StateStore(format!("{} references no schema snapshot", key))
        })?;
        let schema_key = schema_key(&self.database, Scn(ref_scn));
        let data = self
            .state
            .read(&schema_key, CHECKPOINT_MAX_SIZE)?
            .ok_or_else(|| RedoError::StateStore(format!("{} missing", schema_key)))?;
        self.with_schema.insert(ref_scn);
        let schema = SchemaSnapshot::from_json(&data)?;

        Ok(RecoveredState {
            checkpoint,
            schema: Some(schema),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redolink_common::FsStateStore;
    use redolink_schema::Schema;
    use tempfile::TempDir;

    fn checkpoint(scn: u64, seq: u32, offset: u64) -> Checkpoint {
        Checkpoint {
            database: "ORCL".into(),
            scn,
            resetlogs: 1,
            activation: 1,
            time: 0,
            seq,
            offset,
            switch: false,
            min_tran: None,
            schema_ref_scn: None,
        }
    }

    fn checkpointer(dir: &TempDir, keep: usize) -> Checkpointer {
        let store = Arc::new(FsStateStore::open(dir.path()).unwrap());
        Checkpointer::new(store, "ORCL", keep, false)
    }

    fn snapshot(scn: u64) -> SchemaSnapshot {
        SchemaSnapshot::capture(&Schema::new(), Scn(scn))
    }

    #[test]
    fn test_write_recover_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 10);
        cp.write(&checkpoint(1000, 42, 0x2000), Some(&snapshot(1000))).unwrap();
        cp.write(&checkpoint(2000, 43, 0x200), None).unwrap();

        let mut fresh = checkpointer(&dir, 10);
        let recovered = fresh.recover(None).unwrap().unwrap();
        assert_eq!(recovered.checkpoint.scn, 2000);
        assert_eq!(recovered.checkpoint.resume_point(), (Seq(43), FileOffset(0x200)));
        // the later checkpoint rides on the older snapshot
        assert_eq!(recovered.checkpoint.schema_ref_scn, Some(1000));
        assert!(recovered.schema.is_some());
    }

    #[test]
    fn test_recover_respects_start_scn() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 10);
        cp.write(&checkpoint(1000, 1000, 0), Some(&snapshot(1000))).unwrap();
        for scn in [2000u64, 3000] {
            cp.write(&checkpoint(scn, scn as u32, 0), None).unwrap();
        }

        let mut fresh = checkpointer(&dir, 10);
        let recovered = fresh.recover(Some(Scn(2500))).unwrap().unwrap();
        assert_eq!(recovered.checkpoint.scn, 2000);
    }

    #[test]
    fn test_recover_skips_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 10);
        cp.write(&checkpoint(1000, 1, 0), Some(&snapshot(1000))).unwrap();
        cp.write(&checkpoint(2000, 2, 0), None).unwrap();
        std::fs::write(dir.path().join("ORCL-chkpt-2000.json"), b"not json").unwrap();

        let mut fresh = checkpointer(&dir, 10);
        let recovered = fresh.recover(None).unwrap().unwrap();
        assert_eq!(recovered.checkpoint.scn, 1000);
    }

    #[test]
    fn test_recover_requires_schema_reference() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 10);
        // no schema snapshot anywhere: nothing is usable
        cp.write(&checkpoint(1000, 1, 0), None).unwrap();
        let mut fresh = checkpointer(&dir, 10);
        assert!(fresh.recover(None).unwrap().is_none());
    }

    #[test]
    fn test_min_tran_resume_point() {
        let mut record = checkpoint(5000, 43, 0x4000);
        record.min_tran = Some(min_tran_from(
            Seq(42),
            FileOffset(0x2000),
            Xid::new(1, 2, 3),
        ));
        assert_eq!(record.resume_point(), (Seq(42), FileOffset(0x2000)));
    }

    #[test]
    fn test_retention_keeps_last_n_and_schema_bearer() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 2);

        let schema = Schema::new();
        let snapshot = SchemaSnapshot::capture(&schema, Scn(100));
        cp.write(&checkpoint(100, 1, 0), Some(&snapshot)).unwrap();
        for scn in [200u64, 300, 400] {
            cp.write(&checkpoint(scn, scn as u32, 0), None).unwrap();
        }

        let store = FsStateStore::open(dir.path()).unwrap();
        let names = store.list().unwrap();
        // last two plus the schema-bearing one survive
        assert!(names.contains(&"ORCL-chkpt-300".to_string()));
        assert!(names.contains(&"ORCL-chkpt-400".to_string()));
        assert!(names.contains(&"ORCL-chkpt-100".to_string()));
        assert!(names.contains(&"ORCL-schema-100".to_string()));
        assert!(!names.contains(&"ORCL-chkpt-200".to_string()));
    }

    #[test]
    fn test_keep_all_disables_retention() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsStateStore::open(dir.path()).unwrap());
        let mut cp = Checkpointer::new(store.clone(), "ORCL", 1, true);
        for scn in [100u64, 200, 300] {
            cp.write(&checkpoint(scn, 1, 0), None).unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn test_schema_roundtrip_via_reference() {
        let dir = TempDir::new().unwrap();
        let mut cp = checkpointer(&dir, 10);
        let schema = Schema::new();
        let snapshot = SchemaSnapshot::capture(&schema, Scn(900));
        let mut record = checkpoint(900, 9, 0);
        record.schema_ref_scn = None; // filled by write
        cp.write(&record, Some(&snapshot)).unwrap();

        let mut fresh = checkpointer(&dir, 10);
        let recovered = fresh.recover(None).unwrap().unwrap();
        assert_eq!(recovered.checkpoint.schema_ref_scn, Some(900));
        assert!(recovered.schema.is_some());
    }

    #[test]
    fn test_gate_cadence() {
        let mut gate = CheckpointGate::new(Duration::from_secs(3600), 1024 * 1024);
        // first call always fires
        assert!(gate.should_checkpoint(FileOffset(0x200), false, false));
        // nothing elapsed, few bytes: hold
        assert!(!gate.should_checkpoint(FileOffset(0x400), false, false));
        // byte threshold crossed
        assert!(gate.should_checkpoint(FileOffset(0x200 + 2 * 1024 * 1024), false, false));
        // switch forces
        assert!(gate.should_checkpoint(FileOffset(0x300), true, false));
        // schema change forces
        assert!(gate.should_checkpoint(FileOffset(0x300), false, true));
    }
}
