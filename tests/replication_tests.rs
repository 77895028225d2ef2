//! End-to-end pipeline tests: synthetic redo archives on disk, a seeded
//! schema snapshot in the state store, the full engine running against them
//! and a recording sink on the far end.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redolink_common::{
    CheckpointEvent, DdlEvent, Dba, DmlKind, Endian, FsStateStore, Result, RowEvent, RowId, Scn,
    Seq, Shutdown, Sink, StateStore, TxnHeader, Uba, Xid,
};
use redolink_engine::{Checkpoint, Checkpointer, Config};
use redolink_redo::testkit::{
    begin_record, commit_record, insert_record, lob_page_record, multi_row_record,
    rollback_to_savepoint_record, update_record, Cols, LogBuilder,
};
use redolink_redo::vector::OpCode;
use redolink_redo::ops::LobLocator;
use redolink_schema::dict::{
    cdef_type, ColType, ObjType, SysCCol, SysCDef, SysCol, SysLob, SysObj, SysTab, SysTs, SysUser,
};
use redolink_schema::{Schema, SchemaElement, SchemaSnapshot};
use tempfile::TempDir;

const E: Endian = Endian::Little;

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recording {
    begins: Vec<TxnHeader>,
    rows: Vec<RowEvent>,
    ddls: Vec<DdlEvent>,
    checkpoints: Vec<CheckpointEvent>,
    commits: usize,
}

/// Collects everything and requests shutdown once the expected number of
/// commits (or a switch checkpoint) has been seen, so the engine's tail
/// polling terminates.
struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
    shutdown: Shutdown,
    stop_after_commits: usize,
    stop_on_switch_checkpoint: bool,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn on_begin(&mut self, txn: &TxnHeader) -> Result<()> {
        self.recording.lock().unwrap().begins.push(txn.clone());
        Ok(())
    }

    async fn on_insert(&mut self, row: &RowEvent) -> Result<()> {
        self.recording.lock().unwrap().rows.push(row.clone());
        Ok(())
    }

    async fn on_update(&mut self, row: &RowEvent) -> Result<()> {
        self.recording.lock().unwrap().rows.push(row.clone());
        Ok(())
    }

    async fn on_delete(&mut self, row: &RowEvent) -> Result<()> {
        self.recording.lock().unwrap().rows.push(row.clone());
        Ok(())
    }

    async fn on_ddl(&mut self, ddl: &DdlEvent) -> Result<()> {
        self.recording.lock().unwrap().ddls.push(ddl.clone());
        Ok(())
    }

    async fn on_commit(&mut self) -> Result<()> {
        let mut recording = self.recording.lock().unwrap();
        recording.commits += 1;
        if recording.commits >= self.stop_after_commits {
            self.shutdown.request();
        }
        Ok(())
    }

    async fn on_checkpoint(&mut self, checkpoint: &CheckpointEvent) -> Result<()> {
        let mut recording = self.recording.lock().unwrap();
        recording.checkpoints.push(*checkpoint);
        if self.stop_on_switch_checkpoint && checkpoint.is_redo_switch {
            self.shutdown.request();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn row_id(obj: u32, tag: u16) -> RowId {
    RowId::new(obj, Dba(obj), tag)
}

/// SCOTT.DEPT(deptno NUMBER NOT NULL PK, dname VARCHAR2) as obj 87 and
/// SCOTT.DOCS(id NUMBER, body CLOB in AL16UTF16) as obj 90 / lob 5000.
fn build_schema() -> Schema {
    let mut schema = Schema::new();
    schema.set_elements(vec![SchemaElement::new("SCOTT", ".*").unwrap()]);
    schema.users.upsert(SysUser {
        row_id: row_id(1, 0),
        user: 10,
        name: "SCOTT".into(),
        spare1: 0,
    });

    for (obj, name) in [(87u32, "DEPT"), (90u32, "DOCS")] {
        schema.objs.upsert(SysObj {
            row_id: row_id(obj, 0),
            owner: 10,
            obj,
            data_obj: obj,
            obj_type: ObjType::Table,
            name: name.into(),
            flags: 0,
        });
        schema.tabs.upsert(SysTab {
            row_id: row_id(obj, 1),
            obj,
            data_obj: obj,
            ts: 1,
            clu_cols: 0,
            flags: 0,
            property: 0,
        });
        schema.touch(obj);
    }

    let mut col = |obj: u32, seg_col: i32, name: &str, col_type: ColType, charset_id: u32, null: i32| {
        schema.cols.upsert(SysCol {
            row_id: row_id(obj, 10 + seg_col as u16),
            obj,
            col: seg_col,
            seg_col,
            int_col: seg_col,
            name: name.into(),
            col_type,
            length: 22,
            precision: -1,
            scale: -1,
            charset_form: 0,
            charset_id,
            null,
            property: 0,
        });
    };
    col(87, 1, "DEPTNO", ColType::Number, 0, 1);
    col(87, 2, "DNAME", ColType::Varchar, 0, 0);
    col(90, 1, "ID", ColType::Number, 0, 0);
    col(90, 2, "BODY", ColType::Clob, 2000, 0);

    schema.ccols.upsert(SysCCol {
        row_id: row_id(87, 20),
        con: 1,
        int_col: 1,
        obj: 87,
        spare1: 0,
    });
    schema.cdefs.upsert(SysCDef {
        row_id: row_id(87, 21),
        con: 1,
        obj: 87,
        def_type: cdef_type::PRIMARY_KEY,
    });

    schema.lobs.upsert(SysLob {
        row_id: row_id(90, 30),
        obj: 90,
        col: 2,
        int_col: 2,
        l_obj: 5000,
        ts: 1,
    });
    schema.tss.upsert(SysTs {
        row_id: row_id(1, 40),
        ts: 1,
        name: "USERS".into(),
        block_size: 8192,
    });

    schema.rebuild_touched();
    schema
}

/// Place a schema-bearing checkpoint into the state dir so the engine
/// resumes at `(seq, 0)` with the fixture schema loaded.
fn seed_state(state_dir: &Path, seq: Seq, scn: Scn) {
    let store: Arc<dyn StateStore> = Arc::new(FsStateStore::open(state_dir).unwrap());
    let mut checkpointer = Checkpointer::new(store, "ORCL", 100, false);
    let snapshot = SchemaSnapshot::capture(&build_schema(), scn);
    let record = Checkpoint {
        database: "ORCL".into(),
        scn: scn.0,
        resetlogs: 1_042_000_000,
        activation: 0x00AC71F0,
        time: 0,
        seq: seq.0,
        offset: 0,
        switch: false,
        min_tran: None,
        schema_ref_scn: None,
    };
    checkpointer.write(&record, Some(&snapshot)).unwrap();
}

struct TestEnv {
    _dir: TempDir,
    arch_dir: std::path::PathBuf,
    config: Config,
}

fn test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let arch_dir = dir.path().join("arch");
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(&arch_dir).unwrap();
    std::fs::create_dir_all(&state_dir).unwrap();

    let config = Config::from_toml(&format!(
        r#"
database = "ORCL"
archive-dir = {arch:?}
log-archive-format = "arch_%s.log"
state-dir = {state:?}
memory-min-mb = 2
memory-max-mb = 16
checkpoint-interval-s = 3600
refresh-interval-us = 20000
arch-read-sleep-us = 20000
flags = ["ARCH_ONLY"]

[[tables]]
owner = "SCOTT"
table = ".*"
"#,
        arch = arch_dir.to_str().unwrap(),
        state = state_dir.to_str().unwrap(),
    ))
    .unwrap();

    TestEnv { _dir: dir, arch_dir, config }
}

fn run_engine(
    env: &TestEnv,
    stop_after_commits: usize,
    stop_on_switch_checkpoint: bool,
) -> Recording {
    let recording = Arc::new(Mutex::new(Recording::default()));
    let shutdown = Shutdown::new();
    let sink = Box::new(RecordingSink {
        recording: Arc::clone(&recording),
        shutdown: shutdown.clone(),
        stop_after_commits,
        stop_on_switch_checkpoint,
    });

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime
        .block_on(redolink_engine::run(env.config.clone(), sink, shutdown))
        .unwrap();

    Arc::try_unwrap(recording)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|_| panic!("sink still referenced"))
}

fn xid() -> Xid {
    Xid::new(0x0001, 0x0002, 0x0000_0003)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_single_row_insert_end_to_end() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    let cols: Cols = vec![(0, Some(vec![0xC1, 0x0B])), (1, Some(b"SALES".to_vec()))];
    LogBuilder::new(Seq(1), Scn(999))
        .next_scn(Scn(1002))
        .record(begin_record(E, Scn(1000), xid()))
        .record(insert_record(E, Scn(1000), xid(), 87, 87, Dba(0x0100_0010), 0, Uba(1), &cols))
        .record(commit_record(E, Scn(1001), xid()))
        .write(&env.arch_dir.join("arch_1.log"))
        .unwrap();

    let recording = run_engine(&env, 1, false);

    assert_eq!(recording.begins.len(), 1);
    assert_eq!(recording.begins[0].xid, xid());
    assert_eq!(recording.begins[0].commit_scn, Scn(1001));
    assert_eq!(recording.commits, 1);

    assert_eq!(recording.rows.len(), 1);
    let row = &recording.rows[0];
    assert_eq!(row.kind, DmlKind::Insert);
    assert_eq!(row.table, "SCOTT.DEPT");
    assert_eq!(row.bdba, Dba(0x0100_0010));
    assert_eq!(row.slot, 0);
    let after = row.after.as_ref().unwrap();
    assert_eq!(after.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
    assert_eq!(after.get("DNAME"), Some(&b"SALES"[..]));
    assert!(row.before.is_none());
}

#[test]
fn test_update_with_supplemental_log() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    let before: Cols = vec![(1, Some(b"SALES".to_vec()))];
    let after: Cols = vec![(1, Some(b"MARKETING".to_vec()))];
    let supp: Cols = vec![(0, Some(vec![0xC1, 0x0B]))];
    LogBuilder::new(Seq(1), Scn(1999))
        .next_scn(Scn(2001))
        .record(begin_record(E, Scn(1999), xid()))
        .record(update_record(E, Scn(1999), xid(), 87, 87, Dba(16), 7, Uba(1), &before, &after, Some(&supp)))
        .record(commit_record(E, Scn(2000), xid()))
        .write(&env.arch_dir.join("arch_1.log"))
        .unwrap();

    let recording = run_engine(&env, 1, false);

    assert_eq!(recording.rows.len(), 1);
    let row = &recording.rows[0];
    assert_eq!(row.kind, DmlKind::Update);
    assert_eq!(row.slot, 7);
    let before = row.before.as_ref().unwrap();
    let after = row.after.as_ref().unwrap();
    assert_eq!(before.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
    assert_eq!(before.get("DNAME"), Some(&b"SALES"[..]));
    assert_eq!(after.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
    assert_eq!(after.get("DNAME"), Some(&b"MARKETING"[..]));
}

#[test]
fn test_multi_row_insert_emits_in_slot_order() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    let rows: Vec<Vec<Option<Vec<u8>>>> = vec![
        vec![Some(vec![0xC1, 0x0B]), Some(b"A".to_vec())],
        vec![Some(vec![0xC1, 0x15]), Some(b"B".to_vec())],
        vec![Some(vec![0xC1, 0x1F]), Some(b"C".to_vec())],
    ];
    LogBuilder::new(Seq(1), Scn(100))
        .next_scn(Scn(102))
        .record(begin_record(E, Scn(100), xid()))
        .record(multi_row_record(
            E, Scn(100), xid(), OpCode::MULTI_INSERT, 87, 87, Dba(16), Uba(1), &[0, 1, 2], 2, &rows,
        ))
        .record(commit_record(E, Scn(101), xid()))
        .write(&env.arch_dir.join("arch_1.log"))
        .unwrap();

    let recording = run_engine(&env, 1, false);

    assert_eq!(recording.rows.len(), 3);
    for (i, row) in recording.rows.iter().enumerate() {
        assert_eq!(row.kind, DmlKind::Insert);
        assert_eq!(row.slot, i as u16);
        assert_eq!(row.scn, Scn(100));
    }
    let names: Vec<&[u8]> = recording
        .rows
        .iter()
        .map(|r| r.after.as_ref().unwrap().get("DNAME").unwrap())
        .collect();
    assert_eq!(names, vec![b"A".as_ref(), b"B".as_ref(), b"C".as_ref()]);
}

#[test]
fn test_rollback_to_savepoint_emits_only_prefix() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    let mk = |uba: u64, slot: u16, name: &str| {
        insert_record(
            E,
            Scn(100),
            xid(),
            87,
            87,
            Dba(16),
            slot,
            Uba(uba),
            &vec![(0, Some(vec![0xC1, 0x02])), (1, Some(name.as_bytes().to_vec()))],
        )
    };
    LogBuilder::new(Seq(1), Scn(100))
        .next_scn(Scn(102))
        .record(begin_record(E, Scn(100), xid()))
        .record(mk(1, 0, "A"))
        .record(mk(2, 1, "B"))
        .record(mk(3, 2, "C"))
        .record(rollback_to_savepoint_record(E, Scn(100), xid(), Uba(1)))
        .record(commit_record(E, Scn(101), xid()))
        .write(&env.arch_dir.join("arch_1.log"))
        .unwrap();

    let recording = run_engine(&env, 1, false);

    assert_eq!(recording.rows.len(), 1);
    let after = recording.rows[0].after.as_ref().unwrap();
    assert_eq!(after.get("DNAME"), Some(&b"A"[..]));
}

#[test]
fn test_log_switch_mid_transaction_and_restart() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(42), Scn(10));

    let cols_a: Cols = vec![(0, Some(vec![0xC1, 0x0B])), (1, Some(b"FIRST".to_vec()))];
    let cols_b: Cols = vec![(0, Some(vec![0xC1, 0x15])), (1, Some(b"SECOND".to_vec()))];

    // T begins in sequence 42 and stays open across the switch.
    LogBuilder::new(Seq(42), Scn(4000))
        .next_scn(Scn(4100))
        .record(begin_record(E, Scn(4000), xid()))
        .record(insert_record(E, Scn(4001), xid(), 87, 87, Dba(16), 0, Uba(1), &cols_a))
        .write(&env.arch_dir.join("arch_42.log"))
        .unwrap();

    // Run 1: only sequence 42 exists; stop at the switch checkpoint.
    let recording = run_engine(&env, usize::MAX, true);
    assert_eq!(recording.commits, 0);
    let switch = recording
        .checkpoints
        .iter()
        .find(|c| c.is_redo_switch)
        .expect("switch checkpoint");
    assert_eq!(switch.seq, Seq(42));

    // The persisted checkpoint reports the open transaction's start.
    let store = FsStateStore::open(&env.config.state_dir).unwrap();
    let names = store.list().unwrap();
    let newest = names
        .iter()
        .filter_map(|n| redolink_common::state::parse_checkpoint_key("ORCL", n))
        .max()
        .unwrap();
    let payload = store
        .read(&redolink_common::state::checkpoint_key("ORCL", newest), 1 << 20)
        .unwrap()
        .unwrap();
    let checkpoint: Checkpoint = serde_json::from_slice(&payload).unwrap();
    let min = checkpoint.min_tran.as_ref().expect("min-open-txn recorded");
    assert_eq!(min.seq, 42);
    assert_eq!(min.xid, xid().to_string());

    // Sequence 43 arrives; T commits there.
    LogBuilder::new(Seq(43), Scn(4100))
        .next_scn(Scn(4300))
        .record(insert_record(E, Scn(4101), xid(), 87, 87, Dba(16), 1, Uba(2), &cols_b))
        .record(commit_record(E, Scn(4200), xid()))
        .write(&env.arch_dir.join("arch_43.log"))
        .unwrap();

    // Run 2: resume from the checkpoint; the commit carries both rows.
    let recording = run_engine(&env, 1, false);
    assert_eq!(recording.commits, 1);
    assert_eq!(recording.begins[0].xid, xid());
    assert_eq!(recording.begins[0].commit_scn, Scn(4200));
    assert_eq!(recording.rows.len(), 2);
    assert_eq!(
        recording.rows[0].after.as_ref().unwrap().get("DNAME"),
        Some(&b"FIRST"[..])
    );
    assert_eq!(
        recording.rows[1].after.as_ref().unwrap().get("DNAME"),
        Some(&b"SECOND"[..])
    );
}

#[test]
fn test_clob_assembly_with_utf16_charset() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    // five pages of UTF-16BE text, 600 bytes each
    let text: String = "redo".repeat(375); // 1500 chars → 3000 UTF-16 bytes
    let utf16: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
    assert_eq!(utf16.len(), 3000);

    let mut builder = LogBuilder::new(Seq(1), Scn(100)).next_scn(Scn(103));
    builder.push(begin_record(E, Scn(100), xid()));
    for (page, chunk) in utf16.chunks(600).enumerate() {
        builder.push(lob_page_record(E, Scn(100), 5000, 5000, 0x4C, page as u32, chunk));
    }
    let locator = LobLocator::out_of_line(0x4C, 3000, 5);
    let cols: Cols = vec![
        (0, Some(vec![0xC1, 0x02])),
        (1, Some(locator.encode(E))),
    ];
    builder.push(insert_record(E, Scn(101), xid(), 90, 90, Dba(32), 0, Uba(1), &cols));
    builder.push(commit_record(E, Scn(102), xid()));
    builder.write(&env.arch_dir.join("arch_1.log")).unwrap();

    let recording = run_engine(&env, 1, false);

    assert_eq!(recording.rows.len(), 1);
    let row = &recording.rows[0];
    assert_eq!(row.table, "SCOTT.DOCS");
    let body = row.after.as_ref().unwrap().get("BODY").unwrap();
    // AL16UTF16 decoded to UTF-8, byte-equal to the reference text
    assert_eq!(body, text.as_bytes());
}

#[test]
fn test_two_transactions_commit_in_scn_order() {
    let env = test_env();
    seed_state(&env.config.state_dir, Seq(1), Scn(10));

    let xid_a = Xid::new(1, 1, 1);
    let xid_b = Xid::new(2, 2, 2);
    let cols_a: Cols = vec![(0, Some(vec![0xC1, 0x02])), (1, Some(b"A".to_vec()))];
    let cols_b: Cols = vec![(0, Some(vec![0xC1, 0x03])), (1, Some(b"B".to_vec()))];

    // interleaved: A begins first but commits last
    LogBuilder::new(Seq(1), Scn(100))
        .next_scn(Scn(300))
        .record(begin_record(E, Scn(100), xid_a))
        .record(begin_record(E, Scn(101), xid_b))
        .record(insert_record(E, Scn(102), xid_a, 87, 87, Dba(16), 0, Uba(1), &cols_a))
        .record(insert_record(E, Scn(103), xid_b, 87, 87, Dba(16), 1, Uba(2), &cols_b))
        .record(commit_record(E, Scn(110), xid_b))
        .record(commit_record(E, Scn(120), xid_a))
        .write(&env.arch_dir.join("arch_1.log"))
        .unwrap();

    let recording = run_engine(&env, 2, false);

    assert_eq!(recording.commits, 2);
    // emission follows commit SCN: B (110) then A (120)
    assert_eq!(recording.begins[0].xid, xid_b);
    assert_eq!(recording.begins[0].commit_scn, Scn(110));
    assert_eq!(recording.begins[1].xid, xid_a);
    assert_eq!(recording.begins[1].commit_scn, Scn(120));
}
