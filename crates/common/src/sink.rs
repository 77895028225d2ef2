use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DataObj, Dba, FileOffset, Obj, Scn, Seq, Time, Xid};

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Ordered row image: `(column name, value bytes)` pairs in segment-column
/// order. A `None` value is SQL NULL; bytes are the raw column format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowImage {
    pub columns: Vec<(String, Option<Vec<u8>>)>,
}

impl RowImage {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn set(&mut self, name: &str, value: Option<Vec<u8>>) {
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

/// Transaction envelope delivered once per committed transaction.
#[derive(Clone, Debug)]
pub struct TxnHeader {
    pub xid: Xid,
    pub thread: u16,
    pub begin_seq: Seq,
    pub begin_scn: Scn,
    pub begin_time: Time,
    pub commit_seq: Seq,
    pub commit_scn: Scn,
    pub commit_sub_scn: u16,
    pub commit_time: Time,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct RowEvent {
    pub kind: DmlKind,
    /// `OWNER.TABLE`, or the synthesized `OBJ_<n>` in schemaless mode.
    pub table: String,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub bdba: Dba,
    pub slot: u16,
    pub scn: Scn,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub offset: FileOffset,
}

#[derive(Clone, Debug)]
pub struct DdlEvent {
    pub table: Option<String>,
    pub obj: Obj,
    pub text: String,
    pub offset: FileOffset,
}

#[derive(Clone, Copy, Debug)]
pub struct CheckpointEvent {
    pub seq: Seq,
    pub scn: Scn,
    pub time: Time,
    pub offset: FileOffset,
    pub is_redo_switch: bool,
}

// ---------------------------------------------------------------------------
// Sink trait: the core-to-sink boundary
// ---------------------------------------------------------------------------

/// Implemented by downstream sinks. The writer task calls these in commit
/// order; within a transaction, row events arrive in redo-insertion order
/// between `on_begin` and `on_commit`.
#[async_trait]
pub trait Sink: Send {
    async fn on_begin(&mut self, txn: &TxnHeader) -> Result<()>;
    async fn on_insert(&mut self, row: &RowEvent) -> Result<()>;
    async fn on_update(&mut self, row: &RowEvent) -> Result<()>;
    async fn on_delete(&mut self, row: &RowEvent) -> Result<()>;
    async fn on_ddl(&mut self, ddl: &DdlEvent) -> Result<()>;
    async fn on_commit(&mut self) -> Result<()>;
    async fn on_checkpoint(&mut self, checkpoint: &CheckpointEvent) -> Result<()>;
}

/// Sink that drops everything; useful for wiring tests and throughput runs.
#[derive(Default)]
pub struct DiscardSink {
    pub transactions: u64,
    pub rows: u64,
}

#[async_trait]
impl Sink for DiscardSink {
    async fn on_begin(&mut self, _txn: &TxnHeader) -> Result<()> {
        self.transactions += 1;
        Ok(())
    }

    async fn on_insert(&mut self, _row: &RowEvent) -> Result<()> {
        self.rows += 1;
        Ok(())
    }

    async fn on_update(&mut self, _row: &RowEvent) -> Result<()> {
        self.rows += 1;
        Ok(())
    }

    async fn on_delete(&mut self, _row: &RowEvent) -> Result<()> {
        self.rows += 1;
        Ok(())
    }

    async fn on_ddl(&mut self, _ddl: &DdlEvent) -> Result<()> {
        Ok(())
    }

    async fn on_commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_checkpoint(&mut self, _checkpoint: &CheckpointEvent) -> Result<()> {
        Ok(())
    }
}
