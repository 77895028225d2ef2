use std::sync::Arc;

use redolink_common::{CheckpointEvent, RedoError, Result, Shutdown, Sink};
use redolink_schema::SchemaSnapshot;
use redolink_txn::{Arena, CommittedTxn, TxnEvent};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::checkpoint::{Checkpoint, Checkpointer};

/// Queue depth between the parser and the writer; posting blocks when the
/// writer falls behind (the parser's back-pressure point).
pub const EMITTER_QUEUE_DEPTH: usize = 256;

pub enum WriterMessage {
    Txn(CommittedTxn),
    Checkpoint {
        record: Checkpoint,
        event: CheckpointEvent,
        schema: Option<Box<SchemaSnapshot>>,
    },
}

/// Parser-side handle of the emitter queue.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<WriterMessage>,
    shutdown: Shutdown,
}

impl Emitter {
    pub fn channel(shutdown: Shutdown) -> (Emitter, mpsc::Receiver<WriterMessage>) {
        let (tx, rx) = mpsc::channel(EMITTER_QUEUE_DEPTH);
        (Emitter { tx, shutdown }, rx)
    }

    pub fn post_txn(&self, txn: CommittedTxn) -> Result<()> {
        self.post(WriterMessage::Txn(txn))
    }

    pub fn post_checkpoint(
        &self,
        record: Checkpoint,
        event: CheckpointEvent,
        schema: Option<Box<SchemaSnapshot>>,
    ) -> Result<()> {
        self.post(WriterMessage::Checkpoint { record, event, schema })
    }

    fn post(&self, message: WriterMessage) -> Result<()> {
        if self.shutdown.is_requested() && self.shutdown.is_hard() {
            return Err(RedoError::NotReady("shutdown".into()));
        }
        self.tx
            .blocking_send(message)
            .map_err(|_| RedoError::NotReady("writer queue closed".into()))
    }
}

/// Writer task: drains the queue, replays committed transactions to the
/// sink in commit order and persists checkpoints. Marks the arena while
/// running so exhausted allocations block instead of failing.
pub async fn run_writer(
    mut rx: mpsc::Receiver<WriterMessage>,
    mut sink: Box<dyn Sink>,
    mut checkpointer: Checkpointer,
    arena: Arc<Arena>,
) -> Result<()> {
    arena.set_writer_active(true);
    let result = writer_loop(&mut rx, sink.as_mut(), &mut checkpointer).await;
    arena.set_writer_active(false);
    if let Err(e) = &result {
        error!(error = %e, "writer task failed");
    }
    result
}

async fn writer_loop(
    rx: &mut mpsc::Receiver<WriterMessage>,
    sink: &mut dyn Sink,
    checkpointer: &mut Checkpointer,
) -> Result<()> {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Txn(txn) => {
                debug!(
                    xid = %txn.header.xid,
                    commit_scn = %txn.header.commit_scn,
                    events = txn.events.len(),
                    "delivering transaction"
                );
                sink.on_begin(&txn.header).await?;
                for event in &txn.events {
                    match event {
                        TxnEvent::Row(row) => match row.kind {
                            redolink_common::DmlKind::Insert => sink.on_insert(row).await?,
                            redolink_common::DmlKind::Update => sink.on_update(row).await?,
                            redolink_common::DmlKind::Delete => sink.on_delete(row).await?,
                        },
                        TxnEvent::Ddl(ddl) => sink.on_ddl(ddl).await?,
                    }
                }
                sink.on_commit().await?;
            }
            WriterMessage::Checkpoint { record, event, schema } => {
                checkpointer.write(&record, schema.as_deref())?;
                sink.on_checkpoint(&event).await?;
            }
        }
    }
    Ok(())
}
