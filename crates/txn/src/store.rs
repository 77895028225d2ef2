use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redolink_common::{FileOffset, Seq, Xid};
use tracing::warn;

use crate::arena::Arena;
use crate::transaction::Transaction;

/// Open transactions keyed by XID, plus the skip list and the
/// minimum-open-transaction scan the checkpointer depends on.
pub struct TransactionStore {
    arena: Arc<Arena>,
    open: HashMap<u64, Transaction>,
    skip: HashSet<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinOpenTxn {
    pub seq: Seq,
    pub offset: FileOffset,
    pub xid: Xid,
}

impl TransactionStore {
    pub fn new(arena: Arc<Arena>) -> TransactionStore {
        TransactionStore {
            arena,
            open: HashMap::new(),
            skip: HashSet::new(),
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_arc(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn skip_xid(&mut self, xid: Xid) {
        self.skip.insert(xid.to_u64());
    }

    pub fn is_skipped(&self, xid: Xid) -> bool {
        self.skip.contains(&xid.to_u64())
    }

    /// Transaction for an XID, created on first use. A begin for an XID that
    /// is already open purges the stale instance first: two transactions
    /// with one XID cannot coexist, the id has been reused.
    pub fn begin(&mut self, xid: Xid, thread: u16) -> &mut Transaction {
        if let Some(existing) = self.open.get(&xid.to_u64()) {
            if existing.begin_seen {
                warn!(%xid, "xid reused while a transaction is open, purging the stale one");
                let mut stale = self.open.remove(&xid.to_u64()).unwrap();
                stale.purge(&self.arena);
            }
        }
        let entry = self
            .open
            .entry(xid.to_u64())
            .or_insert_with(|| Transaction::new(xid, thread));
        entry.begin_seen = true;
        entry
    }

    /// Transaction for an opcode that arrived before (or without) its 5.2.
    pub fn get_or_create(&mut self, xid: Xid, thread: u16) -> &mut Transaction {
        self.open
            .entry(xid.to_u64())
            .or_insert_with(|| Transaction::new(xid, thread))
    }

    pub fn get_mut(&mut self, xid: Xid) -> Option<&mut Transaction> {
        self.open.get_mut(&xid.to_u64())
    }

    pub fn get(&self, xid: Xid) -> Option<&Transaction> {
        self.open.get(&xid.to_u64())
    }

    /// Detach for commit flush or rollback purge.
    pub fn take(&mut self, xid: Xid) -> Option<Transaction> {
        self.open.remove(&xid.to_u64())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_chunks(&self) -> usize {
        self.open.values().map(Transaction::chunk_count).sum()
    }

    /// The earliest `{seq, offset}` any open transaction started at; the
    /// checkpoint resume point must not advance past it.
    pub fn min_open_txn(&self) -> Option<MinOpenTxn> {
        let mut min: Option<MinOpenTxn> = None;
        for txn in self.open.values() {
            if txn.first_seq.is_none() {
                continue;
            }
            let candidate = MinOpenTxn {
                seq: txn.first_seq,
                offset: txn.first_offset,
                xid: txn.xid,
            };
            min = Some(match min {
                None => candidate,
                Some(best) => {
                    if (candidate.seq, candidate.offset) < (best.seq, best.offset) {
                        candidate
                    } else {
                        best
                    }
                }
            });
        }
        min
    }

    /// Purge every open transaction (hard shutdown).
    pub fn purge_all(&mut self) {
        for (_, mut txn) in self.open.drain() {
            txn.purge(&self.arena);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::chunk::{ColValue, EntryCode, EntryMeta};
    use redolink_common::{Dba, Scn, Shutdown, Uba};

    fn store() -> TransactionStore {
        let arena =
            Arena::new(ArenaConfig { min_mb: 2, max_mb: 8 }, Shutdown::new()).unwrap();
        TransactionStore::new(Arc::new(arena))
    }

    fn meta(uba: u64) -> EntryMeta {
        EntryMeta {
            code: EntryCode::Insert,
            flags: 0,
            scn: Scn(100),
            sub_scn: 0,
            slot: 0,
            uba: Uba(uba),
            obj: 87,
            data_obj: 87,
            bdba: Dba(0x10),
            file_offset: FileOffset(0x2000),
        }
    }

    fn one_col() -> Vec<ColValue> {
        vec![ColValue { colnum: 0, supplemental: false, value: Some(vec![1]) }]
    }

    #[test]
    fn test_min_open_txn_ordering() {
        let mut store = store();
        let a = Xid::new(1, 0, 1);
        let b = Xid::new(2, 0, 1);

        store.begin(a, 1).note_position(Seq(43), FileOffset(0x200));
        store.begin(b, 1).note_position(Seq(42), FileOffset(0x2000));

        let min = store.min_open_txn().unwrap();
        assert_eq!(min.seq, Seq(42));
        assert_eq!(min.offset, FileOffset(0x2000));
        assert_eq!(min.xid, b);
    }

    #[test]
    fn test_min_open_txn_empty() {
        let store = store();
        assert!(store.min_open_txn().is_none());
    }

    #[test]
    fn test_xid_reuse_purges_stale() {
        let mut store = store();
        let xid = Xid::new(1, 2, 3);
        {
            let arena = Arc::clone(&store.arena);
            let txn = store.begin(xid, 1);
            txn.add_entry(&arena, meta(1), &[], &one_col()).unwrap();
        }
        assert_eq!(store.open_chunks(), 1);

        // same xid begins again: the old buffer must not leak
        store.begin(xid, 1);
        assert_eq!(store.open_count(), 1);
        assert_eq!(store.open_chunks(), 0);
        let stats = store.arena().stats();
        assert_eq!(stats.allocated, stats.free);
    }

    #[test]
    fn test_chunks_accounted_against_arena() {
        let mut store = store();
        let xid = Xid::new(1, 0, 9);
        {
            let arena = Arc::clone(&store.arena);
            let txn = store.get_or_create(xid, 1);
            txn.add_entry(&arena, meta(1), &[], &one_col()).unwrap();
        }

        let stats = store.arena().stats();
        assert_eq!(stats.allocated - stats.free, store.open_chunks());

        let mut txn = store.take(xid).unwrap();
        txn.purge(store.arena());
        let stats = store.arena().stats();
        assert_eq!(stats.allocated, stats.free);
        assert_eq!(store.open_chunks(), 0);
    }

    #[test]
    fn test_skip_list() {
        let mut store = store();
        let xid = Xid::new(5, 5, 5);
        assert!(!store.is_skipped(xid));
        store.skip_xid(xid);
        assert!(store.is_skipped(xid));
    }
}
