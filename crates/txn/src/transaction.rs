use std::collections::BTreeMap;

use redolink_common::{
    DdlEvent, DmlKind, FileOffset, RedoError, Result, RowEvent, RowImage, Scn, Seq, Time,
    TxnHeader, Uba, Xid,
};
use redolink_schema::{ColumnVisibility, Schema, Table};
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::chunk::{
    decode_columns, encode_columns, entry_size, ColValue, EntryCode, EntryMeta, TxChunk,
    ENTRY_FLAG_ROLLED_BACK,
};
use crate::lob::{decode_character_lob, LobAssembler};
use crate::xmltype::decode_binary_xml;
use redolink_redo::ops::{LobLocator, LOB_LOCATOR_FLAG_XML_BINARY};

/// Emission-side switches, derived from the engine flags.
#[derive(Clone, Copy, Debug)]
pub struct FlushOptions {
    /// Emit unmapped objects as `OBJ_<n>` instead of skipping them.
    pub schemaless: bool,
    /// Promote after-images for missing NOT NULL key columns.
    pub not_null_missing: bool,
    /// Decode binary XMLType payloads.
    pub experimental_xmltype: bool,
    pub visibility: ColumnVisibility,
    /// Byte order of the redo file the images came from; locators are kept
    /// in their wire form.
    pub endian: redolink_common::Endian,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            schemaless: false,
            not_null_missing: false,
            experimental_xmltype: false,
            visibility: ColumnVisibility::default(),
            endian: redolink_common::Endian::Little,
        }
    }
}

#[derive(Debug)]
pub enum TxnEvent {
    Row(RowEvent),
    Ddl(DdlEvent),
}

/// A committed transaction materialized for the emitter queue. Owns all its
/// bytes; the arena chunks are already back on the free list by the time
/// this crosses to the writer.
#[derive(Debug)]
pub struct CommittedTxn {
    pub header: TxnHeader,
    pub events: Vec<TxnEvent>,
    pub skipped_schema_miss: u64,
}

/// In-flight transaction: identity, position bookkeeping and the chunk
/// chain of buffered operations.
pub struct Transaction {
    pub xid: Xid,
    pub thread: u16,
    pub begin_seen: bool,
    pub begin_scn: Scn,
    pub begin_seq: Seq,
    pub begin_offset: FileOffset,
    pub begin_time: Time,
    pub commit_scn: Scn,
    pub commit_seq: Seq,
    pub commit_sub_scn: u16,
    pub commit_time: Time,
    /// Earliest position any entry of this transaction appeared at; feeds
    /// the checkpointer's min-open-txn.
    pub first_seq: Seq,
    pub first_offset: FileOffset,
    pub rollback: bool,
    pub system: bool,
    pub size: u64,
    pub attributes: BTreeMap<String, String>,
    chunks: Vec<TxChunk>,
}

impl Transaction {
    pub fn new(xid: Xid, thread: u16) -> Transaction {
        Transaction {
            xid,
            thread,
            begin_seen: false,
            begin_scn: Scn::NONE,
            begin_seq: Seq::NONE,
            begin_offset: FileOffset::ZERO,
            begin_time: Time(0),
            commit_scn: Scn::NONE,
            commit_seq: Seq::NONE,
            commit_sub_scn: 0,
            commit_time: Time(0),
            first_seq: Seq::NONE,
            first_offset: FileOffset::ZERO,
            rollback: false,
            system: false,
            size: 0,
            attributes: BTreeMap::new(),
            chunks: Vec::new(),
        }
    }

    pub fn note_position(&mut self, seq: Seq, offset: FileOffset) {
        if self.first_seq.is_none()
            || seq < self.first_seq
            || (seq == self.first_seq && offset < self.first_offset)
        {
            self.first_seq = seq;
            self.first_offset = offset;
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn entry_count(&self) -> usize {
        self.chunks.iter().map(TxChunk::entries).sum()
    }

    /// Append one operation, growing the chunk chain as needed.
    pub fn add_entry(
        &mut self,
        arena: &Arena,
        meta: EntryMeta,
        before: &[ColValue],
        after: &[ColValue],
    ) -> Result<()> {
        self.add_raw(arena, meta, &encode_columns(before), &encode_columns(after))
    }

    /// Append with pre-encoded images (DDL text rides in `before`).
    pub fn add_raw(
        &mut self,
        arena: &Arena,
        meta: EntryMeta,
        before: &[u8],
        after: &[u8],
    ) -> Result<()> {
        let needed = entry_size(before, after);
        if needed > redolink_common::CHUNK_SIZE {
            return Err(RedoError::Dictionary(format!(
                "operation of {} bytes exceeds the chunk size",
                needed
            )));
        }
        let fits = self.chunks.last().is_some_and(|c| c.fits(before, after));
        if !fits {
            let chunk = arena.alloc(self.xid)?;
            self.chunks.push(TxChunk::new(chunk));
        }
        self.chunks.last_mut().unwrap().append(&meta, before, after);
        self.size += needed as u64;
        Ok(())
    }

    /// 5.11: drop the most recent entry whose undo address matches. A match
    /// at the chain tail is physically removed; a mid-chain match is
    /// tombstoned.
    pub fn rollback_last_op(&mut self, arena: &Arena, uba: Uba) {
        let mut chunk_idx = self.chunks.len();
        while chunk_idx > 0 {
            chunk_idx -= 1;
            let is_tail_chunk = chunk_idx == self.chunks.len() - 1;
            let chunk = &self.chunks[chunk_idx];
            let mut offset = chunk.last_offset();
            let mut is_tail_entry = is_tail_chunk;
            while let Some(off) = offset {
                let entry = match chunk.entry_at(off) {
                    Ok(e) => e,
                    Err(_) => return,
                };
                if entry.meta.flags & ENTRY_FLAG_ROLLED_BACK == 0 && entry.meta.uba == uba {
                    let size = entry_size(entry.before, entry.after) as u64;
                    if is_tail_entry {
                        let chunk = &mut self.chunks[chunk_idx];
                        let _ = chunk.drop_last();
                        self.size -= size;
                        if chunk.is_empty() {
                            let empty = self.chunks.remove(chunk_idx);
                            arena.free(empty.into_chunk());
                        }
                    } else {
                        let _ = self.chunks[chunk_idx].mark_rolled_back(off);
                    }
                    return;
                }
                offset = chunk.prev_offset(off).unwrap_or(None);
                is_tail_entry = false;
            }
        }
        debug!(xid = %self.xid, %uba, "single-op rollback found no matching entry");
    }

    /// 5.6: drop every entry above the savepoint address. Entries append in
    /// UBA order, so this is a suffix truncation of the chain.
    pub fn rollback_to_savepoint(&mut self, arena: &Arena, savepoint: Uba) {
        loop {
            let Some(chunk) = self.chunks.last_mut() else {
                return;
            };
            let Some(off) = chunk.last_offset() else {
                let empty = self.chunks.pop().unwrap();
                arena.free(empty.into_chunk());
                continue;
            };
            let Ok(entry) = chunk.entry_at(off) else {
                return;
            };
            if entry.meta.uba <= savepoint {
                return;
            }
            let size = entry_size(entry.before, entry.after) as u64;
            let _ = chunk.drop_last();
            self.size -= size;
            if chunk.is_empty() {
                let empty = self.chunks.pop().unwrap();
                arena.free(empty.into_chunk());
            }
        }
    }

    /// Visit every live entry in insertion order.
    pub fn for_each_entry<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(crate::chunk::EntryView<'_>) -> Result<()>,
    {
        for chunk in &self.chunks {
            for offset in chunk.offsets() {
                let entry = chunk.entry_at(offset)?;
                if entry.meta.flags & ENTRY_FLAG_ROLLED_BACK == 0 {
                    f(entry)?;
                }
            }
        }
        Ok(())
    }

    /// Return every chunk to the arena.
    pub fn purge(&mut self, arena: &Arena) {
        for chunk in self.chunks.drain(..) {
            arena.free(chunk.into_chunk());
        }
        self.size = 0;
    }

    // -----------------------------------------------------------------------
    // Commit replay
    // -----------------------------------------------------------------------

    /// Replay the buffered operations in insertion order into sink events,
    /// applying supplemental merge, update minimization and schema
    /// projection. Does not consume the chunks; the store purges after the
    /// result is queued.
    pub fn flush(
        &self,
        schema: &Schema,
        lobs: &mut LobAssembler,
        options: &FlushOptions,
    ) -> Result<CommittedTxn> {
        let mut events = Vec::new();
        let mut skipped_schema_miss = 0u64;

        for chunk in &self.chunks {
            for offset in chunk.offsets() {
                let entry = chunk.entry_at(offset)?;
                if entry.meta.flags & ENTRY_FLAG_ROLLED_BACK != 0 {
                    continue;
                }
                match entry.meta.code {
                    EntryCode::Ddl => {
                        let text = String::from_utf8_lossy(entry.before).into_owned();
                        let table = schema
                            .table_for_obj(entry.meta.obj)
                            .map(|t| t.qualified_name());
                        events.push(TxnEvent::Ddl(DdlEvent {
                            table,
                            obj: entry.meta.obj,
                            text,
                            offset: entry.meta.file_offset,
                        }));
                    }
                    EntryCode::Lock => {
                        // supplemental columns only; nothing to emit
                    }
                    code => {
                        let table = schema.table_for_obj(entry.meta.obj);
                        if table.is_none() && !options.schemaless {
                            skipped_schema_miss += 1;
                            continue;
                        }
                        let before_cols = decode_columns(entry.before)?;
                        let after_cols = decode_columns(entry.after)?;
                        if let Some(event) = self.project_row(
                            schema,
                            lobs,
                            options,
                            table.map(|t| t.as_ref()),
                            code,
                            &entry.meta,
                            before_cols,
                            after_cols,
                        )? {
                            events.push(TxnEvent::Row(event));
                        }
                    }
                }
            }
        }

        Ok(CommittedTxn {
            header: self.header(),
            events,
            skipped_schema_miss,
        })
    }

    pub fn header(&self) -> TxnHeader {
        TxnHeader {
            xid: self.xid,
            thread: self.thread,
            begin_seq: self.begin_seq,
            begin_scn: self.begin_scn,
            begin_time: self.begin_time,
            commit_seq: self.commit_seq,
            commit_scn: self.commit_scn,
            commit_sub_scn: self.commit_sub_scn,
            commit_time: self.commit_time,
            attributes: self.attributes.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn project_row(
        &self,
        schema: &Schema,
        lobs: &mut LobAssembler,
        options: &FlushOptions,
        table: Option<&Table>,
        code: EntryCode,
        meta: &EntryMeta,
        before_cols: Vec<ColValue>,
        after_cols: Vec<ColValue>,
    ) -> Result<Option<RowEvent>> {
        let kind = match code {
            EntryCode::Insert => DmlKind::Insert,
            EntryCode::Delete => DmlKind::Delete,
            EntryCode::Update | EntryCode::Overwrite => DmlKind::Update,
            EntryCode::Lock | EntryCode::Ddl => unreachable!("handled by caller"),
        };

        // dictionary DML feeds the schema shadow, never the sink
        if table.is_some_and(Table::is_system) {
            return Ok(None);
        }

        let table_name = table
            .map(Table::qualified_name)
            .unwrap_or_else(|| format!("OBJ_{}", meta.obj));

        // Merge: undo-image columns first, supplemental fills the gaps.
        let mut before = merge_before(before_cols);
        let mut after = after_cols;

        match kind {
            DmlKind::Insert => before.clear(),
            DmlKind::Delete => after.clear(),
            DmlKind::Update => {
                if let Some(table) = table {
                    self.merge_update(table, options, &mut before, &mut after);
                }
            }
        }

        let before_image = self.build_image(schema, lobs, options, table, meta, &before)?;
        let after_image = self.build_image(schema, lobs, options, table, meta, &after)?;

        // Row filter: inserts and updates are judged on the after image,
        // deletes on the before image.
        if let Some(table) = table {
            if let Some(condition) = &table.condition {
                let judged = match kind {
                    DmlKind::Delete => &before_image,
                    _ => &after_image,
                };
                if !condition.eval(judged, &self.attributes) {
                    return Ok(None);
                }
            }
        }

        Ok(Some(RowEvent {
            kind,
            table: table_name,
            obj: meta.obj,
            data_obj: meta.data_obj,
            bdba: meta.bdba,
            slot: meta.slot,
            scn: meta.scn,
            before: match kind {
                DmlKind::Insert => None,
                _ => Some(before_image),
            },
            after: match kind {
                DmlKind::Delete => None,
                _ => Some(after_image),
            },
            offset: meta.file_offset,
        }))
    }

    /// Update-specific image shaping: key propagation, minimization and the
    /// NOT-NULL-missing promotion.
    fn merge_update(
        &self,
        table: &Table,
        options: &FlushOptions,
        before: &mut Vec<ColValue>,
        after: &mut Vec<ColValue>,
    ) {
        // Key columns present only in the before image carry over to the
        // after image (the row still has them after the update).
        for b in before.iter() {
            let is_pk = table
                .column_by_seg_index(b.colnum)
                .is_some_and(|c| c.num_pk > 0);
            if is_pk && !after.iter().any(|a| a.colnum == b.colnum) {
                after.push(ColValue {
                    colnum: b.colnum,
                    supplemental: false,
                    value: b.value.clone(),
                });
            }
        }
        after.sort_by_key(|c| c.colnum);

        // Update minimization: unchanged non-key columns drop out unless the
        // element asked for full updates.
        if !table.options.full_update {
            after.retain(|a| {
                let column = table.column_by_seg_index(a.colnum);
                let is_pk = column.is_some_and(|c| c.num_pk > 0);
                if is_pk {
                    return true;
                }
                match before.iter().find(|b| b.colnum == a.colnum) {
                    Some(b) => b.value != a.value,
                    None => true,
                }
            });
        }

        // NOT-NULL-missing: a key column absent from the before image (or
        // present but empty) takes its after-image value.
        if options.not_null_missing {
            for a in after.iter() {
                let column = match table.column_by_seg_index(a.colnum) {
                    Some(c) => c,
                    None => continue,
                };
                if column.nullable || column.num_pk == 0 {
                    continue;
                }
                let missing = match before.iter().find(|b| b.colnum == a.colnum) {
                    None => true,
                    Some(b) => b.value.as_deref().is_some_and(|v| v.is_empty()),
                };
                if missing {
                    before.retain(|b| b.colnum != a.colnum);
                    before.push(ColValue {
                        colnum: a.colnum,
                        supplemental: true,
                        value: a.value.clone(),
                    });
                }
            }
            before.sort_by_key(|c| c.colnum);
        }
    }

    /// Project a column list into a named row image, applying visibility,
    /// maxSegCol truncation and LOB/XMLType resolution.
    fn build_image(
        &self,
        schema: &Schema,
        lobs: &mut LobAssembler,
        options: &FlushOptions,
        table: Option<&Table>,
        meta: &EntryMeta,
        columns: &[ColValue],
    ) -> Result<RowImage> {
        let mut image = RowImage::default();
        for col in columns {
            let Some(table) = table else {
                image.set(&format!("COL_{}", col.colnum), col.value.clone());
                continue;
            };
            // columns beyond the descriptor are a stale-width artifact
            let Some(column) = table.column_by_seg_index(col.colnum) else {
                continue;
            };
            let visibility = options.visibility;
            if (column.hidden && !visibility.hidden)
                || (column.guard && !visibility.guard)
                || (column.unused && !visibility.unused)
            {
                continue;
            }

            let mut value = col.value.clone();
            if column.col_type.is_lob() || column.stored_as_lob {
                value = match value {
                    Some(bytes) => self.resolve_lob(
                        schema, lobs, options, table, column.int_col, &bytes, meta,
                    ),
                    None => None,
                };
            }
            image.set(&column.name, value);
        }
        Ok(image)
    }

    /// Locator → assembled value, NULL with a warning when resolution fails.
    fn resolve_lob(
        &self,
        schema: &Schema,
        lobs: &mut LobAssembler,
        options: &FlushOptions,
        table: &Table,
        int_col: i32,
        bytes: &[u8],
        meta: &EntryMeta,
    ) -> Option<Vec<u8>> {
        let locator = match LobLocator::parse(options.endian, bytes, meta.file_offset) {
            Ok(l) => l,
            Err(_) => {
                warn!(
                    table = %table.qualified_name(),
                    int_col,
                    offset = %meta.file_offset,
                    "lob column carries no valid locator, emitting raw bytes"
                );
                return Some(bytes.to_vec());
            }
        };

        let Some(lob) = table.lob_for_int_col(int_col) else {
            lobs.warn_unresolved(locator.lob_id, &table.qualified_name(), "?", meta.file_offset);
            return None;
        };

        let column = table.columns.iter().find(|c| c.int_col == int_col);
        let raw = match lobs.assemble(&locator, lob) {
            Ok(data) => data,
            Err(_) => {
                let name = column.map(|c| c.name.as_str()).unwrap_or("?");
                lobs.warn_unresolved(locator.lob_id, &table.qualified_name(), name, meta.file_offset);
                return None;
            }
        };

        let column = column?;
        if column.xml_type
            && locator_is_binary_xml(&locator)
            && options.experimental_xmltype
        {
            if let Some(dicts) = schema.xml_dicts_for_obj(table.obj) {
                match decode_binary_xml(&raw, dicts) {
                    Ok(text) => return Some(text.into_bytes()),
                    Err(e) => {
                        warn!(table = %table.qualified_name(), column = %column.name, error = %e, "binary xml decode failed, emitting raw");
                        return Some(raw);
                    }
                }
            }
        }
        if column.col_type.is_character() {
            match decode_character_lob(&raw, column.charset_id) {
                Ok(decoded) => return Some(decoded),
                Err(e) => {
                    warn!(table = %table.qualified_name(), column = %column.name, error = %e, "charset decode failed, emitting raw");
                    return Some(raw);
                }
            }
        }
        Some(raw)
    }
}

fn locator_is_binary_xml(locator: &LobLocator) -> bool {
    locator.flags & LOB_LOCATOR_FLAG_XML_BINARY != 0
}

/// Fold undo and supplemental columns into one before image; undo columns
/// win on collision.
fn merge_before(columns: Vec<ColValue>) -> Vec<ColValue> {
    let mut out: Vec<ColValue> = Vec::with_capacity(columns.len());
    for col in columns {
        match out.iter().position(|c| c.colnum == col.colnum) {
            Some(i) => {
                if out[i].supplemental && !col.supplemental {
                    out[i] = col;
                }
            }
            None => out.push(col),
        }
    }
    out.sort_by_key(|c| c.colnum);
    out
}
