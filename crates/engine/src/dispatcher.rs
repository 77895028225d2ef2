use std::collections::HashMap;

use redolink_common::{Endian, RedoError, Result, RowId, RowImage, Seq, Xid};
use redolink_redo::ops::{
    parse_attributes, parse_colnums, DdlHeader, LobPageHeader, MultiRowHeader, RowHeader,
    SupplementalHeader, TxnCtl, UndoHeader,
};
use redolink_redo::record::{RedoRecord, RECORD_HEADER_SIZE};
use redolink_redo::vector::{ChangeVector, OpCode};
use redolink_schema::{DictChange, Schema, Table};
use redolink_txn::chunk::{decode_columns, ColValue, EntryCode, EntryMeta};
use redolink_txn::{CommittedTxn, FlushOptions, LobAssembler, Transaction, TransactionStore};
use tracing::{debug, warn};

/// Parser-side state the opcode dispatcher updates. Owned by the single
/// parser task.
pub struct ParseContext {
    pub schema: Schema,
    pub store: TransactionStore,
    pub lobs: LobAssembler,
    pub options: FlushOptions,
    pub thread: u16,
    pub show_ddl: bool,
    /// Commits at or below this SCN were delivered before the checkpoint
    /// being replayed from; replaying them again must stay silent.
    pub resume_scn: Option<redolink_common::Scn>,
    /// Multi-part DDL statements under assembly, keyed by XID.
    ddl_parts: HashMap<u64, String>,
    /// One-shot missing-table warnings.
    schema_miss_warned: std::collections::HashSet<u32>,
    pub rows_skipped_schema_miss: u64,
}

impl ParseContext {
    pub fn new(schema: Schema, store: TransactionStore, options: FlushOptions, show_ddl: bool) -> Self {
        Self {
            schema,
            store,
            lobs: LobAssembler::new(),
            options,
            thread: 1,
            show_ddl,
            resume_scn: None,
            ddl_parts: HashMap::new(),
            schema_miss_warned: std::collections::HashSet::new(),
            rows_skipped_schema_miss: 0,
        }
    }
}

/// What one record produced.
#[derive(Default)]
pub struct DispatchResult {
    pub committed: Vec<CommittedTxn>,
    pub schema_changed: bool,
}

/// Walk a record's change vectors and update transaction state. DML arrives
/// as an undo vector (5.1) immediately followed by its redo vector
/// (layer 11), optionally trailed by a supplemental vector (11.16).
pub fn dispatch_record(
    ctx: &mut ParseContext,
    endian: Endian,
    seq: Seq,
    record: &RedoRecord,
) -> Result<DispatchResult> {
    let mut result = DispatchResult::default();

    // Split into vectors first; pairing is positional.
    let mut vectors = Vec::new();
    let mut pos = RECORD_HEADER_SIZE;
    while pos + 4 <= record.data.len() && record.data[pos] != 0 {
        let vector = ChangeVector::parse(endian, &record.data, pos, record.offset)?;
        pos += vector.size;
        vectors.push(vector);
    }

    let mut i = 0;
    while i < vectors.len() {
        let vector = &vectors[i];
        match vector.opcode {
            OpCode::BEGIN => {
                let ctl = TxnCtl::parse(endian, vector)?;
                if !ctx.store.is_skipped(ctl.xid) {
                    let thread = ctx.thread;
                    let txn = ctx.store.begin(ctl.xid, thread);
                    txn.begin_scn = record.scn;
                    txn.begin_seq = seq;
                    txn.begin_offset = record.offset;
                    txn.begin_time = record.lwn_timestamp;
                    txn.note_position(seq, record.offset);
                }
            }
            OpCode::COMMIT | OpCode::ROLLBACK => {
                let ctl = TxnCtl::parse(endian, vector)?;
                let rollback = vector.opcode == OpCode::ROLLBACK || ctl.is_rollback();
                let already_delivered = ctx.resume_scn.is_some_and(|limit| record.scn <= limit);
                if let Some(mut txn) = ctx.store.take(ctl.xid) {
                    if rollback || already_delivered {
                        txn.rollback = rollback;
                        txn.purge(ctx.store.arena());
                    } else {
                        txn.commit_scn = record.scn;
                        txn.commit_seq = seq;
                        txn.commit_sub_scn = record.sub_scn;
                        txn.commit_time = record.lwn_timestamp;
                        if txn.system {
                            apply_system_txn(&mut ctx.schema, &txn)?;
                            ctx.schema.rebuild_touched();
                            result.schema_changed = true;
                        }
                        let committed = txn.flush(&ctx.schema, &mut ctx.lobs, &ctx.options)?;
                        ctx.rows_skipped_schema_miss += committed.skipped_schema_miss;
                        result.committed.push(committed);
                        txn.purge(ctx.store.arena());
                    }
                }
            }
            OpCode::ROLLBACK_TO_SAVEPOINT => {
                let header = UndoHeader::parse(endian, vector)?;
                let savepoint = vector.uba;
                let arena = std::sync::Arc::clone(arena_of(&ctx.store));
                if let Some(txn) = ctx.store.get_mut(header.xid) {
                    txn.rollback_to_savepoint(&arena, savepoint);
                }
            }
            OpCode::ROLLBACK_OP => {
                let header = UndoHeader::parse(endian, vector)?;
                let target = vector.uba;
                let arena = std::sync::Arc::clone(arena_of(&ctx.store));
                if let Some(txn) = ctx.store.get_mut(header.xid) {
                    txn.rollback_last_op(&arena, target);
                }
            }
            OpCode::SESSION_ATTRIBUTES | OpCode::TXN_ATTRIBUTES => {
                let (xid, pairs) = parse_attributes(endian, vector)?;
                if !ctx.store.is_skipped(xid) {
                    let thread = ctx.thread;
                    let txn = ctx.store.get_or_create(xid, thread);
                    txn.attributes.extend(pairs);
                }
            }
            OpCode::DDL_MARKER | OpCode::DDL_MARKER2 | OpCode::DDL_TEXT => {
                dispatch_ddl(ctx, endian, seq, record, vector)?;
            }
            OpCode::UNDO => {
                let consumed = dispatch_dml(ctx, endian, seq, record, &vectors, i)?;
                i += consumed;
                continue;
            }
            OpCode::SUPPLEMENTAL => {
                warn!(offset = %record.offset, "supplemental vector without a paired DML, ignored");
            }
            op if op.layer == 26 || op.layer == 19 || op.layer == 20 => {
                dispatch_lob(ctx, endian, vector)?;
            }
            op if op.layer == 10 => {
                // index maintenance; row emission never needs it
            }
            op => {
                debug!(opcode = %op, offset = %record.offset, "unhandled opcode, skipped");
            }
        }
        i += 1;
    }

    Ok(result)
}

fn arena_of(store: &TransactionStore) -> &std::sync::Arc<redolink_txn::Arena> {
    store.arena_arc()
}

// ---------------------------------------------------------------------------
// DML pairing
// ---------------------------------------------------------------------------

/// Handle a 5.1 undo vector and its paired redo vector. Returns how many
/// vectors were consumed.
fn dispatch_dml(
    ctx: &mut ParseContext,
    endian: Endian,
    seq: Seq,
    record: &RedoRecord,
    vectors: &[ChangeVector<'_>],
    index: usize,
) -> Result<usize> {
    let undo = &vectors[index];
    let header = UndoHeader::parse(endian, undo)?;
    let Some(redo) = vectors.get(index + 1) else {
        debug!(offset = %record.offset, "undo vector without redo pair, skipped");
        return Ok(1);
    };
    let mirror = OpCode::new(header.mirror_layer, header.mirror_op);
    if redo.opcode.layer != 11 || redo.opcode != mirror {
        debug!(
            offset = %record.offset,
            undo_mirror = %mirror,
            redo = %redo.opcode,
            "undo/redo pair mismatch, skipped"
        );
        return Ok(1);
    }
    // paired vectors describe one row: addresses must agree
    if redo.obj != undo.obj || redo.bdba != undo.bdba || redo.slot != undo.slot {
        return Err(RedoError::malformed(
            record.offset,
            format!(
                "undo {{obj {}, dba {}, slot {}}} does not match redo {{obj {}, dba {}, slot {}}}",
                undo.obj, undo.bdba, undo.slot, redo.obj, redo.bdba, redo.slot
            ),
        ));
    }

    let supplemental = vectors
        .get(index + 2)
        .filter(|v| v.opcode == OpCode::SUPPLEMENTAL);
    let consumed = if supplemental.is_some() { 3 } else { 2 };

    if ctx.store.is_skipped(header.xid) {
        return Ok(consumed);
    }

    let code = match redo.opcode {
        OpCode::INSERT => EntryCode::Insert,
        OpCode::DELETE => EntryCode::Delete,
        OpCode::UPDATE => EntryCode::Update,
        OpCode::OVERWRITE => EntryCode::Overwrite,
        OpCode::LOCK => EntryCode::Lock,
        OpCode::MULTI_INSERT => EntryCode::Insert,
        OpCode::MULTI_DELETE => EntryCode::Delete,
        other => {
            debug!(opcode = %other, offset = %record.offset, "unsupported DML redo opcode");
            return Ok(consumed);
        }
    };

    let is_system = ctx
        .schema
        .table_for_obj(redo.obj)
        .is_some_and(|t| t.is_system());
    warn_schema_miss(ctx, redo.obj);

    // supplemental columns land in the before image unless flagged after
    let mut supp_before = Vec::new();
    let mut supp_after = Vec::new();
    if let Some(supp) = supplemental {
        let header = SupplementalHeader::parse(endian, supp.field(1)?, record.offset)?;
        let cols = read_columns(endian, supp, 2, record.offset)?;
        let target = if header.is_after { &mut supp_after } else { &mut supp_before };
        target.extend(cols.into_iter().map(|mut c| {
            c.supplemental = true;
            c
        }));
    }

    let meta_base = EntryMeta {
        code,
        flags: 0,
        scn: record.scn,
        sub_scn: record.sub_scn,
        slot: redo.slot,
        uba: undo.uba,
        obj: redo.obj,
        data_obj: redo.data_obj,
        bdba: redo.bdba,
        file_offset: record.offset,
    };

    let arena = std::sync::Arc::clone(arena_of(&ctx.store));
    let thread = ctx.thread;

    if redo.opcode == OpCode::MULTI_INSERT || redo.opcode == OpCode::MULTI_DELETE {
        // one vector, nrow rows sharing a slot table; emit one entry per row
        let multi = MultiRowHeader::parse(endian, redo.field(1)?, record.offset)?;
        let slots = parse_colnums(endian, redo.field(2)?, record.offset)?;
        if slots.len() != multi.nrow as usize {
            return Err(RedoError::malformed(
                record.offset,
                format!("slot table has {} entries for nrow {}", slots.len(), multi.nrow),
            ));
        }
        let txn = ctx.store.get_or_create(header.xid, thread);
        txn.note_position(seq, record.offset);
        txn.system |= is_system;
        let mut field = 3u16;
        for (row, slot) in slots.iter().enumerate() {
            let mut cols = Vec::with_capacity(multi.cc as usize);
            for colnum in 0..multi.cc as u16 {
                let value = redo.field(field)?;
                field += 1;
                cols.push(ColValue {
                    colnum,
                    supplemental: false,
                    value: if value.is_empty() { None } else { Some(value.to_vec()) },
                });
            }
            let mut meta = meta_base;
            meta.slot = *slot;
            let (before, after) = match code {
                EntryCode::Insert => (Vec::new(), cols),
                _ => (cols, Vec::new()),
            };
            txn.add_entry(&arena, meta, &before, &after)?;
            debug!(row, slot, "multi-row entry buffered");
        }
        return Ok(consumed);
    }

    // single-row shapes: undo carries the before image, redo the after image
    let mut before = read_columns_after_row_header(endian, undo, 2, record.offset)?;
    before.extend(supp_before);
    let mut after = read_columns_after_row_header(endian, redo, 1, record.offset)?;
    after.extend(supp_after);

    let txn = ctx.store.get_or_create(header.xid, thread);
    txn.note_position(seq, record.offset);
    txn.system |= is_system;
    txn.add_entry(&arena, meta_base, &before, &after)?;
    Ok(consumed)
}

/// Parse `{RowHeader, colnums, values...}` starting at `first_field`.
fn read_columns_after_row_header(
    endian: Endian,
    vector: &ChangeVector<'_>,
    first_field: u16,
    offset: redolink_common::FileOffset,
) -> Result<Vec<ColValue>> {
    if vector.field_count < first_field + 1 {
        return Ok(Vec::new());
    }
    let row_header = RowHeader::parse(endian, vector.field(first_field)?, offset)?;
    if row_header.cc == 0 {
        return Ok(Vec::new());
    }
    read_columns(endian, vector, first_field + 1, offset)
}

/// Parse `{colnums, values...}` starting at `first_field`.
fn read_columns(
    endian: Endian,
    vector: &ChangeVector<'_>,
    first_field: u16,
    offset: redolink_common::FileOffset,
) -> Result<Vec<ColValue>> {
    let colnums = parse_colnums(endian, vector.field(first_field)?, offset)?;
    let mut out = Vec::with_capacity(colnums.len());
    for (i, colnum) in colnums.iter().enumerate() {
        let value = vector.field(first_field + 1 + i as u16)?;
        out.push(ColValue {
            colnum: *colnum,
            supplemental: false,
            value: if value.is_empty() { None } else { Some(value.to_vec()) },
        });
    }
    Ok(out)
}

fn warn_schema_miss(ctx: &mut ParseContext, obj: u32) {
    if ctx.schema.table_for_obj(obj).is_none()
        && !ctx.options.schemaless
        && ctx.schema_miss_warned.insert(obj)
    {
        warn!(obj, "DML references an object with no table descriptor; rows will be skipped");
    }
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

fn dispatch_ddl(
    ctx: &mut ParseContext,
    endian: Endian,
    seq: Seq,
    record: &RedoRecord,
    vector: &ChangeVector<'_>,
) -> Result<()> {
    if !ctx.show_ddl {
        return Ok(());
    }
    let header = DdlHeader::parse(endian, vector.field(1)?, record.offset)?;
    let text = String::from_utf8_lossy(vector.field(2)?).into_owned();
    let buffer = ctx.ddl_parts.entry(header.xid.to_u64()).or_default();
    buffer.push_str(&text);

    if header.part >= header.total {
        let text = ctx.ddl_parts.remove(&header.xid.to_u64()).unwrap_or_default();
        let arena = std::sync::Arc::clone(arena_of(&ctx.store));
        let thread = ctx.thread;
        let txn = ctx.store.get_or_create(header.xid, thread);
        txn.note_position(seq, record.offset);
        let meta = EntryMeta {
            code: EntryCode::Ddl,
            flags: header.ddl_type,
            scn: record.scn,
            sub_scn: record.sub_scn,
            slot: 0,
            uba: vector.uba,
            obj: vector.obj,
            data_obj: vector.data_obj,
            bdba: vector.bdba,
            file_offset: record.offset,
        };
        txn.add_raw(&arena, meta, text.as_bytes(), &[])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LOB
// ---------------------------------------------------------------------------

fn dispatch_lob(
    ctx: &mut ParseContext,
    endian: Endian,
    vector: &ChangeVector<'_>,
) -> Result<()> {
    if vector.field_count < 2 {
        return Ok(());
    }
    let header = LobPageHeader::parse(endian, vector.field(1)?, vector.record_offset)?;
    let data = vector.field(2)?;
    if data.is_empty() {
        return Ok(());
    }
    ctx.lobs
        .add_page(vector.obj, header.lob_id, header.page_no, data.to_vec());
    Ok(())
}

// ---------------------------------------------------------------------------
// Dictionary transactions
// ---------------------------------------------------------------------------

/// Apply a committed schema transaction's dictionary DML to the shadow. Runs
/// before the transaction's own flush so readers observe the pre- or
/// post-update snapshot, never a partial one.
fn apply_system_txn(schema: &mut Schema, txn: &Transaction) -> Result<()> {
    let mut changes: Vec<(redolink_schema::SystemTableKind, String, DictChange, RowId, RowImage)> =
        Vec::new();

    txn.for_each_entry(|entry| {
        let Some(table) = schema.table_for_obj(entry.meta.obj) else {
            return Ok(());
        };
        if !table.is_system() {
            return Ok(());
        }
        let kind = table.system_kind;
        let name = table.name.clone();
        let row_id = RowId::new(entry.meta.data_obj, entry.meta.bdba, entry.meta.slot);

        let before = decode_columns(entry.before)?;
        let after = decode_columns(entry.after)?;
        let (change, image) = match entry.meta.code {
            EntryCode::Insert => (DictChange::Insert, dict_image(table, &after)),
            EntryCode::Delete => (DictChange::Delete, dict_image(table, &before)),
            EntryCode::Update | EntryCode::Overwrite => {
                // after image overlaid on the before image
                let mut merged = dict_image(table, &before);
                for (name, value) in dict_image(table, &after).columns {
                    merged.set(&name, value);
                }
                (DictChange::Update, merged)
            }
            EntryCode::Lock | EntryCode::Ddl => return Ok(()),
        };
        changes.push((kind, name, change, row_id, image));
        Ok(())
    })?;

    for (kind, name, change, row_id, image) in changes {
        schema.apply_change(kind, &name, change, row_id, &image)?;
    }
    Ok(())
}

/// Dictionary rows are decoded with every column visible.
fn dict_image(table: &Table, columns: &[ColValue]) -> RowImage {
    let mut image = RowImage::default();
    for col in columns {
        if let Some(column) = table.column_by_seg_index(col.colnum) {
            image.set(&column.name, col.value.clone());
        }
    }
    image
}

/// Skip-list registration for a transaction that exhausted the arena.
pub fn register_skip(ctx: &mut ParseContext, xid: Xid) {
    warn!(%xid, "transaction added to the skip list");
    if let Some(mut txn) = ctx.store.take(xid) {
        txn.purge(ctx.store.arena());
    }
    ctx.store.skip_xid(xid);
}
