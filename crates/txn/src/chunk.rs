use redolink_common::{DataObj, Dba, FileOffset, Obj, RedoError, Result, Scn, Uba};

use crate::arena::Chunk;

/// Chunk entry header. Fixed offsets, stored little-endian (this is the
/// in-memory buffering format, independent of the redo file byte order):
///   [0..4]   u32 total_len (header + images, 4-aligned)
///   [4..8]   u32 prev_len  (total_len of the previous entry, 0 if first)
///   [8..10]  u16 code
///   [10..12] u16 flags
///   [12..20] u64 scn
///   [20..22] u16 sub_scn
///   [22..24] u16 slot
///   [24..32] u64 uba
///   [32..36] u32 obj
///   [36..40] u32 data_obj
///   [40..44] u32 bdba
///   [44..48] u32 before_len
///   [48..52] u32 after_len
///   [52..60] u64 file_offset
///   [60..64] pad
pub const ENTRY_HEADER_SIZE: usize = 64;

/// Entry rolled back by a 5.11 that did not land on the chain tail.
pub const ENTRY_FLAG_ROLLED_BACK: u16 = 0x0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum EntryCode {
    Insert = 1,
    Delete = 2,
    Update = 3,
    Overwrite = 4,
    Lock = 5,
    Ddl = 6,
}

impl EntryCode {
    pub fn from_raw(raw: u16) -> Option<EntryCode> {
        match raw {
            1 => Some(EntryCode::Insert),
            2 => Some(EntryCode::Delete),
            3 => Some(EntryCode::Update),
            4 => Some(EntryCode::Overwrite),
            5 => Some(EntryCode::Lock),
            6 => Some(EntryCode::Ddl),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EntryMeta {
    pub code: EntryCode,
    pub flags: u16,
    pub scn: Scn,
    pub sub_scn: u16,
    pub slot: u16,
    pub uba: Uba,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub bdba: Dba,
    pub file_offset: FileOffset,
}

/// Borrowed view of one stored entry.
#[derive(Debug)]
pub struct EntryView<'a> {
    pub meta: EntryMeta,
    pub before: &'a [u8],
    pub after: &'a [u8],
    /// Offset of the entry inside its chunk, for in-place flag updates.
    pub offset: usize,
}

// ---------------------------------------------------------------------------
// Column image encoding
// ---------------------------------------------------------------------------

/// Per-column flag bits inside an encoded image.
pub const COL_FLAG_NULL: u8 = 0x01;
/// Column came from a supplemental-log vector rather than the undo image.
pub const COL_FLAG_SUPP: u8 = 0x02;

/// One column of a stored row image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColValue {
    pub colnum: u16,
    pub supplemental: bool,
    pub value: Option<Vec<u8>>,
}

/// Encode a column list:
///   [0..2] u16 count, then per column:
///   u16 colnum, u8 flags, u8 pad, u32 len, bytes (4-aligned)
pub fn encode_columns(columns: &[ColValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + columns.len() * 16);
    out.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    for col in columns {
        let mut flags = 0u8;
        if col.value.is_none() {
            flags |= COL_FLAG_NULL;
        }
        if col.supplemental {
            flags |= COL_FLAG_SUPP;
        }
        let bytes = col.value.as_deref().unwrap_or(&[]);
        out.extend_from_slice(&col.colnum.to_le_bytes());
        out.push(flags);
        out.push(0);
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}

pub fn decode_columns(data: &[u8]) -> Result<Vec<ColValue>> {
    let corrupt = |reason: &str| RedoError::Dictionary(format!("column image: {}", reason));
    if data.len() < 4 {
        return Err(corrupt("short header"));
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let mut out = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        if pos + 8 > data.len() {
            return Err(corrupt("truncated column header"));
        }
        let colnum = u16::from_le_bytes([data[pos], data[pos + 1]]);
        let flags = data[pos + 2];
        let len =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize;
        pos += 8;
        if pos + len > data.len() {
            return Err(corrupt("column value overruns image"));
        }
        let value = if flags & COL_FLAG_NULL != 0 {
            None
        } else {
            Some(data[pos..pos + len].to_vec())
        };
        pos += len;
        pos = (pos + 3) & !3;
        out.push(ColValue {
            colnum,
            supplemental: flags & COL_FLAG_SUPP != 0,
            value,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// TxChunk
// ---------------------------------------------------------------------------

/// Arena page holding a packed run of entries. The `prev_len` back-links
/// make the tail walkable for rollback; all decoding is bounds-checked
/// against the used region.
pub struct TxChunk {
    data: Chunk,
    used: usize,
    last_len: usize,
    entries: usize,
}

impl TxChunk {
    pub fn new(data: Chunk) -> TxChunk {
        TxChunk {
            data,
            used: 0,
            last_len: 0,
            entries: 0,
        }
    }

    pub fn into_chunk(self) -> Chunk {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn fits(&self, before: &[u8], after: &[u8]) -> bool {
        self.used + entry_size(before, after) <= self.data.len()
    }

    /// Append one entry. The caller checks `fits` first; a full chunk is a
    /// caller bug, not an error.
    pub fn append(&mut self, meta: &EntryMeta, before: &[u8], after: &[u8]) {
        let total = entry_size(before, after);
        assert!(self.used + total <= self.data.len(), "chunk overflow");

        let base = self.used;
        let buf = &mut self.data[base..base + total];
        buf[0..4].copy_from_slice(&(total as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&(self.last_len as u32).to_le_bytes());
        buf[8..10].copy_from_slice(&(meta.code as u16).to_le_bytes());
        buf[10..12].copy_from_slice(&meta.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&meta.scn.0.to_le_bytes());
        buf[20..22].copy_from_slice(&meta.sub_scn.to_le_bytes());
        buf[22..24].copy_from_slice(&meta.slot.to_le_bytes());
        buf[24..32].copy_from_slice(&meta.uba.0.to_le_bytes());
        buf[32..36].copy_from_slice(&meta.obj.to_le_bytes());
        buf[36..40].copy_from_slice(&meta.data_obj.to_le_bytes());
        buf[40..44].copy_from_slice(&meta.bdba.0.to_le_bytes());
        buf[44..48].copy_from_slice(&(before.len() as u32).to_le_bytes());
        buf[48..52].copy_from_slice(&(after.len() as u32).to_le_bytes());
        buf[52..60].copy_from_slice(&meta.file_offset.0.to_le_bytes());

        let mut pos = ENTRY_HEADER_SIZE;
        buf[pos..pos + before.len()].copy_from_slice(before);
        pos += align4(before.len());
        buf[pos..pos + after.len()].copy_from_slice(after);

        self.used += total;
        self.last_len = total;
        self.entries += 1;
    }

    /// Decode the entry starting at `offset`.
    pub fn entry_at(&self, offset: usize) -> Result<EntryView<'_>> {
        let corrupt = |reason: String| RedoError::Dictionary(format!("chunk entry: {}", reason));
        if offset + ENTRY_HEADER_SIZE > self.used {
            return Err(corrupt(format!("header at {} beyond used {}", offset, self.used)));
        }
        let buf = &self.data[offset..];
        let total = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if total < ENTRY_HEADER_SIZE || offset + total > self.used {
            return Err(corrupt(format!("length {} at {} beyond used {}", total, offset, self.used)));
        }
        let before_len = u32::from_le_bytes(buf[44..48].try_into().unwrap()) as usize;
        let after_len = u32::from_le_bytes(buf[48..52].try_into().unwrap()) as usize;
        if ENTRY_HEADER_SIZE + align4(before_len) + align4(after_len) > total {
            return Err(corrupt("images overrun entry".into()));
        }
        let code_raw = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        let code = EntryCode::from_raw(code_raw)
            .ok_or_else(|| corrupt(format!("unknown entry code {}", code_raw)))?;

        let meta = EntryMeta {
            code,
            flags: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            scn: Scn(u64::from_le_bytes(buf[12..20].try_into().unwrap())),
            sub_scn: u16::from_le_bytes(buf[20..22].try_into().unwrap()),
            slot: u16::from_le_bytes(buf[22..24].try_into().unwrap()),
            uba: Uba(u64::from_le_bytes(buf[24..32].try_into().unwrap())),
            obj: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            data_obj: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            bdba: Dba(u32::from_le_bytes(buf[40..44].try_into().unwrap())),
            file_offset: FileOffset(u64::from_le_bytes(buf[52..60].try_into().unwrap())),
        };
        let before_start = offset + ENTRY_HEADER_SIZE;
        let after_start = before_start + align4(before_len);
        Ok(EntryView {
            meta,
            before: &self.data[before_start..before_start + before_len],
            after: &self.data[after_start..after_start + after_len],
            offset,
        })
    }

    /// Forward iteration over entry offsets.
    pub fn offsets(&self) -> ChunkOffsets<'_> {
        ChunkOffsets { chunk: self, pos: 0 }
    }

    pub fn last_offset(&self) -> Option<usize> {
        if self.entries == 0 {
            None
        } else {
            Some(self.used - self.last_len)
        }
    }

    /// Offset of the entry preceding the one at `offset`, walking the
    /// back-links.
    pub fn prev_offset(&self, offset: usize) -> Result<Option<usize>> {
        let entry = self.entry_at(offset)?;
        let prev_len =
            u32::from_le_bytes(self.data[offset + 4..offset + 8].try_into().unwrap()) as usize;
        debug_assert_eq!(entry.offset, offset);
        if prev_len == 0 {
            Ok(None)
        } else {
            Ok(Some(offset - prev_len))
        }
    }

    /// Drop the tail entry, restoring `last_len` from its back-link.
    pub fn drop_last(&mut self) -> Result<()> {
        let offset = self
            .last_offset()
            .ok_or_else(|| RedoError::Dictionary("drop_last on empty chunk".into()))?;
        let prev_len =
            u32::from_le_bytes(self.data[offset + 4..offset + 8].try_into().unwrap()) as usize;
        // zero the dropped region so re-insertion is bit-identical
        self.data[offset..self.used].fill(0);
        self.used = offset;
        self.last_len = prev_len;
        self.entries -= 1;
        Ok(())
    }

    /// Tombstone the entry at `offset` (mid-chain single-op rollback).
    pub fn mark_rolled_back(&mut self, offset: usize) -> Result<()> {
        let _ = self.entry_at(offset)?;
        let flags = u16::from_le_bytes(self.data[offset + 10..offset + 12].try_into().unwrap())
            | ENTRY_FLAG_ROLLED_BACK;
        self.data[offset + 10..offset + 12].copy_from_slice(&flags.to_le_bytes());
        Ok(())
    }

    /// Raw used bytes, for the bit-identical rollback property.
    pub fn raw(&self) -> &[u8] {
        &self.data[..self.used]
    }
}

pub fn entry_size(before: &[u8], after: &[u8]) -> usize {
    ENTRY_HEADER_SIZE + align4(before.len()) + align4(after.len())
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

pub struct ChunkOffsets<'a> {
    chunk: &'a TxChunk,
    pos: usize,
}

impl Iterator for ChunkOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.pos >= self.chunk.used {
            return None;
        }
        let offset = self.pos;
        let total = u32::from_le_bytes(
            self.chunk.data[offset..offset + 4].try_into().unwrap(),
        ) as usize;
        self.pos += total;
        Some(offset)
    }
}
