//! Typed payload layouts of the supported change vectors. The dispatcher
//! parses these out of vector fields; the test builder encodes them with the
//! same definitions, so the wire vocabulary lives in exactly one place.

use redolink_common::{Endian, FileOffset, RedoError, Result, Xid};

use crate::vector::ChangeVector;

/// Flag bits of the transaction-control payload (5.2 / 5.4 / 5.5).
pub const TXN_FLG_ROLLBACK: u16 = 0x0004;

/// Transaction control body, field 1 of 5.2 (begin), 5.4 (commit) and
/// 5.5 (rollback): packed xid (8 bytes) plus flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnCtl {
    pub xid: Xid,
    pub flg: u16,
}

impl TxnCtl {
    pub fn parse(endian: Endian, vector: &ChangeVector<'_>) -> Result<TxnCtl> {
        let body = vector.field(1)?;
        expect_len(body, 10, "transaction control", vector.record_offset)?;
        Ok(TxnCtl {
            xid: Xid::from_u64(endian.read_u64(&body[0..8])),
            flg: endian.read_u16(&body[8..10]),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 10];
        endian.write_u64(&mut out[0..8], self.xid.to_u64());
        endian.write_u16(&mut out[8..10], self.flg);
        out
    }

    pub fn is_rollback(&self) -> bool {
        self.flg & TXN_FLG_ROLLBACK != 0
    }
}

/// Undo header, field 1 of 5.1: the transaction the undo belongs to and the
/// opcode of the mirrored redo vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoHeader {
    pub xid: Xid,
    pub mirror_layer: u8,
    pub mirror_op: u8,
}

impl UndoHeader {
    pub fn parse(endian: Endian, vector: &ChangeVector<'_>) -> Result<UndoHeader> {
        let body = vector.field(1)?;
        expect_len(body, 10, "undo header", vector.record_offset)?;
        Ok(UndoHeader {
            xid: Xid::from_u64(endian.read_u64(&body[0..8])),
            mirror_layer: body[8],
            mirror_op: body[9],
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 10];
        endian.write_u64(&mut out[0..8], self.xid.to_u64());
        out[8] = self.mirror_layer;
        out[9] = self.mirror_op;
        out
    }
}

/// Row piece header shared by single-row DML bodies (field 2 of 5.1, field 1
/// of 11.2/3/4/5/6): fragment bits, column count, slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowHeader {
    pub fb: u8,
    pub cc: u8,
    pub slot: u16,
}

impl RowHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<RowHeader> {
        expect_len(body, 4, "row header", offset)?;
        Ok(RowHeader {
            fb: body[0],
            cc: body[1],
            slot: endian.read_u16(&body[2..4]),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        out[0] = self.fb;
        out[1] = self.cc;
        endian.write_u16(&mut out[2..4], self.slot);
        out
    }
}

/// Multi-row header, field 1 of 11.10/11.11: shared column count and the
/// number of rows described by the one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiRowHeader {
    pub fb: u8,
    pub cc: u8,
    pub nrow: u16,
}

impl MultiRowHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<MultiRowHeader> {
        expect_len(body, 4, "multi-row header", offset)?;
        Ok(MultiRowHeader {
            fb: body[0],
            cc: body[1],
            nrow: endian.read_u16(&body[2..4]),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        out[0] = self.fb;
        out[1] = self.cc;
        endian.write_u16(&mut out[2..4], self.nrow);
        out
    }
}

/// Decode a column-number list field: one u16 segment-column index (0-based)
/// per referenced column.
pub fn parse_colnums(endian: Endian, body: &[u8], offset: FileOffset) -> Result<Vec<u16>> {
    if body.len() % 2 != 0 {
        return Err(RedoError::malformed(
            offset,
            format!("column list has odd length {}", body.len()),
        ));
    }
    Ok(body
        .chunks_exact(2)
        .map(|pair| endian.read_u16(pair))
        .collect())
}

pub fn encode_colnums(endian: Endian, colnums: &[u16]) -> Vec<u8> {
    let mut out = vec![0u8; colnums.len() * 2];
    for (i, col) in colnums.iter().enumerate() {
        endian.write_u16(&mut out[i * 2..i * 2 + 2], *col);
    }
    out
}

/// Supplemental-log header, field 1 of 11.16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplementalHeader {
    pub cc: u16,
    /// After-image supplemental columns (rare); before-image otherwise.
    pub is_after: bool,
}

impl SupplementalHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<SupplementalHeader> {
        expect_len(body, 4, "supplemental header", offset)?;
        Ok(SupplementalHeader {
            cc: endian.read_u16(&body[0..2]),
            is_after: body[2] != 0,
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        endian.write_u16(&mut out[0..2], self.cc);
        out[2] = self.is_after as u8;
        out
    }
}

/// DDL body header, field 1 of 24.1 and the 5.19/5.20 markers. The text
/// chunk is field 2; multi-part statements arrive as `part 1..=total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdlHeader {
    pub ddl_type: u16,
    pub part: u16,
    pub total: u16,
    pub xid: Xid,
}

impl DdlHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<DdlHeader> {
        expect_len(body, 14, "ddl header", offset)?;
        Ok(DdlHeader {
            ddl_type: endian.read_u16(&body[0..2]),
            part: endian.read_u16(&body[2..4]),
            total: endian.read_u16(&body[4..6]),
            xid: Xid::from_u64(endian.read_u64(&body[6..14])),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 14];
        endian.write_u16(&mut out[0..2], self.ddl_type);
        endian.write_u16(&mut out[2..4], self.part);
        endian.write_u16(&mut out[4..6], self.total);
        endian.write_u64(&mut out[6..14], self.xid.to_u64());
        out
    }
}

/// LOB page body, field 1 of 26.x (page data in field 2) and of the 19.x /
/// 20.x index vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobPageHeader {
    pub lob_id: u64,
    pub page_no: u32,
}

impl LobPageHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<LobPageHeader> {
        expect_len(body, 12, "lob page header", offset)?;
        Ok(LobPageHeader {
            lob_id: endian.read_u64(&body[0..8]),
            page_no: endian.read_u32(&body[8..12]),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        endian.write_u64(&mut out[0..8], self.lob_id);
        endian.write_u32(&mut out[8..12], self.page_no);
        out
    }
}

/// LOB locator found in a column payload. Small values travel in-line after
/// the fixed 20-byte prefix; out-of-line values are resolved through the
/// assembled pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    pub flags: u16,
    pub lob_id: u64,
    pub length: u32,
    pub page_count: u32,
    pub inline: Option<Vec<u8>>,
}

pub const LOB_LOCATOR_FLAG_INLINE: u16 = 0x0001;
/// Payload is the binary XMLType token stream rather than character data.
pub const LOB_LOCATOR_FLAG_XML_BINARY: u16 = 0x0002;
pub const LOB_LOCATOR_SIZE: usize = 20;

impl LobLocator {
    pub fn out_of_line(lob_id: u64, length: u32, page_count: u32) -> LobLocator {
        LobLocator {
            flags: 0,
            lob_id,
            length,
            page_count,
            inline: None,
        }
    }

    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<LobLocator> {
        expect_len(body, LOB_LOCATOR_SIZE, "lob locator", offset)?;
        let flags = endian.read_u16(&body[0..2]);
        let length = endian.read_u32(&body[12..16]);
        let inline = if flags & LOB_LOCATOR_FLAG_INLINE != 0 {
            if body.len() < LOB_LOCATOR_SIZE + length as usize {
                return Err(RedoError::malformed(
                    offset,
                    format!(
                        "inline lob needs {} bytes, locator has {}",
                        length,
                        body.len() - LOB_LOCATOR_SIZE
                    ),
                ));
            }
            Some(body[LOB_LOCATOR_SIZE..LOB_LOCATOR_SIZE + length as usize].to_vec())
        } else {
            None
        };
        Ok(LobLocator {
            flags,
            lob_id: endian.read_u64(&body[4..12]),
            length,
            page_count: endian.read_u32(&body[16..20]),
            inline,
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let inline_len = self.inline.as_ref().map_or(0, Vec::len);
        let mut out = vec![0u8; LOB_LOCATOR_SIZE + inline_len];
        let mut flags = self.flags;
        if self.inline.is_some() {
            flags |= LOB_LOCATOR_FLAG_INLINE;
        }
        endian.write_u16(&mut out[0..2], flags);
        endian.write_u64(&mut out[4..12], self.lob_id);
        endian.write_u32(&mut out[12..16], self.length);
        endian.write_u32(&mut out[16..20], self.page_count);
        if let Some(data) = &self.inline {
            out[LOB_LOCATOR_SIZE..].copy_from_slice(data);
        }
        out
    }
}

/// Attribute header, field 1 of 5.13/5.14: pair count plus the owning
/// transaction. Names and values alternate in the following fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributesHeader {
    pub count: u16,
    pub xid: Xid,
}

impl AttributesHeader {
    pub fn parse(endian: Endian, body: &[u8], offset: FileOffset) -> Result<AttributesHeader> {
        expect_len(body, 10, "attribute header", offset)?;
        Ok(AttributesHeader {
            count: endian.read_u16(&body[0..2]),
            xid: Xid::from_u64(endian.read_u64(&body[2..10])),
        })
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = vec![0u8; 10];
        endian.write_u16(&mut out[0..2], self.count);
        endian.write_u64(&mut out[2..10], self.xid.to_u64());
        out
    }
}

/// Decode the attribute pairs of a 5.13/5.14 vector.
pub fn parse_attributes(
    endian: Endian,
    vector: &ChangeVector<'_>,
) -> Result<(Xid, Vec<(String, String)>)> {
    let header = AttributesHeader::parse(endian, vector.field(1)?, vector.record_offset)?;
    let mut out = Vec::with_capacity(header.count as usize);
    for i in 0..header.count {
        let name = vector.field(2 + i * 2)?;
        let value = vector.field(3 + i * 2)?;
        out.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
    Ok((header.xid, out))
}

fn expect_len(body: &[u8], want: usize, what: &str, offset: FileOffset) -> Result<()> {
    if body.len() < want {
        return Err(RedoError::malformed(
            offset,
            format!("{} needs {} bytes, field has {}", what, want, body.len()),
        ));
    }
    Ok(())
}
