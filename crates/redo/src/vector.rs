use std::fmt;

use redolink_common::{DataObj, Dba, Endian, FileOffset, Obj, RedoError, Result, Scn, Uba};

/// Change-vector header layout (40 bytes):
///   [0]      u8   layer
///   [1]      u8   op
///   [2..4]   u16  flags (fb bits)
///   [4..8]   u32  obj
///   [8..12]  u32  data obj
///   [12..16] u32  bdba
///   [16..24] scn
///   [24]     u8   seq
///   [25]     u8   cls
///   [26..28] u16  slot
///   [28..36] u64  uba
///   [36..38] u16  field count
///   [38..40]      unused
/// followed by the size-prefixed field table (u16 total bytes, then one u16
/// length per field), padded to 4, then the field payloads, each padded to 4.
pub const VECTOR_HEADER_SIZE: usize = 40;

/// Opcode `(layer, op)` identifying the semantic of a change vector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode {
    pub layer: u8,
    pub op: u8,
}

impl OpCode {
    pub const fn new(layer: u8, op: u8) -> Self {
        Self { layer, op }
    }

    // Transaction management (layer 5)
    pub const UNDO: OpCode = OpCode::new(5, 1);
    pub const BEGIN: OpCode = OpCode::new(5, 2);
    pub const COMMIT: OpCode = OpCode::new(5, 4);
    pub const ROLLBACK: OpCode = OpCode::new(5, 5);
    pub const ROLLBACK_TO_SAVEPOINT: OpCode = OpCode::new(5, 6);
    pub const ROLLBACK_OP: OpCode = OpCode::new(5, 11);
    pub const SESSION_ATTRIBUTES: OpCode = OpCode::new(5, 13);
    pub const TXN_ATTRIBUTES: OpCode = OpCode::new(5, 14);
    pub const DDL_MARKER: OpCode = OpCode::new(5, 19);
    pub const DDL_MARKER2: OpCode = OpCode::new(5, 20);

    // Row operations (layer 11)
    pub const INSERT: OpCode = OpCode::new(11, 2);
    pub const DELETE: OpCode = OpCode::new(11, 3);
    pub const LOCK: OpCode = OpCode::new(11, 4);
    pub const UPDATE: OpCode = OpCode::new(11, 5);
    pub const OVERWRITE: OpCode = OpCode::new(11, 6);
    pub const MULTI_DELETE: OpCode = OpCode::new(11, 10);
    pub const MULTI_INSERT: OpCode = OpCode::new(11, 11);
    pub const SUPPLEMENTAL: OpCode = OpCode::new(11, 16);

    // LOB (layers 19/20/26) and DDL text (24)
    pub const LOB_WRITE: OpCode = OpCode::new(19, 1);
    pub const LOB_INDEX: OpCode = OpCode::new(20, 1);
    pub const DDL_TEXT: OpCode = OpCode::new(24, 1);
    pub const LOB_DATA: OpCode = OpCode::new(26, 2);

    pub fn is_dml_redo(self) -> bool {
        matches!(
            self,
            OpCode::INSERT
                | OpCode::DELETE
                | OpCode::LOCK
                | OpCode::UPDATE
                | OpCode::OVERWRITE
                | OpCode::MULTI_DELETE
                | OpCode::MULTI_INSERT
                | OpCode::SUPPLEMENTAL
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.layer, self.op)
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({})", self)
    }
}

/// A parsed change vector borrowing the record bytes. Field payloads are
/// addressed by 1-based index through `field` or a `FieldCursor`.
#[derive(Debug)]
pub struct ChangeVector<'a> {
    pub opcode: OpCode,
    pub flags: u16,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub bdba: Dba,
    pub scn: Scn,
    pub seq: u8,
    pub cls: u8,
    pub slot: u16,
    pub uba: Uba,
    pub field_count: u16,
    /// Total bytes this vector occupies in the record.
    pub size: usize,
    /// Record offset in the file, carried for error context.
    pub record_offset: FileOffset,
    fields: Vec<(usize, usize)>,
    data: &'a [u8],
}

impl<'a> ChangeVector<'a> {
    /// Parse the vector starting at `start` within the record bytes.
    pub fn parse(
        endian: Endian,
        data: &'a [u8],
        start: usize,
        record_offset: FileOffset,
    ) -> Result<ChangeVector<'a>> {
        let malformed = |reason: String| RedoError::malformed(record_offset, reason);

        if start + VECTOR_HEADER_SIZE > data.len() {
            return Err(malformed(format!(
                "vector header at {} exceeds record size {}",
                start,
                data.len()
            )));
        }
        let hdr = &data[start..start + VECTOR_HEADER_SIZE];
        let opcode = OpCode::new(hdr[0], hdr[1]);
        let field_count = endian.read_u16(&hdr[36..38]);

        // Size-prefixed field table, 4-byte aligned.
        let table_start = start + VECTOR_HEADER_SIZE;
        if table_start + 2 > data.len() {
            return Err(malformed("field table extends past record end".into()));
        }
        let table_bytes = endian.read_u16(&data[table_start..table_start + 2]) as usize;
        if table_bytes != 2 + 2 * field_count as usize {
            return Err(malformed(format!(
                "field table size {} does not match {} fields",
                table_bytes, field_count
            )));
        }
        if table_start + table_bytes > data.len() {
            return Err(malformed("field table extends past record end".into()));
        }

        let mut fields = Vec::with_capacity(field_count as usize);
        let mut field_pos = table_start + align4(table_bytes);
        for i in 0..field_count as usize {
            let len_off = table_start + 2 + 2 * i;
            let len = endian.read_u16(&data[len_off..len_off + 2]) as usize;
            if field_pos + len > data.len() {
                return Err(malformed(format!(
                    "field {} of {}: offset {} + length {} exceeds record size {}",
                    i + 1,
                    field_count,
                    field_pos,
                    len,
                    data.len()
                )));
            }
            fields.push((field_pos, len));
            field_pos += align4(len);
        }

        Ok(ChangeVector {
            opcode,
            flags: endian.read_u16(&hdr[2..4]),
            obj: endian.read_u32(&hdr[4..8]),
            data_obj: endian.read_u32(&hdr[8..12]),
            bdba: Dba(endian.read_u32(&hdr[12..16])),
            scn: endian.read_scn(&hdr[16..24]),
            seq: hdr[24],
            cls: hdr[25],
            slot: endian.read_u16(&hdr[26..28]),
            uba: Uba(endian.read_u64(&hdr[28..36])),
            field_count,
            size: field_pos - start,
            record_offset,
            fields,
            data,
        })
    }

    /// Field payload by 1-based index.
    pub fn field(&self, index: u16) -> Result<&'a [u8]> {
        if index == 0 || index > self.field_count {
            return Err(RedoError::malformed(
                self.record_offset,
                format!("field {} out of 1..={}", index, self.field_count),
            ));
        }
        let (pos, len) = self.fields[index as usize - 1];
        Ok(&self.data[pos..pos + len])
    }

    pub fn cursor(&self) -> FieldCursor<'a, '_> {
        FieldCursor {
            vector: self,
            next: 1,
        }
    }
}

/// Sequential 1-based field access with the bounds already validated at
/// parse time.
pub struct FieldCursor<'a, 'b> {
    vector: &'b ChangeVector<'a>,
    next: u16,
}

impl<'a> FieldCursor<'a, '_> {
    pub fn next_field(&mut self) -> Result<&'a [u8]> {
        let field = self.vector.field(self.next)?;
        self.next += 1;
        Ok(field)
    }

    /// Remaining fields, in order.
    pub fn rest(&mut self) -> Result<Vec<&'a [u8]>> {
        let mut out = Vec::new();
        while self.next <= self.vector.field_count {
            out.push(self.next_field()?);
        }
        Ok(out)
    }

    pub fn remaining(&self) -> u16 {
        self.vector.field_count + 1 - self.next
    }
}

pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}
