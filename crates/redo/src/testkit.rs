//! Synthetic redo generation. Only compiled for tests (and the `testkit`
//! feature used by downstream test suites); production never writes redo.

use std::path::Path;

use redolink_common::{DataObj, Dba, Endian, Obj, Scn, Seq, Time, Uba, Xid};

use crate::block::{block_checksum, BlockHeader, FileHeader, RedoHeader, BLOCK_HEADER_SIZE};
use crate::ops::{
    encode_colnums, AttributesHeader, DdlHeader, LobPageHeader, MultiRowHeader, RowHeader,
    SupplementalHeader, TxnCtl, UndoHeader, TXN_FLG_ROLLBACK,
};
use crate::record::{RECORD_HEADER_SIZE, VLD_LWN_START, VLD_VALID};
use crate::vector::{align4, OpCode, VECTOR_HEADER_SIZE};

// ---------------------------------------------------------------------------
// Vector / record specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VectorSpec {
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
    pub fields: Vec<Vec<u8>>,
}

impl VectorSpec {
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcode,
            flags: 0,
            obj: 0,
            data_obj: 0,
            bdba: Dba(0),
            scn: Scn::ZERO,
            seq: 0,
            cls: 0,
            slot: 0,
            uba: Uba::ZERO,
            fields: Vec::new(),
        }
    }

    pub fn obj(mut self, obj: Obj, data_obj: DataObj) -> Self {
        self.obj = obj;
        self.data_obj = data_obj;
        self
    }

    pub fn at(mut self, bdba: Dba, slot: u16) -> Self {
        self.bdba = bdba;
        self.slot = slot;
        self
    }

    pub fn uba(mut self, uba: Uba) -> Self {
        self.uba = uba;
        self
    }

    pub fn scn(mut self, scn: Scn) -> Self {
        self.scn = scn;
        self
    }

    pub fn field(mut self, body: Vec<u8>) -> Self {
        self.fields.push(body);
        self
    }

    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let table_bytes = 2 + 2 * self.fields.len();
        let mut size = VECTOR_HEADER_SIZE + align4(table_bytes);
        for f in &self.fields {
            size += align4(f.len());
        }
        let mut out = vec![0u8; size];

        out[0] = self.opcode.layer;
        out[1] = self.opcode.op;
        endian.write_u16(&mut out[2..4], self.flags);
        endian.write_u32(&mut out[4..8], self.obj);
        endian.write_u32(&mut out[8..12], self.data_obj);
        endian.write_u32(&mut out[12..16], self.bdba.0);
        endian.write_scn(&mut out[16..24], self.scn);
        out[24] = self.seq;
        out[25] = self.cls;
        endian.write_u16(&mut out[26..28], self.slot);
        endian.write_u64(&mut out[28..36], self.uba.0);
        endian.write_u16(&mut out[36..38], self.fields.len() as u16);

        let table = VECTOR_HEADER_SIZE;
        endian.write_u16(&mut out[table..table + 2], table_bytes as u16);
        let mut pos = VECTOR_HEADER_SIZE + align4(table_bytes);
        for (i, f) in self.fields.iter().enumerate() {
            let len_off = table + 2 + 2 * i;
            endian.write_u16(&mut out[len_off..len_off + 2], f.len() as u16);
            out[pos..pos + f.len()].copy_from_slice(f);
            pos += align4(f.len());
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub scn: Scn,
    pub sub_scn: u16,
    pub timestamp: Time,
    pub vectors: Vec<VectorSpec>,
}

impl RecordSpec {
    pub fn new(scn: Scn) -> Self {
        Self {
            scn,
            sub_scn: 0,
            timestamp: Time(0),
            vectors: Vec::new(),
        }
    }

    pub fn sub_scn(mut self, sub_scn: u16) -> Self {
        self.sub_scn = sub_scn;
        self
    }

    pub fn timestamp(mut self, t: Time) -> Self {
        self.timestamp = t;
        self
    }

    pub fn vector(mut self, v: VectorSpec) -> Self {
        self.vectors.push(v);
        self
    }

    /// Encode as a standalone single-record LWN, for tests that feed the
    /// dispatcher directly.
    pub fn encode_standalone(&self, endian: Endian) -> Vec<u8> {
        self.encode(endian, true, 1)
    }

    fn encode(&self, endian: Endian, lwn_start: bool, lwn_records: u32) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = self.vectors.iter().map(|v| v.encode(endian)).collect();
        let length = RECORD_HEADER_SIZE + encoded.iter().map(Vec::len).sum::<usize>();
        let mut out = vec![0u8; length];

        endian.write_u32(&mut out[0..4], length as u32);
        out[4] = VLD_VALID | if lwn_start { VLD_LWN_START } else { 0 };
        endian.write_u16(&mut out[6..8], self.sub_scn);
        endian.write_scn(&mut out[8..16], self.scn);
        endian.write_u32(&mut out[16..20], self.timestamp.0);
        endian.write_u32(&mut out[20..24], lwn_records);

        let mut pos = RECORD_HEADER_SIZE;
        for v in &encoded {
            out[pos..pos + v.len()].copy_from_slice(v);
            pos += v.len();
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Log builder
// ---------------------------------------------------------------------------

pub struct LogBuilder {
    pub endian: Endian,
    pub block_size: usize,
    pub database_id: u32,
    pub resetlogs_id: u32,
    pub resetlogs_scn: Scn,
    pub activation: u32,
    pub thread: u16,
    pub sequence: Seq,
    pub first_scn: Scn,
    pub first_time: Time,
    pub next_scn: Scn,
    pub next_time: Time,
    records: Vec<RecordSpec>,
}

impl LogBuilder {
    pub fn new(sequence: Seq, first_scn: Scn) -> Self {
        Self {
            endian: Endian::Little,
            block_size: 512,
            database_id: 0x0BADCAFE,
            resetlogs_id: 1_042_000_000,
            resetlogs_scn: Scn(1),
            activation: 0x00AC71F0,
            thread: 1,
            sequence,
            first_scn,
            first_time: Time(0),
            next_scn: Scn::NONE,
            next_time: Time(0),
            records: Vec::new(),
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn next_scn(mut self, scn: Scn) -> Self {
        self.next_scn = scn;
        self
    }

    pub fn resetlogs(mut self, id: u32, scn: Scn) -> Self {
        self.resetlogs_id = id;
        self.resetlogs_scn = scn;
        self
    }

    pub fn record(mut self, record: RecordSpec) -> Self {
        self.records.push(record);
        self
    }

    pub fn push(&mut self, record: RecordSpec) {
        self.records.push(record);
    }

    /// Serialize the whole log image: file header, redo header, data blocks
    /// with per-block headers and checksums.
    pub fn build(&self) -> Vec<u8> {
        let payload_per_block = self.block_size - BLOCK_HEADER_SIZE;

        // Group consecutive records sharing an SCN into one LWN.
        let mut stream = Vec::new();
        let mut record_starts = Vec::new();
        let mut i = 0;
        while i < self.records.len() {
            let lwn_scn = self.records[i].scn;
            let lwn_len = self.records[i..]
                .iter()
                .take_while(|r| r.scn == lwn_scn)
                .count();
            for (j, record) in self.records[i..i + lwn_len].iter().enumerate() {
                record_starts.push(stream.len());
                let encoded = record.encode(self.endian, j == 0, lwn_len as u32);
                stream.extend_from_slice(&encoded);
                while stream.len() % 4 != 0 {
                    stream.push(0);
                }
            }
            i += lwn_len;
        }

        let data_blocks = stream.len().div_ceil(payload_per_block).max(1);
        let block_count = 2 + data_blocks as u32;
        let mut out = vec![0u8; self.block_size * block_count as usize];

        FileHeader {
            block_size: self.block_size,
            block_count,
            endian: self.endian,
        }
        .write(&mut out[..self.block_size]);

        // Per-block first-record offsets for resync.
        let mut first_record = vec![0u16; data_blocks];
        for &start in &record_starts {
            let block = start / payload_per_block;
            if first_record[block] == 0 {
                first_record[block] = (BLOCK_HEADER_SIZE + start % payload_per_block) as u16;
            }
        }

        for block in 1..block_count {
            let begin = block as usize * self.block_size;
            let buf = &mut out[begin..begin + self.block_size];
            let first_record_offset = if block >= 2 {
                first_record[(block - 2) as usize]
            } else {
                0
            };
            BlockHeader {
                block,
                sequence: self.sequence,
                first_record_offset,
                checksum: 0,
            }
            .write(self.endian, buf);

            if block == 1 {
                RedoHeader {
                    database_id: self.database_id,
                    resetlogs_id: self.resetlogs_id,
                    activation: self.activation,
                    thread: self.thread,
                    sequence: self.sequence,
                    first_scn: self.first_scn,
                    first_time: self.first_time,
                    next_scn: self.next_scn,
                    next_time: self.next_time,
                    resetlogs_scn: self.resetlogs_scn,
                }
                .write(self.endian, buf);
            } else {
                let chunk_start = (block - 2) as usize * payload_per_block;
                let chunk_end = (chunk_start + payload_per_block).min(stream.len());
                if chunk_start < stream.len() {
                    let chunk = &stream[chunk_start..chunk_end];
                    buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
                }
            }

            let sum = block_checksum(buf);
            self.endian.write_u16(&mut buf[14..16], sum);
        }

        out
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

// ---------------------------------------------------------------------------
// Semantic record helpers
// ---------------------------------------------------------------------------

/// Column list for DML helpers: (0-based segment column index, value bytes,
/// None = NULL).
pub type Cols = Vec<(u16, Option<Vec<u8>>)>;

fn col_fields(cols: &Cols) -> (Vec<u16>, Vec<Vec<u8>>) {
    let colnums = cols.iter().map(|(n, _)| *n).collect();
    let values = cols
        .iter()
        .map(|(_, v)| v.clone().unwrap_or_default())
        .collect();
    (colnums, values)
}

pub fn begin_record(endian: Endian, scn: Scn, xid: Xid) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::BEGIN)
            .scn(scn)
            .field(TxnCtl { xid, flg: 0 }.encode(endian)),
    )
}

pub fn commit_record(endian: Endian, scn: Scn, xid: Xid) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::COMMIT)
            .scn(scn)
            .field(TxnCtl { xid, flg: 0 }.encode(endian)),
    )
}

pub fn rollback_record(endian: Endian, scn: Scn, xid: Xid) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::ROLLBACK).scn(scn).field(
            TxnCtl {
                xid,
                flg: TXN_FLG_ROLLBACK,
            }
            .encode(endian),
        ),
    )
}

/// 5.6: partial rollback to the savepoint undo address.
pub fn rollback_to_savepoint_record(endian: Endian, scn: Scn, xid: Xid, savepoint: Uba) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::ROLLBACK_TO_SAVEPOINT)
            .scn(scn)
            .uba(savepoint)
            .field(
                UndoHeader {
                    xid,
                    mirror_layer: 0,
                    mirror_op: 0,
                }
                .encode(endian),
            ),
    )
}

/// 5.11: rollback of the single operation with the given undo address.
pub fn rollback_op_record(endian: Endian, scn: Scn, xid: Xid, uba: Uba) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::ROLLBACK_OP)
            .scn(scn)
            .uba(uba)
            .field(
                UndoHeader {
                    xid,
                    mirror_layer: 0,
                    mirror_op: 0,
                }
                .encode(endian),
            ),
    )
}

/// Paired 5.1 + 11.x single-row DML record. The undo side carries the
/// before image, the redo side the after image.
#[allow(clippy::too_many_arguments)]
pub fn dml_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    redo_op: OpCode,
    obj: Obj,
    data_obj: DataObj,
    bdba: Dba,
    slot: u16,
    uba: Uba,
    before: &Cols,
    after: &Cols,
) -> RecordSpec {
    let (before_nums, before_vals) = col_fields(before);
    let (after_nums, after_vals) = col_fields(after);

    let mut undo = VectorSpec::new(OpCode::UNDO)
        .obj(obj, data_obj)
        .at(bdba, slot)
        .uba(uba)
        .scn(scn)
        .field(
            UndoHeader {
                xid,
                mirror_layer: redo_op.layer,
                mirror_op: redo_op.op,
            }
            .encode(endian),
        )
        .field(
            RowHeader {
                fb: 0,
                cc: before_nums.len() as u8,
                slot,
            }
            .encode(endian),
        )
        .field(encode_colnums(endian, &before_nums));
    for v in before_vals {
        undo = undo.field(v);
    }

    let mut redo = VectorSpec::new(redo_op)
        .obj(obj, data_obj)
        .at(bdba, slot)
        .uba(uba)
        .scn(scn)
        .field(
            RowHeader {
                fb: 0,
                cc: after_nums.len() as u8,
                slot,
            }
            .encode(endian),
        )
        .field(encode_colnums(endian, &after_nums));
    for v in after_vals {
        redo = redo.field(v);
    }

    RecordSpec::new(scn).vector(undo).vector(redo)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    obj: Obj,
    data_obj: DataObj,
    bdba: Dba,
    slot: u16,
    uba: Uba,
    after: &Cols,
) -> RecordSpec {
    dml_record(
        endian,
        scn,
        xid,
        OpCode::INSERT,
        obj,
        data_obj,
        bdba,
        slot,
        uba,
        &Vec::new(),
        after,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn delete_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    obj: Obj,
    data_obj: DataObj,
    bdba: Dba,
    slot: u16,
    uba: Uba,
    before: &Cols,
) -> RecordSpec {
    dml_record(
        endian,
        scn,
        xid,
        OpCode::DELETE,
        obj,
        data_obj,
        bdba,
        slot,
        uba,
        before,
        &Vec::new(),
    )
}

/// Update with an optional supplemental vector carrying extra before-image
/// columns (the usual shape of a PK carried via supplemental logging).
#[allow(clippy::too_many_arguments)]
pub fn update_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    obj: Obj,
    data_obj: DataObj,
    bdba: Dba,
    slot: u16,
    uba: Uba,
    before: &Cols,
    after: &Cols,
    supplemental: Option<&Cols>,
) -> RecordSpec {
    let mut record = dml_record(
        endian,
        scn,
        xid,
        OpCode::UPDATE,
        obj,
        data_obj,
        bdba,
        slot,
        uba,
        before,
        after,
    );
    if let Some(supp) = supplemental {
        let (nums, vals) = col_fields(supp);
        let mut vector = VectorSpec::new(OpCode::SUPPLEMENTAL)
            .obj(obj, data_obj)
            .at(bdba, slot)
            .uba(uba)
            .scn(scn)
            .field(
                SupplementalHeader {
                    cc: nums.len() as u16,
                    is_after: false,
                }
                .encode(endian),
            )
            .field(encode_colnums(endian, &nums));
        for v in vals {
            vector = vector.field(v);
        }
        record = record.vector(vector);
    }
    record
}

/// Multi-row insert (11.11) or delete (11.10): one vector, `rows.len()`
/// row images sharing one slot table.
#[allow(clippy::too_many_arguments)]
pub fn multi_row_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    redo_op: OpCode,
    obj: Obj,
    data_obj: DataObj,
    bdba: Dba,
    uba: Uba,
    slots: &[u16],
    cc: u8,
    rows: &[Vec<Option<Vec<u8>>>],
) -> RecordSpec {
    assert_eq!(slots.len(), rows.len());

    let undo = VectorSpec::new(OpCode::UNDO)
        .obj(obj, data_obj)
        .at(bdba, slots[0])
        .uba(uba)
        .scn(scn)
        .field(
            UndoHeader {
                xid,
                mirror_layer: redo_op.layer,
                mirror_op: redo_op.op,
            }
            .encode(endian),
        )
        .field(RowHeader { fb: 0, cc: 0, slot: slots[0] }.encode(endian))
        .field(Vec::new());

    let mut redo = VectorSpec::new(redo_op)
        .obj(obj, data_obj)
        .at(bdba, slots[0])
        .uba(uba)
        .scn(scn)
        .field(
            MultiRowHeader {
                fb: 0,
                cc,
                nrow: slots.len() as u16,
            }
            .encode(endian),
        )
        .field(encode_colnums(endian, slots));
    for row in rows {
        assert_eq!(row.len(), cc as usize);
        for value in row {
            redo = redo.field(value.clone().unwrap_or_default());
        }
    }

    RecordSpec::new(scn).vector(undo).vector(redo)
}

pub fn ddl_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    obj: Obj,
    ddl_type: u16,
    part: u16,
    total: u16,
    text: &str,
) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::DDL_TEXT)
            .obj(obj, obj)
            .scn(scn)
            .field(
                DdlHeader {
                    ddl_type,
                    part,
                    total,
                    xid,
                }
                .encode(endian),
            )
            .field(text.as_bytes().to_vec()),
    )
}

pub fn lob_page_record(
    endian: Endian,
    scn: Scn,
    lob_obj: Obj,
    lob_data_obj: DataObj,
    lob_id: u64,
    page_no: u32,
    data: &[u8],
) -> RecordSpec {
    RecordSpec::new(scn).vector(
        VectorSpec::new(OpCode::LOB_DATA)
            .obj(lob_obj, lob_data_obj)
            .scn(scn)
            .field(LobPageHeader { lob_id, page_no }.encode(endian))
            .field(data.to_vec()),
    )
}

pub fn attributes_record(
    endian: Endian,
    scn: Scn,
    xid: Xid,
    attributes: &[(&str, &str)],
) -> RecordSpec {
    let mut vector = VectorSpec::new(OpCode::SESSION_ATTRIBUTES).scn(scn).field(
        AttributesHeader {
            count: attributes.len() as u16,
            xid,
        }
        .encode(endian),
    );
    for (name, value) in attributes {
        vector = vector
            .field(name.as_bytes().to_vec())
            .field(value.as_bytes().to_vec());
    }
    RecordSpec::new(scn).vector(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ReaderConfig, RedoReader};
    use crate::record::{RecordAssembler, RecordNext};
    use crate::vector::ChangeVector;
    use redolink_common::Shutdown;
    use tempfile::TempDir;

    fn assemble_all(path: &std::path::Path) -> Vec<crate::record::RedoRecord> {
        let reader =
            RedoReader::open(path, ReaderConfig::default(), Shutdown::new()).unwrap();
        let mut assembler = RecordAssembler::new(reader);
        let mut records = Vec::new();
        loop {
            match assembler.next().unwrap() {
                RecordNext::Record(r) => records.push(r),
                RecordNext::EndOfLog => break,
                RecordNext::Overwritten => panic!("unexpected overwrite"),
            }
        }
        records
    }

    #[test]
    fn test_single_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo_1.log");
        let xid = Xid::new(1, 2, 3);

        LogBuilder::new(Seq(1), Scn(1000))
            .record(begin_record(Endian::Little, Scn(1000), xid))
            .write(&path)
            .unwrap();

        let records = assemble_all(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scn, Scn(1000));
        assert_eq!(records[0].lwn_scn, Scn(1000));

        let vector =
            ChangeVector::parse(Endian::Little, &records[0].data, RECORD_HEADER_SIZE, records[0].offset)
                .unwrap();
        assert_eq!(vector.opcode, OpCode::BEGIN);
        let ctl = TxnCtl::parse(Endian::Little, &vector).unwrap();
        assert_eq!(ctl.xid, xid);
    }

    #[test]
    fn test_record_crossing_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo_1.log");
        let xid = Xid::new(1, 1, 1);

        // A row image wide enough to straddle several 512-byte blocks.
        let wide: Cols = (0..8u16)
            .map(|i| (i, Some(vec![i as u8; 200])))
            .collect();
        LogBuilder::new(Seq(1), Scn(10))
            .record(begin_record(Endian::Little, Scn(10), xid))
            .record(insert_record(
                Endian::Little,
                Scn(11),
                xid,
                87,
                87,
                Dba(0x0100_0010),
                0,
                Uba(1),
                &wide,
            ))
            .record(commit_record(Endian::Little, Scn(12), xid))
            .write(&path)
            .unwrap();

        let records = assemble_all(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].scn, Scn(11));
        assert!(records[1].data.len() > 512 * 2);
        assert_eq!(records[2].scn, Scn(12));
    }

    #[test]
    fn test_lwn_grouping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo_1.log");
        let xid = Xid::new(1, 1, 1);

        let records = assemble_all({
            LogBuilder::new(Seq(1), Scn(10))
                .record(begin_record(Endian::Little, Scn(10), xid))
                .record(insert_record(
                    Endian::Little,
                    Scn(10),
                    xid,
                    87,
                    87,
                    Dba(16),
                    0,
                    Uba(1),
                    &vec![(0, Some(vec![1]))],
                ))
                .record(commit_record(Endian::Little, Scn(11), xid))
                .write(&path)
                .unwrap();
            &path
        });

        assert_eq!(records.len(), 3);
        // first two share one LWN
        assert_eq!(records[0].lwn_scn, Scn(10));
        assert_eq!(records[1].lwn_scn, Scn(10));
        assert_eq!(records[0].lwn_start_block, records[1].lwn_start_block);
        assert_eq!(records[2].lwn_scn, Scn(11));
    }

    #[test]
    fn test_big_endian_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo_1.log");
        let xid = Xid::new(7, 8, 9);

        LogBuilder::new(Seq(3), Scn(500))
            .endian(Endian::Big)
            .record(begin_record(Endian::Big, Scn(500), xid))
            .write(&path)
            .unwrap();

        let reader = RedoReader::open(&path, ReaderConfig::default(), Shutdown::new()).unwrap();
        assert_eq!(reader.endian(), Endian::Big);
        assert_eq!(reader.sequence(), Seq(3));

        let mut assembler = RecordAssembler::new(reader);
        match assembler.next().unwrap() {
            RecordNext::Record(r) => {
                assert_eq!(r.scn, Scn(500));
                let vector =
                    ChangeVector::parse(Endian::Big, &r.data, RECORD_HEADER_SIZE, r.offset).unwrap();
                let ctl = TxnCtl::parse(Endian::Big, &vector).unwrap();
                assert_eq!(ctl.xid, xid);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_field_table_rejected() {
        let endian = Endian::Little;
        let spec = VectorSpec::new(OpCode::BEGIN).field(vec![0u8; 10]);
        let mut bytes = spec.encode(endian);
        // corrupt the declared field count
        endian.write_u16(&mut bytes[36..38], 9);
        let err = ChangeVector::parse(endian, &bytes, 0, redolink_common::FileOffset::ZERO);
        assert!(err.is_err());
    }

    #[test]
    fn test_field_out_of_range_rejected() {
        let endian = Endian::Little;
        let bytes = VectorSpec::new(OpCode::BEGIN).field(vec![1, 2]).encode(endian);
        let vector =
            ChangeVector::parse(endian, &bytes, 0, redolink_common::FileOffset::ZERO).unwrap();
        assert!(vector.field(1).is_ok());
        assert!(vector.field(0).is_err());
        assert!(vector.field(2).is_err());
    }
}
