use redolink_common::{FileOffset, RedoError, Result, Scn, SubScn, Time};
use tracing::warn;

use crate::block::BLOCK_HEADER_SIZE;
use crate::reader::{BlockRead, RedoReader, FIRST_DATA_BLOCK};

/// Record header layout (24 bytes, at the start of every record):
///   [0..4]   u32  total record length, header included
///   [4]      u8   vld: 0x01 valid, 0x04 first record of an LWN
///   [5]           unused
///   [6..8]   u16  sub-scn
///   [8..16]  scn
///   [16..20] u32  timestamp (meaningful on LWN start)
///   [20..24] u32  LWN length in records (meaningful on LWN start)
pub const RECORD_HEADER_SIZE: usize = 24;

pub const VLD_VALID: u8 = 0x01;
pub const VLD_LWN_START: u8 = 0x04;

/// A fully reassembled logical record. `data` holds the complete record
/// bytes (header included) with block headers already stripped, so change
/// vectors can be parsed with simple offsets.
#[derive(Debug, Clone)]
pub struct RedoRecord {
    pub scn: Scn,
    pub sub_scn: SubScn,
    pub timestamp: Time,
    pub vld: u8,
    pub data: Vec<u8>,
    /// Byte position of the record start in the redo file.
    pub offset: FileOffset,
    pub lwn_scn: Scn,
    pub lwn_timestamp: Time,
    pub lwn_start_block: u32,
}

#[derive(Debug)]
pub enum RecordNext {
    Record(RedoRecord),
    EndOfLog,
    /// The online log was switched under us; re-read this sequence from
    /// archive.
    Overwritten,
}

/// Reassembles logical records from the block stream. Records may cross
/// block boundaries; the payload areas of consecutive blocks form one
/// logical byte stream.
pub struct RecordAssembler {
    reader: RedoReader,
    block_size: usize,
    current: Option<Vec<u8>>,
    block_no: u32,
    /// Cursor within the current block (>= BLOCK_HEADER_SIZE).
    pos: usize,
    lwn_scn: Scn,
    lwn_timestamp: Time,
    lwn_start_block: u32,
    last_scn: Scn,
    last_sub_scn: SubScn,
}

impl RecordAssembler {
    pub fn new(reader: RedoReader) -> Self {
        let block_size = reader.block_size();
        Self {
            reader,
            block_size,
            current: None,
            block_no: FIRST_DATA_BLOCK,
            pos: BLOCK_HEADER_SIZE,
            lwn_scn: Scn::ZERO,
            lwn_timestamp: Time(0),
            lwn_start_block: FIRST_DATA_BLOCK,
            last_scn: Scn::ZERO,
            last_sub_scn: 0,
        }
    }

    pub fn reader(&self) -> &RedoReader {
        &self.reader
    }

    /// Current read position, block-aligned. This is the offset recorded in
    /// checkpoints: replay from here re-reads at most the current block.
    pub fn position(&self) -> FileOffset {
        FileOffset::from_block(self.block_no, self.block_size)
    }

    /// Skip forward so that the next record delivered starts at or after
    /// `offset` (used when resuming from a checkpoint mid-file).
    pub fn skip_to(&mut self, offset: FileOffset) -> Result<()> {
        let target = offset.block(self.block_size).max(FIRST_DATA_BLOCK);
        while self.block_no < target {
            match self.fetch_current()? {
                Fetched::Data => {
                    self.advance_block();
                }
                Fetched::End | Fetched::Overwritten => break,
            }
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<RecordNext> {
        loop {
            match self.fetch_current()? {
                Fetched::End => return Ok(RecordNext::EndOfLog),
                Fetched::Overwritten => return Ok(RecordNext::Overwritten),
                Fetched::Data => {}
            }

            // Less than a length field left: rest of the block is padding.
            if self.pos + 4 > self.block_size {
                self.advance_block();
                continue;
            }

            let block = self.current.as_ref().unwrap();
            let length = self.reader.endian().read_u32(&block[self.pos..self.pos + 4]) as usize;
            if length == 0 {
                self.advance_block();
                continue;
            }

            let start_offset =
                FileOffset(self.block_no as u64 * self.block_size as u64 + self.pos as u64);
            if length < RECORD_HEADER_SIZE {
                return Err(RedoError::malformed(
                    start_offset,
                    format!("record length {} below header size", length),
                ));
            }

            let data = self.collect(length, start_offset)?;
            return self.finish_record(data, start_offset);
        }
    }

    /// Copy `length` logical bytes starting at the cursor, continuing across
    /// block boundaries.
    fn collect(&mut self, length: usize, start_offset: FileOffset) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(length);
        let mut remaining = length;
        loop {
            match self.fetch_current()? {
                Fetched::Data => {}
                Fetched::End => {
                    return Err(RedoError::corrupt(
                        start_offset,
                        format!("log ended {} bytes into a {} byte record", data.len(), length),
                    ));
                }
                Fetched::Overwritten => {
                    return Err(RedoError::corrupt(
                        start_offset,
                        "log switched mid-record".to_string(),
                    ));
                }
            }
            let block = self.current.as_ref().unwrap();
            let take = remaining.min(self.block_size - self.pos);
            data.extend_from_slice(&block[self.pos..self.pos + take]);
            self.pos += take;
            remaining -= take;
            if remaining == 0 {
                // records are 4-byte aligned within the stream
                self.pos = (self.pos + 3) & !3;
                return Ok(data);
            }
            self.advance_block();
        }
    }

    fn finish_record(&mut self, data: Vec<u8>, offset: FileOffset) -> Result<RecordNext> {
        let endian = self.reader.endian();
        let vld = data[4];
        if vld & VLD_VALID == 0 {
            return Err(RedoError::malformed(offset, "record not marked valid"));
        }
        let sub_scn = endian.read_u16(&data[6..8]);
        let scn = endian.read_scn(&data[8..16]);
        let timestamp = Time(endian.read_u32(&data[16..20]));

        if vld & VLD_LWN_START != 0 {
            self.lwn_scn = scn;
            self.lwn_timestamp = timestamp;
            self.lwn_start_block = offset.block(self.block_size);
        }

        // Records from one thread never go back in SCN order.
        if scn < self.last_scn || (scn == self.last_scn && sub_scn < self.last_sub_scn) {
            warn!(
                %offset,
                scn = %scn,
                last = %self.last_scn,
                "record SCN went backwards"
            );
        }
        self.last_scn = scn;
        self.last_sub_scn = sub_scn;

        Ok(RecordNext::Record(RedoRecord {
            scn,
            sub_scn,
            timestamp,
            vld,
            data,
            offset,
            lwn_scn: self.lwn_scn,
            lwn_timestamp: self.lwn_timestamp,
            lwn_start_block: self.lwn_start_block,
        }))
    }

    fn fetch_current(&mut self) -> Result<Fetched> {
        if self.current.is_some() {
            return Ok(Fetched::Data);
        }
        match self.reader.read_block(self.block_no)? {
            BlockRead::Data(data) => {
                self.current = Some(data);
                Ok(Fetched::Data)
            }
            BlockRead::EndOfFile => Ok(Fetched::End),
            BlockRead::Overwritten => Ok(Fetched::Overwritten),
        }
    }

    fn advance_block(&mut self) {
        self.current = None;
        self.block_no += 1;
        self.pos = BLOCK_HEADER_SIZE;
    }
}

enum Fetched {
    Data,
    End,
    Overwritten,
}
