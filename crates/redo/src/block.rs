use crc32fast::Hasher;
use redolink_common::{Endian, FileOffset, RedoError, Result, Scn, Seq, Time};

/// Every block after the file header starts with this fixed header.
///
/// Layout:
///   [0]      u8   signature 0x01
///   [1]      u8   block type 0x22 (redo)
///   [2..4]        unused
///   [4..8]   u32  block number
///   [8..12]  u32  redo sequence this block was written under
///   [12..14] u16  offset of the first record beginning in this block (0 = none)
///   [14..16] u16  checksum over the block with this field zeroed
pub const BLOCK_HEADER_SIZE: usize = 16;

/// File header (block 0) field offsets.
///
///   [1]      u8   file type 0x22
///   [20..22] u16  block size (512 / 1024 / 4096)
///   [24..28] u32  block count (excluding block 0)
///   [28..32]      endian marker: 7D 7C 7B 7A little, 7A 7B 7C 7D big
pub const FILE_TYPE_REDO: u8 = 0x22;
pub const BLOCK_SIGNATURE: u8 = 0x01;

const ENDIAN_MARKER_LITTLE: [u8; 4] = [0x7D, 0x7C, 0x7B, 0x7A];
const ENDIAN_MARKER_BIG: [u8; 4] = [0x7A, 0x7B, 0x7C, 0x7D];

#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub block_size: usize,
    pub block_count: u32,
    pub endian: Endian,
}

impl FileHeader {
    /// Parse block 0. The endian marker doubles as the byte-order probe, so
    /// this is the only place that sniffs rather than dispatches.
    pub fn parse(buf: &[u8]) -> Result<FileHeader> {
        if buf.len() < 32 {
            return Err(RedoError::corrupt(FileOffset::ZERO, "file header too short"));
        }
        if buf[1] != FILE_TYPE_REDO {
            return Err(RedoError::corrupt(
                FileOffset::ZERO,
                format!("not a redo file (type byte 0x{:02x})", buf[1]),
            ));
        }
        let endian = if buf[28..32] == ENDIAN_MARKER_LITTLE {
            Endian::Little
        } else if buf[28..32] == ENDIAN_MARKER_BIG {
            Endian::Big
        } else {
            return Err(RedoError::corrupt(FileOffset::ZERO, "bad endian marker"));
        };
        let block_size = endian.read_u16(&buf[20..22]) as usize;
        if !redolink_common::BLOCK_SIZES.contains(&block_size) {
            return Err(RedoError::corrupt(
                FileOffset::ZERO,
                format!("unsupported block size {}", block_size),
            ));
        }
        let block_count = endian.read_u32(&buf[24..28]);
        Ok(FileHeader {
            block_size,
            block_count,
            endian,
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[1] = FILE_TYPE_REDO;
        self.endian.write_u16(&mut buf[20..22], self.block_size as u16);
        self.endian.write_u32(&mut buf[24..28], self.block_count);
        let marker = match self.endian {
            Endian::Little => ENDIAN_MARKER_LITTLE,
            Endian::Big => ENDIAN_MARKER_BIG,
        };
        buf[28..32].copy_from_slice(&marker);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block: u32,
    pub sequence: Seq,
    pub first_record_offset: u16,
    pub checksum: u16,
}

impl BlockHeader {
    pub fn parse(endian: Endian, buf: &[u8], offset: FileOffset) -> Result<BlockHeader> {
        if buf[0] != BLOCK_SIGNATURE || buf[1] != FILE_TYPE_REDO {
            return Err(RedoError::corrupt(offset, "bad block signature"));
        }
        Ok(BlockHeader {
            block: endian.read_u32(&buf[4..8]),
            sequence: Seq(endian.read_u32(&buf[8..12])),
            first_record_offset: endian.read_u16(&buf[12..14]),
            checksum: endian.read_u16(&buf[14..16]),
        })
    }

    pub fn write(&self, endian: Endian, buf: &mut [u8]) {
        buf[0] = BLOCK_SIGNATURE;
        buf[1] = FILE_TYPE_REDO;
        endian.write_u32(&mut buf[4..8], self.block);
        endian.write_u32(&mut buf[8..12], self.sequence.0);
        endian.write_u16(&mut buf[12..14], self.first_record_offset);
        endian.write_u16(&mut buf[14..16], self.checksum);
    }
}

/// Checksum over a whole block with the checksum field treated as zero,
/// folded into the 16-bit header slot.
pub fn block_checksum(buf: &[u8]) -> u16 {
    let mut hasher = Hasher::new();
    hasher.update(&buf[..14]);
    hasher.update(&[0, 0]);
    hasher.update(&buf[16..]);
    let crc = hasher.finalize();
    ((crc >> 16) ^ (crc & 0xFFFF)) as u16
}

pub fn verify_block_checksum(buf: &[u8], endian: Endian, offset: FileOffset) -> Result<()> {
    let stored = endian.read_u16(&buf[14..16]);
    let computed = block_checksum(buf);
    if stored != computed {
        return Err(RedoError::corrupt(
            offset,
            format!("block checksum mismatch: stored 0x{:04x}, computed 0x{:04x}", stored, computed),
        ));
    }
    Ok(())
}

/// Redo header (block 1): identity and SCN range of the log.
///
/// Field offsets (after the 16-byte block header):
///   [16..20] u32  database id
///   [20..24] u32  resetlogs id
///   [24..28] u32  activation id
///   [28..32] u32  thread
///   [32..36] u32  sequence
///   [36..44] scn  first scn
///   [44..48] u32  first time
///   [48..56] scn  next scn (NONE while the log is current)
///   [56..60] u32  next time
///   [60..68] scn  resetlogs scn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedoHeader {
    pub database_id: u32,
    pub resetlogs_id: u32,
    pub activation: u32,
    pub thread: u16,
    pub sequence: Seq,
    pub first_scn: Scn,
    pub first_time: Time,
    pub next_scn: Scn,
    pub next_time: Time,
    pub resetlogs_scn: Scn,
}

impl RedoHeader {
    pub fn parse(endian: Endian, buf: &[u8], offset: FileOffset) -> Result<RedoHeader> {
        if buf.len() < 68 {
            return Err(RedoError::corrupt(offset, "redo header too short"));
        }
        Ok(RedoHeader {
            database_id: endian.read_u32(&buf[16..20]),
            resetlogs_id: endian.read_u32(&buf[20..24]),
            activation: endian.read_u32(&buf[24..28]),
            thread: endian.read_u32(&buf[28..32]) as u16,
            sequence: Seq(endian.read_u32(&buf[32..36])),
            first_scn: endian.read_scn(&buf[36..44]),
            first_time: Time(endian.read_u32(&buf[44..48])),
            next_scn: endian.read_scn(&buf[48..56]),
            next_time: Time(endian.read_u32(&buf[56..60])),
            resetlogs_scn: endian.read_scn(&buf[60..68]),
        })
    }

    pub fn write(&self, endian: Endian, buf: &mut [u8]) {
        endian.write_u32(&mut buf[16..20], self.database_id);
        endian.write_u32(&mut buf[20..24], self.resetlogs_id);
        endian.write_u32(&mut buf[24..28], self.activation);
        endian.write_u32(&mut buf[28..32], self.thread as u32);
        endian.write_u32(&mut buf[32..36], self.sequence.0);
        endian.write_scn(&mut buf[36..44], self.first_scn);
        endian.write_u32(&mut buf[44..48], self.first_time.0);
        endian.write_scn(&mut buf[48..56], self.next_scn);
        endian.write_u32(&mut buf[56..60], self.next_time.0);
        endian.write_scn(&mut buf[60..68], self.resetlogs_scn);
    }
}

/// Read just the two header blocks of a redo file, without starting a
/// reader. Used to probe archive directories and online members.
pub fn read_headers(path: &std::path::Path) -> Result<(FileHeader, RedoHeader)> {
    use std::io::Read;
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RedoError::NotReady(format!("{}: not found", path.display())))
        }
        Err(e) => return Err(e.into()),
    };
    let mut probe = vec![0u8; 512];
    file.read_exact(&mut probe)
        .map_err(|_| RedoError::NotReady(format!("{}: too short", path.display())))?;
    let file_header = FileHeader::parse(&probe)?;

    let mut header_block = vec![0u8; file_header.block_size];
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(file_header.block_size as u64))?;
    file.read_exact(&mut header_block)
        .map_err(|_| RedoError::NotReady(format!("{}: truncated header", path.display())))?;
    let redo_header = RedoHeader::parse(
        file_header.endian,
        &header_block,
        FileOffset::from_block(1, file_header.block_size),
    )?;
    Ok((file_header, redo_header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_roundtrip() {
        for endian in [Endian::Little, Endian::Big] {
            let hdr = FileHeader {
                block_size: 512,
                block_count: 100,
                endian,
            };
            let mut buf = vec![0u8; 512];
            hdr.write(&mut buf);
            let parsed = FileHeader::parse(&buf).unwrap();
            assert_eq!(parsed.block_size, 512);
            assert_eq!(parsed.block_count, 100);
            assert_eq!(parsed.endian, endian);
        }
    }

    #[test]
    fn test_file_header_rejects_garbage() {
        let buf = vec![0u8; 512];
        assert!(FileHeader::parse(&buf).is_err());

        let mut buf = vec![0u8; 512];
        FileHeader {
            block_size: 512,
            block_count: 1,
            endian: Endian::Little,
        }
        .write(&mut buf);
        buf[28] = 0; // break the marker
        assert!(FileHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_file_header_rejects_odd_block_size() {
        let mut buf = vec![0u8; 512];
        FileHeader {
            block_size: 512,
            block_count: 1,
            endian: Endian::Little,
        }
        .write(&mut buf);
        Endian::Little.write_u16(&mut buf[20..22], 777);
        assert!(FileHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_block_header_roundtrip() {
        let endian = Endian::Little;
        let hdr = BlockHeader {
            block: 7,
            sequence: Seq(42),
            first_record_offset: 16,
            checksum: 0,
        };
        let mut buf = vec![0u8; 512];
        hdr.write(endian, &mut buf);
        let parsed = BlockHeader::parse(endian, &buf, FileOffset::ZERO).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn test_checksum_detects_flip() {
        let endian = Endian::Little;
        let mut buf = vec![0u8; 512];
        BlockHeader {
            block: 2,
            sequence: Seq(1),
            first_record_offset: 0,
            checksum: 0,
        }
        .write(endian, &mut buf);
        buf[100] = 0xAB;
        let sum = block_checksum(&buf);
        endian.write_u16(&mut buf[14..16], sum);
        verify_block_checksum(&buf, endian, FileOffset::ZERO).unwrap();

        buf[101] = 0xCD;
        assert!(verify_block_checksum(&buf, endian, FileOffset::ZERO).is_err());
    }

    #[test]
    fn test_checksum_ignores_own_field() {
        let endian = Endian::Little;
        let mut buf = vec![0u8; 512];
        buf[0] = BLOCK_SIGNATURE;
        buf[1] = FILE_TYPE_REDO;
        let before = block_checksum(&buf);
        endian.write_u16(&mut buf[14..16], before);
        assert_eq!(block_checksum(&buf), before);
    }

    #[test]
    fn test_redo_header_roundtrip() {
        for endian in [Endian::Little, Endian::Big] {
            let hdr = RedoHeader {
                database_id: 0xDEAD,
                resetlogs_id: 1_000_000,
                activation: 77,
                thread: 1,
                sequence: Seq(42),
                first_scn: Scn(1000),
                first_time: Time(123456),
                next_scn: Scn::NONE,
                next_time: Time(0),
                resetlogs_scn: Scn(500),
            };
            let mut buf = vec![0u8; 512];
            hdr.write(endian, &mut buf);
            let parsed = RedoHeader::parse(endian, &buf, FileOffset::ZERO).unwrap();
            assert_eq!(parsed, hdr);
        }
    }
}
