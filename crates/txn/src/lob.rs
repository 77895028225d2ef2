use std::collections::HashMap;

use redolink_common::{Endian, FileOffset, Obj, RedoError, Result};
use redolink_redo::ops::LobLocator;
use redolink_schema::TableLob;
use tracing::warn;

/// Charset id of AL16UTF16, the national character set the CLOB path must
/// transcode. Byte-oriented charsets pass through.
pub const CHARSET_AL16UTF16: u32 = 2000;

/// Orphan key: pages can arrive before the locator that references them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LobKey {
    pub obj: Obj,
    pub lob_id: u64,
    pub page: u32,
}

/// Piecewise LOB assembly state. Pages land here as 26.x/19.x/20.x vectors
/// are dispatched, keyed by the segment object that produced them; locator
/// resolution at commit drains them.
#[derive(Default)]
pub struct LobAssembler {
    pages: HashMap<LobKey, Vec<u8>>,
    /// One-shot warning latch per lob id.
    warned: std::collections::HashSet<u64>,
}

impl LobAssembler {
    pub fn new() -> LobAssembler {
        LobAssembler::default()
    }

    /// Park a page until its locator arrives.
    pub fn add_page(&mut self, obj: Obj, lob_id: u64, page: u32, data: Vec<u8>) {
        self.pages.insert(LobKey { obj, lob_id, page }, data);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Resolve a locator against the parked pages of the LOB's segments.
    /// Gathers pages 0..page_count in order (draining them), joins, and
    /// truncates to the declared byte length.
    pub fn assemble(&mut self, locator: &LobLocator, lob: &TableLob) -> Result<Vec<u8>> {
        if let Some(inline) = &locator.inline {
            return Ok(inline.clone());
        }

        let mut out = Vec::with_capacity(locator.length as usize);
        for page in 0..locator.page_count {
            let data = self
                .take_page(lob, locator.lob_id, page)
                .ok_or(RedoError::LobResolution {
                    lob_id: locator.lob_id,
                    page,
                })?;
            out.extend_from_slice(&data);
        }
        if out.len() < locator.length as usize {
            return Err(RedoError::LobResolution {
                lob_id: locator.lob_id,
                page: locator.page_count,
            });
        }
        out.truncate(locator.length as usize);
        Ok(out)
    }

    fn take_page(&mut self, lob: &TableLob, lob_id: u64, page: u32) -> Option<Vec<u8>> {
        let candidates = std::iter::once(lob.l_obj)
            .chain(lob.partitions.iter().copied())
            .chain(lob.indexes.iter().copied());
        for obj in candidates {
            if let Some(data) = self.pages.remove(&LobKey { obj, lob_id, page }) {
                return Some(data);
            }
        }
        None
    }

    /// Emit-time policy for an unresolvable column: NULL plus a one-shot
    /// warning per lob id.
    pub fn warn_unresolved(&mut self, lob_id: u64, table: &str, column: &str, offset: FileOffset) {
        if self.warned.insert(lob_id) {
            warn!(
                lob_id = format_args!("{:#x}", lob_id),
                table, column, %offset, "lob could not be assembled, emitting NULL"
            );
        }
    }
}

/// Decode CLOB bytes in the column charset to UTF-8.
pub fn decode_character_lob(data: &[u8], charset_id: u32) -> Result<Vec<u8>> {
    if charset_id == CHARSET_AL16UTF16 {
        utf16be_to_utf8(data)
    } else {
        Ok(data.to_vec())
    }
}

fn utf16be_to_utf8(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(RedoError::Dictionary(format!(
            "UTF-16 payload has odd length {}",
            data.len()
        )));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| Endian::Big.read_u16(pair))
        .collect();
    let text = String::from_utf16(&units)
        .map_err(|e| RedoError::Dictionary(format!("bad UTF-16 lob payload: {}", e)))?;
    Ok(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lob() -> TableLob {
        TableLob {
            obj: 90,
            l_obj: 5000,
            col: 2,
            int_col: 2,
            page_size: 8132,
            indexes: vec![5001],
            partitions: vec![5100],
        }
    }

    fn locator(lob_id: u64, length: u32, pages: u32) -> LobLocator {
        LobLocator::out_of_line(lob_id, length, pages)
    }

    #[test]
    fn test_assemble_in_page_order() {
        let mut assembler = LobAssembler::new();
        assembler.add_page(5000, 7, 1, b"world".to_vec());
        assembler.add_page(5000, 7, 0, b"hello ".to_vec());

        let out = assembler.assemble(&locator(7, 11, 2), &lob()).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(assembler.page_count(), 0);
    }

    #[test]
    fn test_pages_found_on_partition_segment() {
        let mut assembler = LobAssembler::new();
        assembler.add_page(5100, 7, 0, b"abc".to_vec());
        let out = assembler.assemble(&locator(7, 3, 1), &lob()).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_missing_page_is_resolution_failure() {
        let mut assembler = LobAssembler::new();
        assembler.add_page(5000, 7, 0, b"abc".to_vec());
        match assembler.assemble(&locator(7, 6, 2), &lob()) {
            Err(RedoError::LobResolution { lob_id: 7, page: 1 }) => {}
            other => panic!("expected LobResolution, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_length_truncation() {
        let mut assembler = LobAssembler::new();
        assembler.add_page(5000, 7, 0, vec![b'x'; 100]);
        let out = assembler.assemble(&locator(7, 42, 1), &lob()).unwrap();
        assert_eq!(out.len(), 42);
    }

    #[test]
    fn test_inline_locator_needs_no_pages() {
        let mut assembler = LobAssembler::new();
        let loc = LobLocator {
            flags: 0,
            lob_id: 9,
            length: 2,
            page_count: 0,
            inline: Some(b"hi".to_vec()),
        };
        assert_eq!(assembler.assemble(&loc, &lob()).unwrap(), b"hi");
    }

    #[test]
    fn test_utf16_decode() {
        // "héllo" in UTF-16BE
        let data: Vec<u8> = "héllo".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let out = decode_character_lob(&data, CHARSET_AL16UTF16).unwrap();
        assert_eq!(out, "héllo".as_bytes());

        // byte charsets pass through
        let raw = b"plain".to_vec();
        assert_eq!(decode_character_lob(&raw, 873).unwrap(), raw);
    }

    #[test]
    fn test_utf16_odd_length_rejected() {
        assert!(decode_character_lob(&[0x00], CHARSET_AL16UTF16).is_err());
    }
}
