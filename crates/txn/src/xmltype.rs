//! Decoder for the binary XMLType storage. The encoded document is a token
//! stream; tag and attribute names are dictionary codes resolved through the
//! per-tokSuf XDB token sets.
//!
//! Token vocabulary (lengths little-endian):
//!   9E 01          header
//!   01             prolog
//!   C8 <u32 qname> tag open
//!   C9 <u32 qname> attribute (value is the following text token)
//!   D0             end of the open tag's attribute list
//!   80 <u8 len>    text chunk
//!   81 <u64 len>   long text chunk
//!   D9             end tag
//!   DA             repeat last closed tag (open it again)
//!   A0             end of document

use redolink_common::{RedoError, Result};
use redolink_schema::XmlDicts;

pub const TOKEN_HEADER: [u8; 2] = [0x9E, 0x01];
pub const TOKEN_PROLOG: u8 = 0x01;
pub const TOKEN_TAG_OPEN: u8 = 0xC8;
pub const TOKEN_ATTRIBUTE: u8 = 0xC9;
pub const TOKEN_ATTRS_END: u8 = 0xD0;
pub const TOKEN_TEXT8: u8 = 0x80;
pub const TOKEN_TEXT64: u8 = 0x81;
pub const TOKEN_TAG_END: u8 = 0xD9;
pub const TOKEN_TAG_REPEAT: u8 = 0xDA;
pub const TOKEN_EOF: u8 = 0xA0;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| bad("token stream ends unexpectedly"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(bad("token payload ends unexpectedly"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn bad(reason: &str) -> RedoError {
    RedoError::Dictionary(format!("binary xml: {}", reason))
}

/// Decode one binary-XML document to UTF-8 text.
pub fn decode_binary_xml(data: &[u8], dicts: &XmlDicts) -> Result<String> {
    let mut r = Reader { data, pos: 0 };
    if r.take(2)? != TOKEN_HEADER {
        return Err(bad("missing header"));
    }

    let mut out = String::new();
    let mut stack: Vec<String> = Vec::new();
    let mut last_closed: Option<u32> = None;
    let mut tag_open = false;

    loop {
        let token = r.byte()?;
        match token {
            TOKEN_PROLOG => {
                out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
            }
            TOKEN_TAG_OPEN | TOKEN_TAG_REPEAT => {
                if tag_open {
                    out.push('>');
                }
                let qname_id = if token == TOKEN_TAG_OPEN {
                    r.u32()?
                } else {
                    last_closed.ok_or_else(|| bad("repeat token with no closed tag"))?
                };
                let qname = dicts
                    .qname(qname_id)
                    .ok_or_else(|| bad(&format!("unknown qname code {}", qname_id)))?;
                out.push('<');
                out.push_str(&qname.local_name);
                if qname.namespace_id != 0 {
                    let uri = dicts
                        .namespace(qname.namespace_id)
                        .ok_or_else(|| bad(&format!("unknown namespace code {}", qname.namespace_id)))?;
                    out.push_str(" xmlns=\"");
                    out.push_str(uri);
                    out.push('"');
                }
                stack.push(qname.local_name.clone());
                tag_open = true;
            }
            TOKEN_ATTRIBUTE => {
                if !tag_open {
                    return Err(bad("attribute outside an open tag"));
                }
                let qname_id = r.u32()?;
                let qname = dicts
                    .qname(qname_id)
                    .ok_or_else(|| bad(&format!("unknown qname code {}", qname_id)))?;
                let value = read_text(&mut r)?;
                out.push(' ');
                out.push_str(&qname.local_name);
                out.push_str("=\"");
                out.push_str(&escape(&value));
                out.push('"');
            }
            TOKEN_ATTRS_END => {
                if !tag_open {
                    return Err(bad("stray attribute-list terminator"));
                }
                out.push('>');
                tag_open = false;
            }
            TOKEN_TEXT8 | TOKEN_TEXT64 => {
                if tag_open {
                    out.push('>');
                    tag_open = false;
                }
                let len = if token == TOKEN_TEXT8 {
                    r.byte()? as usize
                } else {
                    r.u64()? as usize
                };
                let bytes = r.take(len)?;
                let text =
                    std::str::from_utf8(bytes).map_err(|_| bad("text chunk is not UTF-8"))?;
                out.push_str(&escape(text));
            }
            TOKEN_TAG_END => {
                if tag_open {
                    out.push('>');
                    tag_open = false;
                }
                let name = stack.pop().ok_or_else(|| bad("end tag with empty stack"))?;
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
                // remember for the repeat token; re-derive the id lazily
                last_closed = dicts_lookup_id(dicts, &name);
            }
            TOKEN_EOF => {
                if !stack.is_empty() {
                    return Err(bad("document ended with open tags"));
                }
                return Ok(out);
            }
            other => return Err(bad(&format!("unknown token 0x{:02X}", other))),
        }
    }
}

fn read_text(r: &mut Reader<'_>) -> Result<String> {
    match r.byte()? {
        TOKEN_TEXT8 => {
            let len = r.byte()? as usize;
            let bytes = r.take(len)?;
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| bad("attribute value is not UTF-8"))
        }
        TOKEN_TEXT64 => {
            let len = r.u64()? as usize;
            let bytes = r.take(len)?;
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| bad("attribute value is not UTF-8"))
        }
        other => Err(bad(&format!("expected text token, found 0x{:02X}", other))),
    }
}

fn dicts_lookup_id(dicts: &XmlDicts, local_name: &str) -> Option<u32> {
    dicts
        .qnames
        .iter()
        .find(|(_, q)| q.local_name == local_name)
        .map(|(id, _)| *id)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
