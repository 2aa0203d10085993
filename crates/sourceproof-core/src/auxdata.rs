//! The auxdata trailer solc appends to bytecode: a CBOR map (`ipfs`,
//! `bzzr0`, `bzzr1`, `solc`, `experimental` keys) followed by a two-byte
//! big-endian length of the map.
//!
//! The decoder below covers exactly the subset of CBOR solc emits:
//! definite-length maps with text keys and byte-string / text / bool
//! values. It is not a general CBOR implementation.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxdataValue {
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
}

/// Split bytecode into `(body, auxdata)` using the trailing length suffix.
/// Returns `None` when no plausible trailer is present; callers fall back
/// to comparing the raw bytes.
pub fn split_auxdata(code: &[u8]) -> Option<(&[u8], &[u8])> {
    if code.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([code[code.len() - 2], code[code.len() - 1]]) as usize;
    if len == 0 || code.len() < len + 2 {
        return None;
    }
    let aux_start = code.len() - 2 - len;
    let auxdata = &code[aux_start..code.len() - 2];
    // Only accept trailers that actually decode; a length suffix can occur
    // by chance inside ordinary code.
    decode_map(auxdata)?;
    Some((&code[..aux_start], auxdata))
}

/// Decode the auxdata CBOR map. The whole input must be consumed.
pub fn decode_map(bytes: &[u8]) -> Option<BTreeMap<String, AuxdataValue>> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let (major, count) = cursor.head()?;
    if major != 5 {
        return None;
    }
    let mut out = BTreeMap::new();
    for _ in 0..count {
        let key = cursor.text()?;
        let value = cursor.value()?;
        out.insert(key, value);
    }
    if cursor.pos != bytes.len() {
        return None;
    }
    Some(out)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    /// Read a major type and its argument (small, one-byte or two-byte).
    fn head(&mut self) -> Option<(u8, usize)> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let arg = match initial & 0x1f {
            n @ 0..=23 => n as usize,
            24 => self.byte()? as usize,
            25 => {
                let hi = self.byte()? as usize;
                let lo = self.byte()? as usize;
                (hi << 8) | lo
            }
            _ => return None,
        };
        Some((major, arg))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.bytes.len() {
            return None;
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn text(&mut self) -> Option<String> {
        let (major, len) = self.head()?;
        if major != 3 {
            return None;
        }
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }

    fn value(&mut self) -> Option<AuxdataValue> {
        let initial = *self.bytes.get(self.pos)?;
        match initial {
            0xf4 => {
                self.pos += 1;
                Some(AuxdataValue::Bool(false))
            }
            0xf5 => {
                self.pos += 1;
                Some(AuxdataValue::Bool(true))
            }
            _ => {
                let (major, len) = self.head()?;
                match major {
                    2 => Some(AuxdataValue::Bytes(self.take(len)?.to_vec())),
                    3 => Some(AuxdataValue::Text(
                        String::from_utf8(self.take(len)?.to_vec()).ok()?,
                    )),
                    _ => None,
                }
            }
        }
    }
}
