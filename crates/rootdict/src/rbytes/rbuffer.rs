// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read cursor.

use super::float::{dequantize, unpack_nbits};
use super::{Header, BYTE_COUNT_MASK, BYTE_COUNT_VMASK, CLASS_MASK, MAP_OFFSET, NEW_CLASS_TAG};
use crate::config::DEFAULT_MAX_CLASS_NAME_LEN;
use crate::descriptor::FloatRange;
use crate::error::{WireError, WireResult};
use crate::value::Value;
use std::collections::HashMap;

/// Generate big-endian read methods for primitive types.
///
/// Each generated method bounds-checks, decodes `$size` bytes with
/// `from_be_bytes()` and advances the cursor.
macro_rules! impl_read_be {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> WireResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(<$type>::from_be_bytes(bytes))
        }
    };
}

/// Entry of the per-buffer reference table.
#[derive(Debug, Clone)]
enum Ref {
    Class(String),
    Object(Value),
}

/// Outcome of reading an object pointer tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectTag {
    /// Null pointer.
    Null,
    /// Back-reference to an object decoded earlier in this buffer.
    Ref(Value),
    /// An object of `class` follows inline.
    Inline {
        class: String,
        /// Position of the pointer's byte count.
        beg: usize,
        /// Byte count without marker bit, 0 when absent.
        bcnt: u32,
    },
}

/// Bounds-checked big-endian read cursor over an in-memory record.
pub struct RBuffer<'a> {
    buffer: &'a [u8],
    offset: usize,
    key_offset: usize,
    refs: HashMap<u64, Ref>,
    max_class_name: usize,
}

impl<'a> RBuffer<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_offset(buffer, 0)
    }

    /// Cursor whose positions are displaced by `key_offset` (the length of
    /// the key record in front of the payload).
    pub fn with_offset(buffer: &'a [u8], key_offset: usize) -> Self {
        Self {
            buffer,
            offset: 0,
            key_offset,
            refs: HashMap::new(),
            max_class_name: DEFAULT_MAX_CLASS_NAME_LEN,
        }
    }

    pub(crate) fn set_max_class_name(&mut self, max: usize) {
        self.max_class_name = max;
    }

    /// Absolute position (cursor + key offset).
    pub fn pos(&self) -> usize {
        self.offset + self.key_offset
    }

    pub fn set_pos(&mut self, pos: usize) -> WireResult<()> {
        let rel = pos.checked_sub(self.key_offset).unwrap_or(usize::MAX);
        if rel > self.buffer.len() {
            return Err(WireError::UnexpectedEof {
                offset: self.offset,
                need: rel.saturating_sub(self.offset),
                have: self.remaining(),
            });
        }
        self.offset = rel;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    pub fn read_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::UnexpectedEof {
                offset: self.pos(),
                need: len,
                have: self.remaining(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    impl_read_be!(read_u8, u8, 1);
    impl_read_be!(read_i8, i8, 1);
    impl_read_be!(read_u16, u16, 2);
    impl_read_be!(read_i16, i16, 2);
    impl_read_be!(read_u32, u32, 4);
    impl_read_be!(read_i32, i32, 4);
    impl_read_be!(read_u64, u64, 8);
    impl_read_be!(read_i64, i64, 8);
    impl_read_be!(read_f32, f32, 4);
    impl_read_be!(read_f64, f64, 8);

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed string: u8 length, or 255 followed by a u32 length.
    pub fn read_string(&mut self) -> WireResult<String> {
        let start = self.pos();
        let mut len = usize::from(self.read_u8()?);
        if len == 255 {
            len = self.read_u32()? as usize;
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidString { offset: start })
    }

    /// `std::string` payload; same framing as [`read_string`](Self::read_string).
    pub fn read_std_string(&mut self) -> WireResult<String> {
        self.read_string()
    }

    /// NUL-terminated string of at most `max` bytes (terminator included).
    pub fn read_cstring(&mut self, max: usize) -> WireResult<String> {
        let start = self.pos();
        let mut out = Vec::new();
        for _ in 0..max {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            out.push(b);
        }
        String::from_utf8(out).map_err(|_| WireError::InvalidString { offset: start })
    }

    // ---- versioned blocks

    /// Read a version, with or without a leading byte count.
    pub fn read_version(&mut self) -> WireResult<Header> {
        let pos = self.pos();
        let bcnt = self.read_u32()?;
        if bcnt & BYTE_COUNT_MASK != 0 {
            let vers = self.read_u16()? as i16;
            return Ok(Header {
                pos,
                len: bcnt & !BYTE_COUNT_MASK,
                vers,
            });
        }
        // no byte count: rewind and read the bare version
        self.set_pos(pos)?;
        let vers = self.read_u16()? as i16;
        Ok(Header { pos, len: 0, vers })
    }

    /// Verify that exactly the declared number of bytes was consumed.
    pub fn check_header(&self, hdr: &Header, class: &str) -> WireResult<()> {
        if hdr.len == 0 {
            return Ok(());
        }
        let want = hdr.pos as i64 + i64::from(hdr.len) + 4;
        let got = self.pos() as i64;
        if got == want {
            return Ok(());
        }
        Err(WireError::ByteCount {
            class: class.to_string(),
            start: hdr.pos,
            expected: want,
            actual: got,
        })
    }

    /// Version of a custom-streamed class; the byte count is skipped when present.
    pub fn skip_version(&mut self) -> WireResult<i16> {
        let mut vers = self.read_i16()?;
        if vers as u16 & BYTE_COUNT_VMASK != 0 {
            let _ = self.read_i16()?;
            vers = self.read_i16()?;
        }
        Ok(vers)
    }

    // ---- compressed floats

    pub fn read_float16(&mut self, range: &FloatRange) -> WireResult<f32> {
        if range.factor != 0.0 {
            let aint = self.read_u32()?;
            return Ok(dequantize(aint, range.xmin, range.factor) as f32);
        }
        let mut nbits = range.xmin as u32;
        if nbits == 0 {
            nbits = 12;
        }
        let exp = self.read_u8()?;
        let man = self.read_u16()?;
        Ok(unpack_nbits(exp, man, nbits))
    }

    pub fn read_double32(&mut self, range: &FloatRange) -> WireResult<f64> {
        if range.factor != 0.0 {
            let aint = self.read_u32()?;
            return Ok(dequantize(aint, range.xmin, range.factor));
        }
        let nbits = range.xmin as u32;
        if nbits == 0 {
            return Ok(f64::from(self.read_f32()?));
        }
        let exp = self.read_u8()?;
        let man = self.read_u16()?;
        Ok(f64::from(unpack_nbits(exp, man, nbits)))
    }

    /// `nbits` bits packed LSB-first into `ceil(nbits / 8)` bytes.
    pub fn read_bitset(&mut self, nbits: usize) -> WireResult<Vec<bool>> {
        let bytes = self.read_bytes(nbits.div_ceil(8))?;
        Ok((0..nbits)
            .map(|i| bytes[i / 8] >> (i % 8) & 1 != 0)
            .collect())
    }

    // ---- object pointers

    /// Read the tag in front of an object pointer.
    ///
    /// Class names seen for the first time are recorded so later class
    /// references resolve. Unknown object back-references are skipped and
    /// read as null.
    pub fn read_object_tag(&mut self) -> WireResult<ObjectTag> {
        let beg = self.pos();
        let mut bcnt = self.read_u32()?;
        let tag;
        let mut start = 0;
        let versioned;
        if bcnt & BYTE_COUNT_MASK == 0 || bcnt == NEW_CLASS_TAG {
            tag = bcnt;
            bcnt = 0;
            versioned = false;
        } else {
            versioned = true;
            start = self.pos();
            tag = self.read_u32()?;
            bcnt &= !BYTE_COUNT_MASK;
        }

        if tag & CLASS_MASK == 0 {
            if tag == 0 {
                return Ok(ObjectTag::Null);
            }
            if tag == 1 {
                return Err(WireError::BadObjectTag { offset: beg, tag });
            }
            return match self.refs.get(&u64::from(tag)) {
                Some(Ref::Object(obj)) => Ok(ObjectTag::Ref(obj.clone())),
                Some(Ref::Class(_)) => Err(WireError::BadObjectTag { offset: beg, tag }),
                None => {
                    log::warn!("unknown object reference 0x{:08x} at {}, read as null", tag, beg);
                    self.set_pos(beg + bcnt as usize + 4)?;
                    Ok(ObjectTag::Null)
                }
            };
        }

        if tag == NEW_CLASS_TAG {
            let class = self.read_cstring(self.max_class_name)?;
            let key = if versioned {
                (start + MAP_OFFSET as usize) as u64
            } else {
                self.refs.len() as u64 + 1
            };
            self.refs.insert(key, Ref::Class(class.clone()));
            return Ok(ObjectTag::Inline { class, beg, bcnt });
        }

        let key = u64::from(tag & !CLASS_MASK);
        match self.refs.get(&key) {
            Some(Ref::Class(class)) => Ok(ObjectTag::Inline {
                class: class.clone(),
                beg,
                bcnt,
            }),
            _ => Err(WireError::BadObjectTag { offset: beg, tag }),
        }
    }

    /// Close an inline object: check its byte count and record it for back-references.
    pub fn end_object(&mut self, class: &str, beg: usize, bcnt: u32, obj: Value) -> WireResult<()> {
        if bcnt != 0 {
            let hdr = Header {
                pos: beg,
                len: bcnt,
                vers: 0,
            };
            self.check_header(&hdr, class)?;
        }
        let key = if bcnt != 0 {
            (beg + MAP_OFFSET as usize) as u64
        } else {
            self.refs.len() as u64 + 1
        };
        self.refs.insert(key, Ref::Object(obj));
        Ok(())
    }
}
