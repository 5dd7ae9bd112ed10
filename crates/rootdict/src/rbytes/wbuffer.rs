// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write cursor.

use super::float::{pack_nbits, quantize};
use super::{Header, BYTE_COUNT_MASK, CLASS_MASK, MAP_OFFSET, NEW_CLASS_TAG};
use crate::descriptor::FloatRange;
use crate::error::{WireError, WireResult};
use std::collections::HashMap;

/// Generate big-endian write methods for primitive types.
macro_rules! impl_write_be {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    };
}

/// Position of an object pointer opened with [`WBuffer::begin_object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMark {
    pos: usize,
}

/// Growable big-endian write cursor.
#[derive(Debug, Default)]
pub struct WBuffer {
    buffer: Vec<u8>,
    key_offset: usize,
    class_refs: HashMap<String, u32>,
}

impl WBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(key_offset: usize) -> Self {
        Self {
            key_offset,
            ..Self::default()
        }
    }

    /// Absolute position (length written + key offset).
    pub fn pos(&self) -> usize {
        self.buffer.len() + self.key_offset
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    impl_write_be!(write_u8, u8);
    impl_write_be!(write_i8, i8);
    impl_write_be!(write_u16, u16);
    impl_write_be!(write_i16, i16);
    impl_write_be!(write_u32, u32);
    impl_write_be!(write_i32, i32);
    impl_write_be!(write_u64, u64);
    impl_write_be!(write_i64, i64);
    impl_write_be!(write_f32, f32);
    impl_write_be!(write_f64, f64);

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    pub fn write_string(&mut self, value: &str) {
        let len = value.len();
        if len < 255 {
            self.write_u8(len as u8);
        } else {
            self.write_u8(255);
            self.write_u32(len as u32);
        }
        self.write_bytes(value.as_bytes());
    }

    /// NUL-terminated string, truncated at an embedded NUL.
    pub fn write_cstring(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.write_bytes(&bytes[..end]);
        self.write_u8(0);
    }

    /// Overwrite four bytes at an absolute position.
    fn patch_u32(&mut self, pos: usize, value: u32) -> WireResult<()> {
        let at = pos.wrapping_sub(self.key_offset);
        match self.buffer.get_mut(at..at.wrapping_add(4)) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_be_bytes());
                Ok(())
            }
            None => Err(WireError::UnexpectedEof {
                offset: pos,
                need: 4,
                have: self.buffer.len().saturating_sub(at),
            }),
        }
    }

    // ---- versioned blocks

    /// Byte-count placeholder followed by the version.
    pub fn write_header(&mut self, vers: i16) -> Header {
        let pos = self.pos();
        self.write_u32(0);
        self.write_u16(vers as u16);
        Header { pos, len: 0, vers }
    }

    /// Back-patch the byte count of a block opened with [`write_header`](Self::write_header).
    ///
    /// Returns the number of bytes the block occupies.
    pub fn set_header(&mut self, hdr: &Header) -> WireResult<usize> {
        let cur = self.pos();
        let bcnt = cur - hdr.pos - 4;
        if bcnt as u64 >= u64::from(BYTE_COUNT_MASK) {
            return Err(WireError::Limit {
                context: "byte count".into(),
                value: bcnt as i64,
                max: BYTE_COUNT_MASK as usize - 1,
            });
        }
        self.patch_u32(hdr.pos, bcnt as u32 | BYTE_COUNT_MASK)?;
        Ok(bcnt + 4)
    }

    // ---- compressed floats

    pub fn write_float16(&mut self, value: f32, range: &FloatRange) {
        if range.factor != 0.0 {
            let aint = quantize(f64::from(value), range.xmin, range.xmax, range.factor);
            self.write_u32(aint);
            return;
        }
        let mut nbits = range.xmin as u32;
        if nbits == 0 {
            nbits = 12;
        }
        let (exp, man) = pack_nbits(value, nbits);
        self.write_u8(exp);
        self.write_u16(man);
    }

    pub fn write_double32(&mut self, value: f64, range: &FloatRange) {
        if range.factor != 0.0 {
            let aint = quantize(value, range.xmin, range.xmax, range.factor);
            self.write_u32(aint);
            return;
        }
        let nbits = range.xmin as u32;
        if nbits == 0 {
            self.write_f32(value as f32);
            return;
        }
        let (exp, man) = pack_nbits(value as f32, nbits);
        self.write_u8(exp);
        self.write_u16(man);
    }

    /// Bits packed LSB-first into `ceil(len / 8)` bytes.
    pub fn write_bitset(&mut self, bits: &[bool]) {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        self.write_bytes(&bytes);
    }

    // ---- object pointers

    pub fn write_null_object(&mut self) {
        self.write_u32(0);
    }

    /// Open an object pointer of `class`: byte-count placeholder, then a new
    /// class tag or a back-reference to an earlier one.
    pub fn begin_object(&mut self, class: &str) -> ObjectMark {
        let pos = self.pos();
        self.write_u32(0);
        let start = self.pos();
        match self.class_refs.get(class) {
            Some(&tag) => self.write_u32(tag | CLASS_MASK),
            None => {
                self.write_u32(NEW_CLASS_TAG);
                self.write_cstring(class);
                self.class_refs
                    .insert(class.to_string(), (start as u32 + MAP_OFFSET) | CLASS_MASK);
            }
        }
        ObjectMark { pos }
    }

    /// Close an object pointer by back-patching its byte count.
    pub fn end_object(&mut self, mark: ObjectMark) -> WireResult<usize> {
        let hdr = Header {
            pos: mark.pos,
            len: 0,
            vers: 0,
        };
        self.set_header(&hdr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbytes::{ObjectTag, RBuffer};
    use crate::value::Value;

    #[test]
    fn test_wbuffer_writes_big_endian() {
        let mut w = WBuffer::new();
        w.write_i32(-132);
        w.write_u16(0x0102);
        assert_eq!(w.bytes(), &[0xff, 0xff, 0xff, 0x7c, 0x01, 0x02]);
    }

    #[test]
    fn test_header_byte_count_patch() {
        let mut w = WBuffer::with_offset(10);
        let hdr = w.write_header(3);
        w.write_u32(7);
        let n = w.set_header(&hdr).expect("set_header should succeed");
        assert_eq!(n, 10);
        assert_eq!(&w.bytes()[..4], &(6u32 | BYTE_COUNT_MASK).to_be_bytes());

        let mut r = RBuffer::with_offset(w.bytes(), 10);
        let rh = r.read_version().expect("Read version should succeed");
        assert_eq!(rh.vers, 3);
        assert_eq!(r.read_u32().expect("Read u32 should succeed"), 7);
        r.check_header(&rh, "T").expect("byte count should match");
    }

    #[test]
    fn test_string_length_prefix_forms() {
        let mut w = WBuffer::new();
        w.write_string("abc");
        assert_eq!(w.bytes(), &[3, b'a', b'b', b'c']);

        let long = "y".repeat(255);
        let mut w = WBuffer::new();
        w.write_string(&long);
        assert_eq!(w.bytes()[0], 255);
        assert_eq!(&w.bytes()[1..5], &255u32.to_be_bytes());
        assert_eq!(w.len(), 5 + 255);
    }

    #[test]
    fn test_class_tag_is_reused() {
        let mut w = WBuffer::new();
        for v in [1u32, 2] {
            let mark = w.begin_object("P2");
            w.write_u32(v);
            w.end_object(mark).expect("end_object should succeed");
        }
        w.write_null_object();

        let mut r = RBuffer::new(w.bytes());
        for v in [1u32, 2] {
            match r.read_object_tag().expect("object tag") {
                ObjectTag::Inline { class, beg, bcnt } => {
                    assert_eq!(class, "P2");
                    assert_eq!(r.read_u32().expect("payload"), v);
                    r.end_object(&class, beg, bcnt, Value::U32(v))
                        .expect("byte count should match");
                }
                other => panic!("Expected inline object, got {:?}", other),
            }
        }
        assert_eq!(r.read_object_tag().expect("object tag"), ObjectTag::Null);
    }

    #[test]
    fn test_compressed_float_with_factor() {
        let range = FloatRange::new(0.0, 10.0, 16);
        let mut w = WBuffer::new();
        w.write_double32(3.3, &range);
        w.write_float16(12.0, &range);
        let mut r = RBuffer::new(w.bytes());
        let d = r.read_double32(&range).expect("Read d32 should succeed");
        assert!((d - 3.3).abs() < 10.0 / 65536.0);
        let f = r.read_float16(&range).expect("Read f16 should succeed");
        assert!((f - 10.0).abs() < 1e-3);
    }
}
