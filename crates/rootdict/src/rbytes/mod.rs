// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Big-endian read/write cursors for the ROOT streamer wire format.
//!
//! Both cursors report positions shifted by a key offset, so object
//! reference tags computed here match the ones a file container would
//! compute for the same record.

mod float;
mod rbuffer;
mod wbuffer;

pub use rbuffer::{ObjectTag, RBuffer};
pub use wbuffer::{ObjectMark, WBuffer};

/// Marker bit flagging a byte count in front of a version.
pub const BYTE_COUNT_MASK: u32 = 0x4000_0000;

/// Same marker, seen from the high 16-bit half of the byte count.
pub const BYTE_COUNT_VMASK: u16 = 0x4000;

/// Tag announcing a class name on first use.
pub const NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;

/// Bit distinguishing class references from object references.
pub const CLASS_MASK: u32 = 0x8000_0000;

/// Displacement added to positions stored in the reference table.
pub const MAP_OFFSET: u32 = 2;

/// Version bit set on containers streamed member-wise.
pub const STREAMED_MEMBER_WISE: i16 = 0x4000;

/// `TObject::fBits` flag: a process id follows the bits.
pub const IS_REFERENCED: u32 = 1 << 4;

/// Version written in front of STL container payloads.
pub const STL_VERSION: i16 = 9;

/// Versioned block header.
///
/// `len == 0` means the block carried no byte count and nothing is checked
/// when the block is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Position of the byte count (or of the version when there is none).
    pub pos: usize,
    /// Byte count without the marker bit.
    pub len: u32,
    pub vers: i16,
}

impl Header {
    pub fn member_wise(&self) -> bool {
        self.vers & STREAMED_MEMBER_WISE != 0
    }

    /// Version with the member-wise bit cleared.
    pub fn class_version(&self) -> i16 {
        self.vers & !STREAMED_MEMBER_WISE
    }
}
