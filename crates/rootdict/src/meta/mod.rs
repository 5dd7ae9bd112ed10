// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk type codes, scalar kinds and STL container kinds.
//!
//! Field descriptors carry a raw `i32` type code. Codes below
//! [`code::OFFSET_L`] are scalars, `OFFSET_L + k` is a fixed array of `k`,
//! `OFFSET_P + k` a counted array of `k`, and `CONV + k` a schema-evolution
//! conversion from `k`.

mod cxx;

pub use cxx::{builtin_kind, is_builtin, type_name_to_kind, Builtin};

use std::fmt;

/// Raw type codes as written in descriptor records.
pub mod code {
    pub const BASE: i32 = 0;
    pub const CHAR: i32 = 1;
    pub const SHORT: i32 = 2;
    pub const INT: i32 = 3;
    pub const LONG: i32 = 4;
    pub const FLOAT: i32 = 5;
    pub const COUNTER: i32 = 6;
    pub const CHAR_STAR: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const DOUBLE32: i32 = 9;
    pub const LEGACY_CHAR: i32 = 10;
    pub const UCHAR: i32 = 11;
    pub const USHORT: i32 = 12;
    pub const UINT: i32 = 13;
    pub const ULONG: i32 = 14;
    pub const BITS: i32 = 15;
    pub const LONG64: i32 = 16;
    pub const ULONG64: i32 = 17;
    pub const BOOL: i32 = 18;
    pub const FLOAT16: i32 = 19;

    /// Fixed-size array offset.
    pub const OFFSET_L: i32 = 20;
    /// Counted (pointer-to-N) array offset.
    pub const OFFSET_P: i32 = 40;

    pub const OBJECT: i32 = 61;
    pub const ANY: i32 = 62;
    /// Pointer to a `TObject`-derived class.
    pub const OBJECTP: i32 = 63;
    /// Pointer to a `TObject`-derived class, possibly null.
    pub const OBJECT_PP: i32 = 64;
    pub const TSTRING: i32 = 65;
    pub const TOBJECT: i32 = 66;
    pub const TNAMED: i32 = 67;
    /// Pointer to a non-`TObject` class.
    pub const ANYP: i32 = 68;
    /// Pointer to a non-`TObject` class, possibly null.
    pub const ANY_PP: i32 = 69;
    pub const ANY_P_NO_VT: i32 = 70;
    pub const STLP: i32 = 71;

    pub const SKIP: i32 = 100;
    pub const SKIP_L: i32 = 120;
    pub const SKIP_P: i32 = 140;

    /// Schema-evolution conversion offset.
    pub const CONV: i32 = 200;
    pub const CONV_L: i32 = 220;
    pub const CONV_P: i32 = 240;

    pub const STL: i32 = 300;
    pub const STL_STRING: i32 = 365;

    pub const STREAMER: i32 = 500;
    pub const STREAM_LOOP: i32 = 501;
}

// ---- ScalarKind

/// Fixed-width scalar kinds with a direct wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarKind {
    Bool,
    Char,
    Short,
    Int,
    Long,
    Long64,
    UChar,
    UShort,
    UInt,
    ULong,
    ULong64,
    Float,
    Double,
    /// 32-bit unsigned bit mask.
    Bits,
    /// Integer counter; wire width comes from the field's declared size.
    Counter,
    Float16,
    Double32,
}

impl ScalarKind {
    /// Map a raw scalar code (`< OFFSET_L`) to a kind.
    ///
    /// `CharStar` and `LegacyChar` are not scalars and yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            code::BOOL => ScalarKind::Bool,
            code::CHAR => ScalarKind::Char,
            code::SHORT => ScalarKind::Short,
            code::INT => ScalarKind::Int,
            code::LONG => ScalarKind::Long,
            code::LONG64 => ScalarKind::Long64,
            code::UCHAR => ScalarKind::UChar,
            code::USHORT => ScalarKind::UShort,
            code::UINT => ScalarKind::UInt,
            code::ULONG => ScalarKind::ULong,
            code::ULONG64 => ScalarKind::ULong64,
            code::FLOAT => ScalarKind::Float,
            code::DOUBLE => ScalarKind::Double,
            code::BITS => ScalarKind::Bits,
            code::COUNTER => ScalarKind::Counter,
            code::FLOAT16 => ScalarKind::Float16,
            code::DOUBLE32 => ScalarKind::Double32,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> i32 {
        match self {
            ScalarKind::Bool => code::BOOL,
            ScalarKind::Char => code::CHAR,
            ScalarKind::Short => code::SHORT,
            ScalarKind::Int => code::INT,
            ScalarKind::Long => code::LONG,
            ScalarKind::Long64 => code::LONG64,
            ScalarKind::UChar => code::UCHAR,
            ScalarKind::UShort => code::USHORT,
            ScalarKind::UInt => code::UINT,
            ScalarKind::ULong => code::ULONG,
            ScalarKind::ULong64 => code::ULONG64,
            ScalarKind::Float => code::FLOAT,
            ScalarKind::Double => code::DOUBLE,
            ScalarKind::Bits => code::BITS,
            ScalarKind::Counter => code::COUNTER,
            ScalarKind::Float16 => code::FLOAT16,
            ScalarKind::Double32 => code::DOUBLE32,
        }
    }

    /// In-memory size of one element, as recorded in descriptor sizes.
    ///
    /// `Counter` reports 4; its real width is taken from the descriptor.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Char | ScalarKind::UChar => 1,
            ScalarKind::Short | ScalarKind::UShort => 2,
            ScalarKind::Int
            | ScalarKind::UInt
            | ScalarKind::Bits
            | ScalarKind::Counter
            | ScalarKind::Float
            | ScalarKind::Float16 => 4,
            ScalarKind::Long
            | ScalarKind::Long64
            | ScalarKind::ULong
            | ScalarKind::ULong64
            | ScalarKind::Double
            | ScalarKind::Double32 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            ScalarKind::Float | ScalarKind::Double | ScalarKind::Float16 | ScalarKind::Double32
        )
    }

    /// Compressed floats take a `[min,max,nbits]` range from the field title.
    pub fn is_compressed(self) -> bool {
        matches!(self, ScalarKind::Float16 | ScalarKind::Double32)
    }

    /// Canonical C++ spelling used when synthesizing descriptors.
    pub fn type_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Char => "char",
            ScalarKind::Short => "short",
            ScalarKind::Int => "int",
            ScalarKind::Long => "long",
            ScalarKind::Long64 => "Long64_t",
            ScalarKind::UChar => "unsigned char",
            ScalarKind::UShort => "unsigned short",
            ScalarKind::UInt => "unsigned int",
            ScalarKind::ULong => "unsigned long",
            ScalarKind::ULong64 => "ULong64_t",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Bits => "UInt_t",
            ScalarKind::Counter => "Int_t",
            ScalarKind::Float16 => "Float16_t",
            ScalarKind::Double32 => "Double32_t",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

// ---- StlKind

/// STL container kinds (`ESTLType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StlKind {
    Vector,
    List,
    Deque,
    Map,
    MultiMap,
    Set,
    MultiSet,
    Bitset,
    ForwardList,
    UnorderedSet,
    UnorderedMultiSet,
    UnorderedMap,
    UnorderedMultiMap,
    /// `std::string` as a top-level container field.
    String,
}

impl StlKind {
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            1 => StlKind::Vector,
            2 => StlKind::List,
            3 => StlKind::Deque,
            4 => StlKind::Map,
            5 => StlKind::MultiMap,
            6 => StlKind::Set,
            7 => StlKind::MultiSet,
            8 => StlKind::Bitset,
            9 => StlKind::ForwardList,
            10 => StlKind::UnorderedSet,
            11 => StlKind::UnorderedMultiSet,
            12 => StlKind::UnorderedMap,
            13 => StlKind::UnorderedMultiMap,
            365 => StlKind::String,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> i32 {
        match self {
            StlKind::Vector => 1,
            StlKind::List => 2,
            StlKind::Deque => 3,
            StlKind::Map => 4,
            StlKind::MultiMap => 5,
            StlKind::Set => 6,
            StlKind::MultiSet => 7,
            StlKind::Bitset => 8,
            StlKind::ForwardList => 9,
            StlKind::UnorderedSet => 10,
            StlKind::UnorderedMultiSet => 11,
            StlKind::UnorderedMap => 12,
            StlKind::UnorderedMultiMap => 13,
            StlKind::String => 365,
        }
    }

    /// Template name without namespace, e.g. `unordered_map`.
    pub fn template_name(self) -> &'static str {
        match self {
            StlKind::Vector => "vector",
            StlKind::List => "list",
            StlKind::Deque => "deque",
            StlKind::Map => "map",
            StlKind::MultiMap => "multimap",
            StlKind::Set => "set",
            StlKind::MultiSet => "multiset",
            StlKind::Bitset => "bitset",
            StlKind::ForwardList => "forward_list",
            StlKind::UnorderedSet => "unordered_set",
            StlKind::UnorderedMultiSet => "unordered_multiset",
            StlKind::UnorderedMap => "unordered_map",
            StlKind::UnorderedMultiMap => "unordered_multimap",
            StlKind::String => "string",
        }
    }

    /// Recognise the container kind from a (possibly `std::`-qualified) type name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix("std::").unwrap_or(name);
        if name == "string" {
            return Some(StlKind::String);
        }
        let head = &name[..name.find('<')?];
        let kind = match head.trim() {
            "vector" => StlKind::Vector,
            "list" => StlKind::List,
            "deque" => StlKind::Deque,
            "map" => StlKind::Map,
            "multimap" => StlKind::MultiMap,
            "set" => StlKind::Set,
            "multiset" => StlKind::MultiSet,
            "bitset" => StlKind::Bitset,
            "forward_list" => StlKind::ForwardList,
            "unordered_set" => StlKind::UnorderedSet,
            "unordered_multiset" => StlKind::UnorderedMultiSet,
            "unordered_map" => StlKind::UnorderedMap,
            "unordered_multimap" => StlKind::UnorderedMultiMap,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            StlKind::Vector | StlKind::List | StlKind::Deque | StlKind::ForwardList
        )
    }

    pub fn is_set(self) -> bool {
        matches!(
            self,
            StlKind::Set | StlKind::MultiSet | StlKind::UnorderedSet | StlKind::UnorderedMultiSet
        )
    }

    pub fn is_map(self) -> bool {
        matches!(
            self,
            StlKind::Map | StlKind::MultiMap | StlKind::UnorderedMap | StlKind::UnorderedMultiMap
        )
    }
}

impl fmt::Display for StlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}
