// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for schema building, wire transcoding and unsupported
//! streaming forms.
//!
//! Three families are kept apart so callers can tell "this input needs a
//! feature we don't support" from "this input is corrupt":
//!
//! - [`SchemaError`]: raised while building descriptors or compiling codecs,
//!   before any byte is touched.
//! - [`WireError`]: raised while reading or writing a buffer.
//! - [`Error::Unsupported`]: a recognised but unimplemented streaming form.

use std::fmt;

/// Schema-level failure (descriptor validation, codec compilation, introspection).
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A counted or loop array names a counter that no field or base provides.
    UnresolvedCounter {
        class: String,
        field: String,
        counter: String,
    },
    /// The counter field exists but does not hold an integer.
    NonIntegerCounter {
        class: String,
        counter: String,
        type_name: String,
    },
    /// A type name could not be mapped to a scalar, container or class.
    UnknownType { context: String, type_name: String },
    /// A nested class descriptor is missing from the registry.
    UnknownClass { name: String, version: i32 },
    /// Malformed `[min,max(,nbits)]` range in a field title.
    BadRange { title: String, reason: String },
    /// Malformed container template name.
    BadTemplate { type_name: String, reason: String },
    /// A native shape has no wire representation.
    UnsupportedShape { field: String, shape: String },
    /// Strict registration refused a descriptor whose checksum differs.
    ChecksumMismatch {
        name: String,
        version: i32,
        stored: u32,
        incoming: u32,
    },
    /// Structurally invalid descriptor.
    InvalidDescriptor { class: String, reason: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnresolvedCounter {
                class,
                field,
                counter,
            } => write!(
                f,
                "{}::{}: could not find counter field {:?}",
                class, field, counter
            ),
            SchemaError::NonIntegerCounter {
                class,
                counter,
                type_name,
            } => write!(
                f,
                "{}: counter field {:?} has non-integer type {:?}",
                class, counter, type_name
            ),
            SchemaError::UnknownType { context, type_name } => {
                write!(f, "{}: unknown type name {:?}", context, type_name)
            }
            SchemaError::UnknownClass { name, version } => {
                write!(f, "no descriptor for class {:?} (version={})", name, version)
            }
            SchemaError::BadRange { title, reason } => {
                write!(f, "invalid range in title {:?}: {}", title, reason)
            }
            SchemaError::BadTemplate { type_name, reason } => {
                write!(f, "invalid template {:?}: {}", type_name, reason)
            }
            SchemaError::UnsupportedShape { field, shape } => {
                write!(f, "field {:?}: unsupported native shape {}", field, shape)
            }
            SchemaError::ChecksumMismatch {
                name,
                version,
                stored,
                incoming,
            } => write!(
                f,
                "class {:?} version {}: checksum mismatch (stored=0x{:08x}, incoming=0x{:08x})",
                name, version, stored, incoming
            ),
            SchemaError::InvalidDescriptor { class, reason } => {
                write!(f, "invalid descriptor for {:?}: {}", class, reason)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Wire-level failure while transcoding a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum WireError {
    /// Ran off the end of the input.
    UnexpectedEof {
        offset: usize,
        need: usize,
        have: usize,
    },
    /// Byte count declared in a header disagrees with the bytes consumed.
    ByteCount {
        class: String,
        start: usize,
        expected: i64,
        actual: i64,
    },
    /// Class version on the wire differs from the compiled descriptor.
    VersionMismatch {
        class: String,
        expected: i32,
        actual: i32,
    },
    /// A collection length disagrees with its counter.
    LengthMismatch {
        class: String,
        field: String,
        expected: usize,
        actual: usize,
    },
    /// Target value does not have the shape the codec expects.
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },
    /// Corrupt or unknown object reference tag.
    BadObjectTag { offset: usize, tag: u32 },
    /// String payload is not valid UTF-8.
    InvalidString { offset: usize },
    /// Decoded size exceeds a configured limit or is negative.
    Limit {
        context: String,
        value: i64,
        max: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnexpectedEof { offset, need, have } => write!(
                f,
                "unexpected end of buffer at offset {}: need {} bytes, have {}",
                offset, need, have
            ),
            WireError::ByteCount {
                class,
                start,
                expected,
                actual,
            } => {
                let dir = if actual > expected {
                    "too many"
                } else {
                    "too few"
                };
                write!(
                    f,
                    "{}: read {} bytes (start={}, expected end={}, got={})",
                    class, dir, start, expected, actual
                )
            }
            WireError::VersionMismatch {
                class,
                expected,
                actual,
            } => write!(
                f,
                "{}: inconsistent version (descriptor={}, wire={})",
                class, expected, actual
            ),
            WireError::LengthMismatch {
                class,
                field,
                expected,
                actual,
            } => write!(
                f,
                "{}::{}: length mismatch (counter={}, elements={})",
                class, field, expected, actual
            ),
            WireError::TypeMismatch {
                context,
                expected,
                found,
            } => write!(
                f,
                "{}: type mismatch: expected {}, found {}",
                context, expected, found
            ),
            WireError::BadObjectTag { offset, tag } => {
                write!(f, "invalid object tag 0x{:08x} at offset {}", tag, offset)
            }
            WireError::InvalidString { offset } => {
                write!(f, "invalid UTF-8 string at offset {}", offset)
            }
            WireError::Limit {
                context,
                value,
                max,
            } => write!(f, "{}: size {} outside [0, {}]", context, value, max),
        }
    }
}

impl std::error::Error for WireError {}

/// Crate-wide error.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Schema(SchemaError),
    Wire(WireError),
    /// Streaming form recognised but not implemented.
    Unsupported {
        feature: &'static str,
        context: String,
    },
    /// Configuration could not be loaded.
    Config(String),
    /// Filesystem failure (persistence, config files).
    Io { path: String, reason: String },
}

impl Error {
    pub(crate) fn unsupported(feature: &'static str, context: impl Into<String>) -> Self {
        Error::Unsupported {
            feature,
            context: context.into(),
        }
    }

    /// True for recognised-but-unimplemented streaming forms.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, Error::Schema(_))
    }

    pub fn is_wire(&self) -> bool {
        matches!(self, Error::Wire(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Schema(e) => write!(f, "schema error: {}", e),
            Error::Wire(e) => write!(f, "wire error: {}", e),
            Error::Unsupported { feature, context } => {
                write!(f, "unsupported feature ({}): {}", feature, context)
            }
            Error::Config(reason) => write!(f, "config error: {}", reason),
            Error::Io { path, reason } => write!(f, "I/O error on {}: {}", path, reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Schema(e) => Some(e),
            Error::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Error::Wire(err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Result of buffer-level operations.
pub type WireResult<T> = core::result::Result<T, WireError>;
