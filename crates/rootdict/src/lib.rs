// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rootdict - self-describing ROOT object codec
//!
//! Reads and writes objects in the CERN ROOT binary format from a runtime
//! schema (a *class descriptor*, ROOT's `TStreamerInfo`), without a compiled
//! definition of every class encountered.
//!
//! ## Quick Start
//!
//! ```rust
//! use rootdict::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
//! use rootdict::meta::ScalarKind;
//! use rootdict::{RBuffer, Record, Registry, Result, StreamMode, WBuffer};
//!
//! fn main() -> Result<()> {
//!     let registry = Registry::with_builtins();
//!     registry.add(
//!         ClassDescriptorBuilder::new("Event", 1)
//!             .field(FieldDescriptor::scalar("fN", "", ScalarKind::Int))
//!             .field(FieldDescriptor::counted_array("fE", "[fN]", ScalarKind::Float, "fN"))
//!             .build()?,
//!     )?;
//!
//!     let codec = registry.codec("Event", -1, StreamMode::ObjectWise)?;
//!     let event = Record::new("Event").with("fN", 2).with("fE", vec![1.5f32, 2.5]);
//!
//!     let mut w = WBuffer::new();
//!     codec.encode(&mut w, &event)?;
//!     let bytes = w.into_bytes();
//!
//!     let back = codec.read(&mut RBuffer::new(&bytes))?;
//!     assert_eq!(back, event);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  bridge      native layouts <-> descriptors (Shape, NativeType)     |
//! +---------------------------------------------------------------------+
//! |  codec       compile: descriptor -> per-field procedures (cached)   |
//! |              runtime: procedures x cursor x Record                  |
//! +---------------------------------------------------------------------+
//! |  registry    (name, version) -> ClassDescriptor, CodecConfig        |
//! |  descriptor  ClassDescriptor / FieldDescriptor, ranges, checksums   |
//! +---------------------------------------------------------------------+
//! |  rbytes      RBuffer / WBuffer big-endian cursors, object tags      |
//! |  meta        type codes, scalar and container kinds                 |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ClassDescriptor`] | On-disk shape of one class version |
//! | [`Registry`] | Thread-safe descriptor store, entry point for codecs |
//! | [`Codec`] | Compiled decode/encode procedures of one class |
//! | [`Record`] / [`Value`] | Dynamic decode targets and encode sources |
//! | [`RBuffer`] / [`WBuffer`] | Binary read / write cursors |
//!
//! ## Features
//!
//! - `config-loaders` (default): [`CodecConfig`] from YAML or JSON
//! - `persistence` (default): registry snapshots as JSON
//! - `serde`: `Serialize`/`Deserialize` on descriptors and values

/// Bridge between native Rust layouts and class descriptors.
pub mod bridge;
/// Codec compilation and execution.
pub mod codec;
/// Runtime codec configuration.
pub mod config;
/// Class descriptor model.
pub mod descriptor;
/// Error taxonomy.
pub mod error;
/// On-disk type codes and builtin type names.
pub mod meta;
/// Binary read/write cursors.
pub mod rbytes;
/// Descriptor registry.
pub mod registry;
/// Dynamic values.
pub mod value;

pub use bridge::{
    descriptor_of, layout_of, register_native, NativeType, NativeTypes, Shape, ShapeField,
    StructShape,
};
pub use codec::{compile, Codec, StreamMode};
pub use config::CodecConfig;
pub use descriptor::{ClassDescriptor, ClassDescriptorBuilder, FieldDescriptor, FieldKind};
pub use error::{Error, Result, SchemaError, WireError};
pub use rbytes::{RBuffer, WBuffer};
pub use registry::{DescriptorSource, Registry, WeakRegistry};
pub use value::{FromValue, IntoValue, Record, Value};

/// rootdict version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests;
