// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streamer compilation and execution.
//!
//! [`compile`] turns a [`ClassDescriptor`](crate::descriptor::ClassDescriptor)
//! into a [`Codec`]: one decode/encode procedure per field, resolved once and
//! cached on the descriptor per [`StreamMode`]. A `Codec` then transcodes
//! [`Record`](crate::value::Record)s against [`RBuffer`](crate::rbytes::RBuffer)
//! and [`WBuffer`](crate::rbytes::WBuffer) cursors.
//!
//! ```
//! use rootdict::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
//! use rootdict::meta::ScalarKind;
//! use rootdict::{compile, RBuffer, Record, Registry, StreamMode, WBuffer};
//!
//! let registry = Registry::new();
//! let desc = registry
//!     .add(
//!         ClassDescriptorBuilder::new("Point", 1)
//!             .field(FieldDescriptor::scalar("x", "", ScalarKind::Double))
//!             .field(FieldDescriptor::scalar("y", "", ScalarKind::Double))
//!             .build()
//!             .expect("descriptor"),
//!     )
//!     .expect("register");
//! let codec = compile(&registry, &desc, StreamMode::ObjectWise).expect("codec");
//!
//! let mut w = WBuffer::new();
//! codec
//!     .encode(&mut w, &Record::new("Point").with("x", 1.0).with("y", -2.0))
//!     .expect("encode");
//! let bytes = w.into_bytes();
//! let point = codec.read(&mut RBuffer::new(&bytes)).expect("decode");
//! assert_eq!(point.get_as::<f64>("y").expect("y"), -2.0);
//! ```

mod compiler;
mod runtime;

pub use compiler::{compile, StreamMode};
pub use runtime::Codec;
