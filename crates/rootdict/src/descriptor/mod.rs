// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class Descriptor Model.
//!
//! A [`ClassDescriptor`] describes the on-disk shape of one versioned class
//! as an ordered list of [`FieldDescriptor`]s. Nothing here touches a
//! buffer except the descriptor's own record ([`ClassDescriptor::marshal`]).

mod builder;
mod checksum;
mod class;
mod field;
mod range;
mod template;
mod wire;

pub use builder::ClassDescriptorBuilder;
pub use checksum::checksum;
pub use class::ClassDescriptor;
pub use field::{CounterRef, Element, FieldDescriptor, FieldKind, MAX_DIMS};
pub use range::{parse_range, FloatRange};
pub use template::{map_type_name, parse_template, sequence_type_name, Template};

pub(crate) use class::CodecCache;
pub(crate) use wire::{read_tobject, write_tobject};
