// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fluent builder for class descriptors.

use super::checksum::checksum;
use super::class::{ClassDescriptor, CodecCache};
use super::field::{dims_len, FieldDescriptor, FieldKind, MAX_DIMS};
use super::range::parse_range;
use crate::error::SchemaError;
use crate::meta::ScalarKind;

/// Builder for [`ClassDescriptor`].
///
/// ```
/// use rootdict::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
/// use rootdict::meta::ScalarKind;
///
/// let desc = ClassDescriptorBuilder::new("Event", 2)
///     .field(FieldDescriptor::scalar("N", "", ScalarKind::Int))
///     .field(FieldDescriptor::counted_array("E", "[N]", ScalarKind::Float, "N"))
///     .build()
///     .expect("valid descriptor");
/// assert_eq!(desc.fields().len(), 2);
/// ```
pub struct ClassDescriptorBuilder {
    name: String,
    version: i32,
    title: String,
    checksum: Option<u32>,
    fields: Vec<FieldDescriptor>,
}

impl ClassDescriptorBuilder {
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            version,
            title: String::new(),
            checksum: None,
            fields: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Use a recorded checksum instead of computing one.
    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Validate the fields and assemble the descriptor.
    ///
    /// Assigns logical offsets, parses compressed float ranges from titles,
    /// binds counters to this class and computes the checksum.
    pub fn build(self) -> Result<ClassDescriptor, SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidDescriptor {
            class: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("empty class name".into()));
        }

        let mut fields = self.fields.clone();
        for (i, field) in fields.iter_mut().enumerate() {
            field.offset = i;
            if field.name.is_empty() {
                return Err(invalid(format!("field #{} has no name", i)));
            }
            if field.dims.len() > MAX_DIMS {
                return Err(invalid(format!(
                    "field {:?} has {} array dimensions (max {})",
                    field.name,
                    field.dims.len(),
                    MAX_DIMS
                )));
            }
            if let FieldKind::FixedArray(_) = field.kind {
                match dims_len(&field.dims) {
                    _ if field.dims.is_empty() => {
                        return Err(invalid(format!(
                            "field {:?}: array without dimensions",
                            field.name
                        )));
                    }
                    None => {
                        return Err(invalid(format!(
                            "field {:?}: array dimensions {:?} are not positive or overflow",
                            field.name, field.dims
                        )));
                    }
                    Some(len) if len != field.array_len => {
                        return Err(invalid(format!(
                            "field {:?}: array length {} does not match dimensions {:?}",
                            field.name, field.array_len, field.dims
                        )));
                    }
                    Some(_) => {}
                }
            }
            if field.scalar_kind() == Some(ScalarKind::Counter)
                && field.size != 4
                && field.size != 8
            {
                return Err(invalid(format!(
                    "counter {:?} has invalid size {}",
                    field.name, field.size
                )));
            }
            if field.wants_range() {
                field.range = parse_range(&field.title)?;
            }
            let (name, version) = (&self.name, self.version);
            if let Some(counter) = field.counter_mut() {
                if counter.class.is_empty() {
                    counter.class = name.clone();
                    counter.class_version = version;
                }
            }
        }

        let checksum = self.checksum.unwrap_or_else(|| checksum(&self.name, &fields));
        Ok(ClassDescriptor {
            name: self.name,
            version: self.version,
            title: self.title,
            checksum,
            fields,
            cache: CodecCache::default(),
        })
    }
}
