// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structural checksum of a class descriptor.

use super::FieldDescriptor;

#[inline]
fn mix(id: u32, bytes: &[u8]) -> u32 {
    // bytes are hashed as signed chars
    bytes
        .iter()
        .fold(id, |id, &b| id.wrapping_mul(3).wrapping_add(b as i8 as u32))
}

/// Rolling `id = id * 3 + byte` hash over a class layout.
///
/// Hashes the class name, then for each field its name and, unless the field
/// is a base class, its type name, array dimensions and the first bracketed
/// token of its title. Two descriptors with the same checksum are treated as
/// interchangeable.
pub fn checksum(name: &str, fields: &[FieldDescriptor]) -> u32 {
    let mut id = mix(0, name.as_bytes());
    for field in fields {
        id = mix(id, field.name.as_bytes());
        if field.is_base() {
            continue;
        }
        id = mix(id, field.type_name.as_bytes());
        for &dim in &field.dims {
            id = id.wrapping_mul(3).wrapping_add(dim as u32);
        }
        if let Some(token) = bracket_token(&field.title) {
            id = mix(id, token.as_bytes());
        }
    }
    id
}

fn bracket_token(title: &str) -> Option<&str> {
    let left = title.find('[')?;
    let right = left + title[left..].find(']')?;
    Some(&title[left + 1..right])
}
