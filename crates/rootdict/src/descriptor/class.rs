// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class descriptors.

use super::FieldDescriptor;
use crate::codec::{Codec, StreamMode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Per-descriptor compiled codecs, one slot per [`StreamMode`].
///
/// The slots are filled at most once; `build` serializes the first build so
/// concurrent callers never compile twice.
#[derive(Default)]
pub(crate) struct CodecCache {
    slots: [OnceLock<Arc<Codec>>; 2],
    build: Mutex<()>,
}

impl CodecCache {
    pub(crate) fn get(&self, mode: StreamMode) -> Option<&Arc<Codec>> {
        self.slots[mode.index()].get()
    }

    /// Return the cached codec, building it under the build lock if absent.
    ///
    /// A failed build leaves the slot empty.
    pub(crate) fn get_or_build<E>(
        &self,
        mode: StreamMode,
        build: impl FnOnce() -> Result<Codec, E>,
    ) -> Result<Arc<Codec>, E> {
        if let Some(codec) = self.get(mode) {
            return Ok(Arc::clone(codec));
        }
        let _guard = self.build.lock();
        if let Some(codec) = self.get(mode) {
            return Ok(Arc::clone(codec));
        }
        let codec = Arc::new(build()?);
        // @audit-ok: slot is empty while the build lock is held
        let _ = self.slots[mode.index()].set(Arc::clone(&codec));
        Ok(codec)
    }
}

impl fmt::Debug for CodecCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecCache")
            .field("object_wise", &self.slots[0].get().is_some())
            .field("member_wise", &self.slots[1].get().is_some())
            .finish()
    }
}

/// Runtime schema of one versioned class (a "streamer info").
///
/// Field order is the wire order. Built with
/// [`ClassDescriptorBuilder`](super::ClassDescriptorBuilder) or read from
/// its on-disk record with [`ClassDescriptor::unmarshal`].
pub struct ClassDescriptor {
    pub(crate) name: String,
    pub(crate) version: i32,
    pub(crate) title: String,
    pub(crate) checksum: u32,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) cache: CodecCache,
}

impl ClassDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class version.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Fields in wire order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Get field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get field index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Base class entries, in declaration order.
    pub fn bases(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_base())
    }

    /// True when `name` designates this class, directly or through the
    /// alias carried in the title.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || (!self.title.is_empty() && self.title == name)
    }

    /// Codec already compiled for `mode`, if any.
    pub fn compiled(&self, mode: StreamMode) -> Option<Arc<Codec>> {
        self.cache.get(mode).cloned()
    }
}

impl Clone for ClassDescriptor {
    /// Clones the schema; compiled codecs are not shared with the copy.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version,
            title: self.title.clone(),
            checksum: self.checksum,
            fields: self.fields.clone(),
            cache: CodecCache::default(),
        }
    }
}

impl PartialEq for ClassDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.title == other.title
            && self.checksum == other.checksum
            && self.fields == other.fields
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("title", &self.title)
            .field("checksum", &self.checksum)
            .field("fields", &self.fields)
            .finish()
    }
}

impl fmt::Display for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            " StreamerInfo for {:?} version={} title={:?}",
            self.name, self.version, self.title
        )?;
        let type_w = self.fields.iter().map(|e| e.type_name.len()).max().unwrap_or(0);
        let name_w = self.fields.iter().map(|e| e.name.len()).max().unwrap_or(0);
        for e in &self.fields {
            writeln!(
                f,
                "  {:<tw$} {:<nw$} offset={:>3} type={:>3} size={:>3}  {}",
                e.type_name,
                e.name,
                e.offset,
                e.type_code,
                e.size,
                e.title,
                tw = type_w,
                nw = name_w,
            )?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Repr {
        name: String,
        version: i32,
        #[serde(default)]
        title: String,
        checksum: u32,
        fields: Vec<FieldDescriptor>,
    }

    impl Serialize for ClassDescriptor {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            Repr {
                name: self.name.clone(),
                version: self.version,
                title: self.title.clone(),
                checksum: self.checksum,
                fields: self.fields.clone(),
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for ClassDescriptor {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let repr = Repr::deserialize(deserializer)?;
            Ok(ClassDescriptor {
                name: repr.name,
                version: repr.version,
                title: repr.title,
                checksum: repr.checksum,
                fields: repr.fields,
                cache: CodecCache::default(),
            })
        }
    }
}
