// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Descriptor Registry.
//!
//! Thread-safe map from `(class name, version)` to [`ClassDescriptor`].
//! Readers share a `parking_lot::RwLock`; registration takes the write side
//! only for the map update, so a codec build triggered from a lookup never
//! runs under the registry lock.
//!
//! # Example
//!
//! ```
//! use rootdict::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
//! use rootdict::meta::ScalarKind;
//! use rootdict::Registry;
//!
//! let registry = Registry::with_builtins();
//! for version in 1..=3 {
//!     let desc = ClassDescriptorBuilder::new("Hit", version)
//!         .field(FieldDescriptor::scalar("e", "", ScalarKind::Float))
//!         .build()
//!         .expect("valid descriptor");
//!     registry.add(desc).expect("registration");
//! }
//! assert_eq!(registry.get("Hit", -1).map(|d| d.version()), Some(3));
//! ```

use crate::config::CodecConfig;
use crate::descriptor::{ClassDescriptor, ClassDescriptorBuilder, FieldDescriptor};
use crate::error::{Result, SchemaError};
use crate::meta::ScalarKind;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

type Key = (String, i32);

struct Inner {
    classes: RwLock<HashMap<Key, Arc<ClassDescriptor>>>,
    config: ArcSwap<CodecConfig>,
}

/// Shared handle on a set of class descriptors.
///
/// Cloning is cheap and yields a handle on the same set.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Non-owning handle held by compiled codecs.
#[derive(Clone, Default)]
pub struct WeakRegistry {
    inner: Weak<Inner>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// Empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                classes: RwLock::new(HashMap::new()),
                config: ArcSwap::from_pointee(config),
            }),
        }
    }

    /// Registry pre-loaded with `TObject` and `TNamed`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for desc in builtin_descriptors() {
            // @audit-ok: fresh registry, no duplicate can be refused
            let _ = registry.add(desc);
        }
        registry
    }

    /// Process-wide registry, created with the built-in classes on first use.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Self::with_builtins)
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---- configuration

    pub fn config(&self) -> Arc<CodecConfig> {
        self.inner.config.load_full()
    }

    /// Replace the configuration; codecs pick it up on their next call.
    pub fn set_config(&self, config: CodecConfig) {
        self.inner.config.store(Arc::new(config));
    }

    // ---- lookup

    /// Find a descriptor.
    ///
    /// A non-negative `version` is an exact lookup. A negative one returns the
    /// highest version among descriptors named `name` or whose title carries
    /// `name` as an alias.
    pub fn get(&self, name: &str, version: i32) -> Option<Arc<ClassDescriptor>> {
        let classes = self.inner.classes.read();
        if version >= 0 {
            return classes.get(&(name.to_string(), version)).cloned();
        }
        classes
            .values()
            .filter(|d| d.answers_to(name))
            .max_by_key(|d| d.version())
            .cloned()
    }

    pub fn contains(&self, name: &str, version: i32) -> bool {
        self.get(name, version).is_some()
    }

    /// Register a descriptor under `(name, version)`.
    ///
    /// Re-registering an identical descriptor keeps the stored one (and its
    /// compiled codecs). A differing descriptor replaces it; when the
    /// checksums differ too the registration is refused under
    /// [`CodecConfig::strict_checksum`], and logged otherwise.
    pub fn add(&self, desc: impl Into<Arc<ClassDescriptor>>) -> Result<Arc<ClassDescriptor>> {
        let desc = desc.into();
        let key = (desc.name().to_string(), desc.version());
        let strict = self.inner.config.load().strict_checksum;

        let mut classes = self.inner.classes.write();
        if let Some(old) = classes.get(&key) {
            if **old == *desc {
                return Ok(Arc::clone(old));
            }
            if old.checksum() != desc.checksum() {
                if strict {
                    return Err(SchemaError::ChecksumMismatch {
                        name: key.0,
                        version: key.1,
                        stored: old.checksum(),
                        incoming: desc.checksum(),
                    }
                    .into());
                }
                log::warn!(
                    "[registry] replacing {} v{}: checksum 0x{:08x} -> 0x{:08x}",
                    key.0,
                    key.1,
                    old.checksum(),
                    desc.checksum()
                );
            }
        }
        log::debug!(
            "[registry] add {} v{} ({} fields, checksum=0x{:08x})",
            key.0,
            key.1,
            desc.fields().len(),
            desc.checksum()
        );
        classes.insert(key, Arc::clone(&desc));
        Ok(desc)
    }

    /// Snapshot of every descriptor, sorted by name then version.
    pub fn values(&self) -> Vec<Arc<ClassDescriptor>> {
        let mut out: Vec<_> = self.inner.classes.read().values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()).then(a.version().cmp(&b.version())));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, name: &str, version: i32) -> Option<Arc<ClassDescriptor>> {
        self.inner.classes.write().remove(&(name.to_string(), version))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.len())
            .field("config", &self.config())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DescriptorSource
// ---------------------------------------------------------------------------

/// Schema query interface for code generators and other consumers.
pub trait DescriptorSource {
    /// Exact lookup, or latest version when `version < 0`.
    fn lookup(&self, name: &str, version: i32) -> Option<Arc<ClassDescriptor>>;

    fn all_descriptors(&self) -> Vec<Arc<ClassDescriptor>>;

    fn register(&self, desc: ClassDescriptor) -> Result<Arc<ClassDescriptor>>;
}

impl DescriptorSource for Registry {
    fn lookup(&self, name: &str, version: i32) -> Option<Arc<ClassDescriptor>> {
        self.get(name, version)
    }

    fn all_descriptors(&self) -> Vec<Arc<ClassDescriptor>> {
        self.values()
    }

    fn register(&self, desc: ClassDescriptor) -> Result<Arc<ClassDescriptor>> {
        self.add(desc)
    }
}

// ---------------------------------------------------------------------------
// Built-in classes
// ---------------------------------------------------------------------------

fn builtin_descriptors() -> Vec<ClassDescriptor> {
    let tobject = ClassDescriptorBuilder::new("TObject", 1)
        .field(FieldDescriptor::scalar("fUniqueID", "object unique identifier", ScalarKind::UInt))
        .field(FieldDescriptor::scalar("fBits", "bit field status word", ScalarKind::Bits))
        .build();
    let tnamed = ClassDescriptorBuilder::new("TNamed", 1)
        .field(FieldDescriptor::base("TObject", 1))
        .field(FieldDescriptor::tstring("fName", "object identifier"))
        .field(FieldDescriptor::tstring("fTitle", "object title"))
        .build();
    // both are static and always valid
    [tobject, tnamed].into_iter().flatten().collect()
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[cfg(feature = "persistence")]
impl Registry {
    /// Write every descriptor as a pretty-printed JSON array.
    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        use crate::error::Error;

        let path = path.as_ref();
        let values = self.values();
        let list: Vec<&ClassDescriptor> = values.iter().map(|d| d.as_ref()).collect();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| Error::Config(format!("serialization error: {}", e)))?;
        std::fs::write(path, json).map_err(|e| Error::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Register every descriptor of a file written by [`save_json`](Self::save_json).
    ///
    /// Returns the number of descriptors read.
    pub fn load_json(&self, path: impl AsRef<std::path::Path>) -> Result<usize> {
        use crate::error::Error;

        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let list: Vec<ClassDescriptor> = serde_json::from_str(&json).map_err(|e| {
            Error::Config(format!("failed to deserialize {}: {}", path.display(), e))
        })?;
        let n = list.len();
        for desc in list {
            self.add(desc)?;
        }
        Ok(n)
    }
}
