// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec configuration.
//!
//! - **Static**: wire constants live in [`crate::rbytes`] and [`crate::meta`].
//! - **Dynamic**: [`CodecConfig`] is held by each [`crate::Registry`] behind an
//!   `ArcSwap`, so it can be replaced while codecs are running.
//!
//! # Example YAML
//!
//! ```yaml
//! # rootdict.yaml
//! strict_checksum: true
//! max_collection_len: 1000000
//! max_nesting_depth: 32
//! ```

#[cfg(feature = "config-loaders")]
use crate::error::{Error, Result};

/// Default upper bound on decoded collection lengths (64 Mi elements).
pub const DEFAULT_MAX_COLLECTION_LEN: usize = 64 << 20;

/// Maximum length of a class name carried in an object tag.
pub const DEFAULT_MAX_CLASS_NAME_LEN: usize = 80;

/// Default limit on nested class records within one decode or encode call.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Runtime knobs shared by a registry and every codec compiled through it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CodecConfig {
    /// Refuse duplicate registrations whose checksum differs from the stored one.
    pub strict_checksum: bool,

    /// Largest element count accepted for a decoded collection.
    pub max_collection_len: usize,

    /// Largest class name accepted in an object tag.
    pub max_class_name_len: usize,

    /// Deepest chain of nested objects (bases, members, pointers, elements).
    pub max_nesting_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            strict_checksum: false,
            max_collection_len: DEFAULT_MAX_COLLECTION_LEN,
            max_class_name_len: DEFAULT_MAX_CLASS_NAME_LEN,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl CodecConfig {
    pub fn strict() -> Self {
        Self {
            strict_checksum: true,
            ..Self::default()
        }
    }
}

#[cfg(feature = "config-loaders")]
impl CodecConfig {
    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        serde_yaml::from_str(src).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(src: &str) -> Result<Self> {
        serde_json::from_str(src).map_err(|e| Error::Config(format!("JSON parse error: {}", e)))
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&src),
            Some("json") => Self::from_json_str(&src),
            other => Err(Error::Config(format!(
                "unsupported config extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = CodecConfig::default();
        assert!(!cfg.strict_checksum);
        assert_eq!(cfg.max_collection_len, DEFAULT_MAX_COLLECTION_LEN);
        assert_eq!(cfg.max_nesting_depth, DEFAULT_MAX_NESTING_DEPTH);
        assert!(CodecConfig::strict().strict_checksum);
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn test_yaml_partial_document() {
        let cfg = CodecConfig::from_yaml_str("strict_checksum: true\n")
            .expect("YAML config should parse");
        assert!(cfg.strict_checksum);
        assert_eq!(cfg.max_class_name_len, DEFAULT_MAX_CLASS_NAME_LEN);
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn test_json_and_path_loading() {
        let cfg = CodecConfig::from_json_str(r#"{"max_collection_len": 16}"#)
            .expect("JSON config should parse");
        assert_eq!(cfg.max_collection_len, 16);

        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("codec.yml");
        std::fs::write(&path, "max_collection_len: 32\n").expect("config file should be written");
        let cfg = CodecConfig::from_path(&path).expect("config file should load");
        assert_eq!(cfg.max_collection_len, 32);

        let bad = dir.path().join("codec.toml");
        std::fs::write(&bad, "").expect("config file should be written");
        match CodecConfig::from_path(&bad) {
            Err(Error::Config(msg)) => assert!(msg.contains("toml")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }
}
