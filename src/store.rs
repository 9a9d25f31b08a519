//! Local object store: flat keyed byte objects, one directory per bucket.
//!
//! Keys are opaque strings (the normalized DAV paths). Each key is
//! percent-encoded into a single flat filename so the store stays flat like
//! a real object store; a JSON sidecar per object carries the content type,
//! the xxh3 content fingerprint and the byte length.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Content metadata persisted alongside each object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub content_type: Option<String>,
    pub etag: String,
    pub size: u64,
}

/// Stable content fingerprint for a byte slice; fixed-width lowercase hex.
pub fn etag_for_bytes(bytes: &[u8]) -> String {
    let h = xxh3_64(bytes);
    format!("{h:016x}")
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join("objects").join(urlencoding::encode(key).into_owned())
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join("meta").join(urlencoding::encode(key).into_owned())
    }

    /// Store bytes and content metadata under a key, replacing any previous
    /// object. Returns the written metadata.
    pub fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: Option<&str>) -> Result<ObjectMeta> {
        let obj = self.object_path(bucket, key);
        let meta_p = self.meta_path(bucket, key);
        if let Some(dir) = obj.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create bucket dir: {}", dir.display()))?;
        }
        if let Some(dir) = meta_p.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create bucket meta dir: {}", dir.display()))?;
        }
        std::fs::write(&obj, bytes)
            .with_context(|| format!("Failed to write object for key '{}'", key))?;
        let meta = ObjectMeta {
            content_type: content_type.map(|s| s.to_string()),
            etag: etag_for_bytes(bytes),
            size: bytes.len() as u64,
        };
        std::fs::write(&meta_p, serde_json::to_string(&meta)?)
            .with_context(|| format!("Failed to write object metadata for key '{}'", key))?;
        Ok(meta)
    }

    /// Fetch bytes and content metadata for a key, if present.
    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>> {
        let obj = self.object_path(bucket, key);
        if !obj.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&obj)
            .with_context(|| format!("Failed to read object for key '{}'", key))?;
        let meta_p = self.meta_path(bucket, key);
        let meta = if meta_p.exists() {
            serde_json::from_str(&std::fs::read_to_string(&meta_p)?)
                .unwrap_or_else(|_| ObjectMeta {
                    content_type: None,
                    etag: etag_for_bytes(&bytes),
                    size: bytes.len() as u64,
                })
        } else {
            ObjectMeta { content_type: None, etag: etag_for_bytes(&bytes), size: bytes.len() as u64 }
        };
        Ok(Some((bytes, meta)))
    }

    /// Re-key an object in place. The bytes are never copied; both the
    /// object and its sidecar are renamed on the filesystem. Returns whether
    /// an object existed at the old key.
    pub fn rename(&self, bucket: &str, old: &str, new: &str) -> Result<bool> {
        let from = self.object_path(bucket, old);
        if !from.exists() {
            return Ok(false);
        }
        let to = self.object_path(bucket, new);
        std::fs::rename(&from, &to)
            .with_context(|| format!("Failed to re-key object '{}' -> '{}'", old, new))?;
        let meta_from = self.meta_path(bucket, old);
        if meta_from.exists() {
            std::fs::rename(&meta_from, self.meta_path(bucket, new)).ok();
        }
        Ok(true)
    }

    /// Delete the object for a key. Returns whether anything existed.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        let obj = self.object_path(bucket, key);
        let existed = obj.exists();
        if existed {
            std::fs::remove_file(&obj)
                .with_context(|| format!("Failed to delete object for key '{}'", key))?;
        }
        let meta_p = self.meta_path(bucket, key);
        if meta_p.exists() {
            std::fs::remove_file(&meta_p).ok();
        }
        Ok(existed)
    }
}
