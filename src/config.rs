//! Shard-list configuration and the external config store.
//!
//! The shard list, the shared DAV credential and remote-shard signing keys
//! live in a key-value blob store. The whole configuration is re-read at the
//! start of every request and threaded through calls as a value; no
//! process-wide mutable shard state exists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Config store key holding the raw shard-list JSON document.
pub const SHARDS_KEY: &str = "shards";
/// Config store key holding the shared WebDAV password.
pub const DAV_PASSWORD_KEY: &str = "dav_password";
/// Config store key holding the admin shared secret.
pub const ADMIN_SECRET_KEY: &str = "admin_secret";
/// Fallback WebDAV password when the config store has none.
pub const DEFAULT_DAV_PASSWORD: &str = "password";

fn cred_key(shard_id: &str) -> String {
    format!("cred:{}", shard_id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShardKind {
    Local,
    Remote,
}

/// One configured object-storage backend. Immutable within one loaded
/// configuration; the ordered list of descriptors is the hashing domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ShardKind,
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Signing material for one remote shard, stored under `cred:<shard_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// String-blob get/put contract of the external config store.
pub trait ConfigStore: Send + Sync {
    fn get_blob(&self, key: &str) -> Result<Option<String>>;
    fn put_blob(&self, key: &str, value: &str) -> Result<()>;
}

/// File-per-key config store rooted at a directory.
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create config root: {}", root.display()))?;
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are flat identifiers; encode to keep them single filenames.
        self.root.join(urlencoding::encode(key).into_owned())
    }
}

impl ConfigStore for FileConfigStore {
    fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let p = self.key_path(key);
        if !p.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(&p)
            .with_context(|| format!("Failed to read config key '{}'", key))?;
        Ok(Some(s))
    }

    fn put_blob(&self, key: &str, value: &str) -> Result<()> {
        let p = self.key_path(key);
        std::fs::write(&p, value)
            .with_context(|| format!("Failed to write config key '{}'", key))?;
        Ok(())
    }
}

/// The per-request configuration value: parsed shard list, DAV credential,
/// admin secret and whatever remote signing material is present.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub shards: Vec<ShardDescriptor>,
    pub dav_password: String,
    pub admin_secret: Option<String>,
    pub credentials: HashMap<String, RemoteCredentials>,
}

impl RuntimeConfig {
    /// Load the full configuration from the store. A missing or malformed
    /// shard document loads as an empty list; routing then answers 503.
    pub fn load(store: &dyn ConfigStore) -> RuntimeConfig {
        let shards = match store.get_blob(SHARDS_KEY) {
            Ok(Some(doc)) => match serde_json::from_str::<Vec<ShardDescriptor>>(&doc) {
                Ok(list) => list,
                Err(e) => {
                    warn!("malformed shard list document, treating as empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to read shard list from config store: {}", e);
                Vec::new()
            }
        };

        let dav_password = match store.get_blob(DAV_PASSWORD_KEY) {
            Ok(Some(p)) if !p.trim().is_empty() => p.trim().to_string(),
            _ => DEFAULT_DAV_PASSWORD.to_string(),
        };

        let admin_secret = match store.get_blob(ADMIN_SECRET_KEY) {
            Ok(Some(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };

        let mut credentials = HashMap::new();
        for shard in shards.iter().filter(|s| s.kind == ShardKind::Remote) {
            match store.get_blob(&cred_key(&shard.id)) {
                Ok(Some(doc)) => match serde_json::from_str::<RemoteCredentials>(&doc) {
                    Ok(c) => {
                        credentials.insert(shard.id.clone(), c);
                    }
                    Err(e) => warn!("malformed credentials for shard '{}': {}", shard.id, e),
                },
                Ok(None) => {}
                Err(e) => warn!("failed to read credentials for shard '{}': {}", shard.id, e),
            }
        }

        RuntimeConfig { shards, dav_password, admin_secret, credentials }
    }

    pub fn shard_by_id(&self, id: &str) -> Option<&ShardDescriptor> {
        self.shards.iter().find(|s| s.id == id)
    }

    pub fn credentials_for(&self, shard_id: &str) -> Option<&RemoteCredentials> {
        self.credentials.get(shard_id)
    }
}

/// Store per-shard credentials under their well-known key.
pub fn put_credentials(store: &dyn ConfigStore, shard_id: &str, creds: &RemoteCredentials) -> Result<()> {
    let doc = serde_json::to_string(creds)?;
    store.put_blob(&cred_key(shard_id), &doc)
}
