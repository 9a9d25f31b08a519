//! Deterministic shard routing with metadata pinning.
//!
//! Resolution runs as two pure stages: a metadata lookup that pins known
//! paths to the shard that first stored them, and a side-effect-free hash of
//! (path, current shard list) that places everything else. Growing,
//! shrinking or reordering the shard list therefore only ever affects paths
//! that have no record yet.

use sha2::{Digest, Sha256};

use crate::config::{RuntimeConfig, ShardDescriptor};
use crate::error::AppResult;
use crate::meta::MetadataIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
    Delete,
}

/// Hash-based placement over the current ordered shard list.
///
/// SHA-256 of the path bytes, first eight digest bytes as a big-endian u64,
/// reduced modulo the shard count. None iff the list is empty.
pub fn hash_shard<'a>(path: &str, shards: &'a [ShardDescriptor]) -> Option<&'a ShardDescriptor> {
    if shards.is_empty() {
        return None;
    }
    let digest = Sha256::digest(path.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(word);
    shards.get((n % shards.len() as u64) as usize)
}

/// Resolve a path to its owning shard.
///
/// Read/delete intent consults the metadata index first: a recorded shard id
/// that is still present in the configuration wins over hashing, always.
/// Write intent always hashes; so do unknown paths.
pub fn resolve<'a>(
    meta: &MetadataIndex,
    cfg: &'a RuntimeConfig,
    path: &str,
    intent: Intent,
) -> AppResult<Option<&'a ShardDescriptor>> {
    if matches!(intent, Intent::Read | Intent::Delete) {
        if let Some(rec) = meta.lookup(path)? {
            if let Some(shard) = cfg.shard_by_id(&rec.bucket_id) {
                return Ok(Some(shard));
            }
        }
    }
    Ok(hash_shard(path, &cfg.shards))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardKind;
    use std::collections::HashMap;

    fn shard(id: &str) -> ShardDescriptor {
        ShardDescriptor {
            id: id.to_string(),
            kind: ShardKind::Local,
            bucket: format!("bucket-{}", id),
            endpoint: None,
        }
    }

    fn cfg(ids: &[&str]) -> RuntimeConfig {
        RuntimeConfig {
            shards: ids.iter().map(|id| shard(id)).collect(),
            dav_password: "password".into(),
            admin_secret: None,
            credentials: HashMap::new(),
        }
    }

    #[test]
    fn hash_is_deterministic_under_one_configuration() {
        let shards: Vec<ShardDescriptor> = ["a", "b", "c"].iter().map(|id| shard(id)).collect();
        let first = hash_shard("/some/path.txt", &shards).unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(hash_shard("/some/path.txt", &shards).unwrap().id, first);
        }
    }

    #[test]
    fn hash_spreads_across_shards() {
        let shards: Vec<ShardDescriptor> = ["a", "b", "c", "d"].iter().map(|id| shard(id)).collect();
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            let p = format!("/files/doc-{}.txt", i);
            seen.insert(hash_shard(&p, &shards).unwrap().id.clone());
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn empty_shard_list_resolves_to_none() {
        let shards: Vec<ShardDescriptor> = Vec::new();
        assert!(hash_shard("/x", &shards).is_none());
        let meta = MetadataIndex::in_memory().unwrap();
        let c = cfg(&[]);
        assert!(resolve(&meta, &c, "/x", Intent::Read).unwrap().is_none());
    }

    #[test]
    fn recorded_shard_wins_over_hash_for_reads() {
        let c = cfg(&["a", "b", "c"]);
        let meta = MetadataIndex::in_memory().unwrap();
        let path = "/pinned/file.bin";
        let hashed = hash_shard(path, &c.shards).unwrap().id.clone();
        // Pin the path to a shard the hash would not pick.
        let pinned = c.shards.iter().find(|s| s.id != hashed).unwrap().id.clone();
        meta.upsert(path, &pinned, false, 1, 1).unwrap();

        let got = resolve(&meta, &c, path, Intent::Read).unwrap().unwrap();
        assert_eq!(got.id, pinned);
        let got = resolve(&meta, &c, path, Intent::Delete).unwrap().unwrap();
        assert_eq!(got.id, pinned);
    }

    #[test]
    fn write_intent_ignores_the_record() {
        let c = cfg(&["a", "b", "c"]);
        let meta = MetadataIndex::in_memory().unwrap();
        let path = "/pinned/file.bin";
        let hashed = hash_shard(path, &c.shards).unwrap().id.clone();
        let pinned = c.shards.iter().find(|s| s.id != hashed).unwrap().id.clone();
        meta.upsert(path, &pinned, false, 1, 1).unwrap();

        let got = resolve(&meta, &c, path, Intent::Write).unwrap().unwrap();
        assert_eq!(got.id, hashed);
    }

    #[test]
    fn record_pointing_at_removed_shard_falls_back_to_hash() {
        let c = cfg(&["a", "b"]);
        let meta = MetadataIndex::in_memory().unwrap();
        meta.upsert("/ghost", "gone-shard", false, 1, 1).unwrap();
        let got = resolve(&meta, &c, "/ghost", Intent::Read).unwrap().unwrap();
        let hashed = hash_shard("/ghost", &c.shards).unwrap();
        assert_eq!(got.id, hashed.id);
    }

    #[test]
    fn resize_relocates_only_unrecorded_paths() {
        let small = cfg(&["a", "b"]);
        let large = cfg(&["a", "b", "c", "d", "e"]);
        let meta = MetadataIndex::in_memory().unwrap();
        let path = "/stable/file.txt";

        let original = resolve(&meta, &small, path, Intent::Read).unwrap().unwrap().id.clone();
        meta.upsert(path, &original, false, 1, 1).unwrap();

        // The pinned path keeps resolving to its original shard.
        let after = resolve(&meta, &large, path, Intent::Read).unwrap().unwrap();
        assert_eq!(after.id, original);
    }
}
