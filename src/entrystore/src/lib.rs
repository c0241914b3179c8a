// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The key/value cache collaborator: timestamped byte blobs keyed by opaque
//! strings, behind a backend trait whose implementations own their
//! reader/writer locking. The wire form for any network-backed store is an
//! 8-byte little-endian unix timestamp followed by the raw data bytes.

use bytes::Bytes;
use config::CacheConfig;
use parking_lot::RwLock;

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// One cached value: an absolute timestamp and the data blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    timestamp: u64,
    data: Bytes,
}

impl CacheEntry {
    pub fn new(timestamp: u64, data: Bytes) -> Self {
        Self { timestamp, data }
    }

    /// An entry stamped with the current time.
    pub fn now(data: Bytes) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { timestamp, data }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes to the binary wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(8 + self.data.len());
        raw.extend_from_slice(&self.timestamp.to_le_bytes());
        raw.extend_from_slice(&self.data);
        raw
    }

    /// Deserializes the binary wire form.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 8 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "cache entry shorter than its timestamp",
            ));
        }
        let timestamp = u64::from_le_bytes(raw[..8].try_into().unwrap());
        Ok(Self {
            timestamp,
            data: Bytes::copy_from_slice(&raw[8..]),
        })
    }
}

/// The cache backend contract. Implementations guard their storage with a
/// reader/writer lock they own.
pub trait CacheBackend: Send + Sync {
    fn value(&self, key: &str) -> Option<CacheEntry>;
    fn set_value(&self, key: &str, entry: CacheEntry);
    fn remove(&self, key: &str);
}

/// Process-local cache backend. Keys are namespaced with the cache name so
/// unrelated caches sharing a backend do not collide.
pub struct MemoryCache {
    key_prefix: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(cache_name: &str) -> Self {
        Self {
            key_prefix: format!("{}::", cache_name),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn raw_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

impl CacheBackend for MemoryCache {
    fn value(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(&self.raw_key(key)).cloned()
    }

    fn set_value(&self, key: &str, entry: CacheEntry) {
        self.entries.write().insert(self.raw_key(key), entry);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(&self.raw_key(key));
    }
}

/// Resolves the configured cache backend identifier to an implementation.
/// Invalid selection is a startup failure.
pub fn cache<T: CacheConfig>(config: &T) -> Result<Box<dyn CacheBackend>> {
    match config.cache().backend() {
        "memory" => Ok(Box::new(MemoryCache::new(config.cache().name()))),
        other => Err(Error::new(
            ErrorKind::InvalidInput,
            format!("unknown cache backend: {:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_le_timestamp_then_data() {
        let entry = CacheEntry::new(0x0102_0304_0506_0708, Bytes::from_static(b"blob"));
        let raw = entry.to_bytes();
        assert_eq!(&raw[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&raw[8..], b"blob");

        assert_eq!(CacheEntry::from_bytes(&raw).unwrap(), entry);
        assert!(CacheEntry::from_bytes(&raw[..7]).is_err());
    }

    #[test]
    fn set_get_remove() {
        let cache = MemoryCache::new("test");
        assert_eq!(cache.value("k"), None);

        let entry = CacheEntry::now(Bytes::from_static(b"v"));
        cache.set_value("k", entry.clone());
        assert_eq!(cache.value("k"), Some(entry));

        // remove is a real deletion
        cache.remove("k");
        assert_eq!(cache.value("k"), None);
    }
}
