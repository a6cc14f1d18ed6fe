//! Address resolution cache
//!
//! Maps ciphertext tokens to decrypted backend addresses. The workload is
//! overwhelmingly read-dominated (a small set of tokens repeated across many
//! connections), so reads are lock-free: the whole map sits behind an
//! atomically swappable handle and lookups never take a lock. Writes
//! serialize on a single mutex, copy the current map, insert, and swap in
//! the new map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::crypto::CryptoError;

/// Hard upper bound on cache entries; reaching it triggers a coarse flush
pub const MAX_ENTRIES: usize = 1024 * 1024;

/// Copy-on-write token → backend address cache
///
/// Entries are immutable once inserted: a token that maps to an address
/// keeps mapping to that address for the process lifetime. There is no
/// invalidation; at the size bound the next write starts over from an empty
/// map, because entries are cheap to recompute on demand.
pub struct AddrCache {
    map: ArcSwap<HashMap<Bytes, Arc<str>>>,
    write_lock: Mutex<()>,
    max_entries: usize,
}

impl AddrCache {
    /// Create an empty cache with the production size bound
    pub fn new() -> Self {
        Self::with_max_entries(MAX_ENTRIES)
    }

    /// Create an empty cache with a custom size bound
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            max_entries,
        }
    }

    /// Look up a token without taking any lock
    pub fn get(&self, token: &[u8]) -> Option<Arc<str>> {
        self.map.load().get(token).cloned()
    }

    /// Insert a token → address pair, returning the stored address
    ///
    /// If another writer got there first the duplicate write is dropped and
    /// the existing entry returned. At the size bound the new map starts
    /// empty with only this entry.
    pub fn insert(&self, token: &[u8], addr: Arc<str>) -> Arc<str> {
        let _guard = self.write_lock.lock().unwrap();

        let current = self.map.load();
        if let Some(existing) = current.get(token) {
            return existing.clone();
        }

        let mut next = if current.len() >= self.max_entries {
            HashMap::new()
        } else {
            HashMap::clone(&current)
        };
        next.insert(Bytes::copy_from_slice(token), addr.clone());
        self.map.store(Arc::new(next));

        addr
    }

    /// Resolve a token, decrypting on a miss
    ///
    /// The decrypt closure runs without any cache lock held, so concurrent
    /// callers racing on the same token may each decrypt; decryption is
    /// deterministic, and the first insert wins.
    pub fn resolve_with<F>(&self, token: &[u8], decrypt: F) -> Result<Arc<str>, CryptoError>
    where
        F: FnOnce() -> Result<String, CryptoError>,
    {
        if let Some(addr) = self.get(token) {
            return Ok(addr);
        }
        let addr = decrypt()?;
        Ok(self.insert(token, Arc::from(addr)))
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.map.load().is_empty()
    }
}

impl Default for AddrCache {
    fn default() -> Self {
        Self::new()
    }
}
