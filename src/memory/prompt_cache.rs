//! LRU prompt cache for repeated prefix reuse.
//!
//! Caches context snapshots keyed by the hash of the prompt tokens they
//! hold. A lookup finds the longest cached prefix of a new prompt.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::engine::TokenId;

/// Cached snapshot with LRU tracking.
#[derive(Debug, Clone)]
pub struct CachedPrompt {
    snapshot: Vec<u8>,
    seq_len: usize,
    last_used: u64,
}

impl CachedPrompt {
    pub fn snapshot(&self) -> &[u8] {
        &self.snapshot
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }
}

/// LRU prompt cache with hash-based lookup.
#[derive(Debug)]
pub struct PromptCache {
    entries: HashMap<[u8; 32], CachedPrompt>,
    max_entries: usize,
    access_counter: u64,
}

impl PromptCache {
    /// Create a new prompt cache with given capacity.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries),
            max_entries: max_entries.max(1),
            access_counter: 0,
        }
    }

    /// Hash a token sequence for cache lookup.
    pub fn hash_tokens(tokens: &[TokenId]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for &t in tokens {
            hasher.update(t.to_le_bytes());
        }
        hasher.finalize().into()
    }

    /// Look up the snapshot for an exact token match.
    pub fn get(&mut self, tokens: &[TokenId]) -> Option<&CachedPrompt> {
        let hash = Self::hash_tokens(tokens);
        self.access_counter += 1;
        let counter = self.access_counter;
        let entry = self.entries.get_mut(&hash)?;
        entry.last_used = counter;
        Some(entry)
    }

    /// Store the snapshot of a context holding exactly `tokens`.
    pub fn insert(&mut self, tokens: &[TokenId], snapshot: Vec<u8>) {
        let hash = Self::hash_tokens(tokens);
        if !self.entries.contains_key(&hash) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.access_counter += 1;
        debug!(key = %hex::encode(&hash[..8]), tokens = tokens.len(), "prompt cache insert");
        self.entries.insert(
            hash,
            CachedPrompt { snapshot, seq_len: tokens.len(), last_used: self.access_counter },
        );
    }

    /// Find the longest cached prefix of `tokens`.
    pub fn find_prefix(&mut self, tokens: &[TokenId]) -> Option<(usize, CachedPrompt)> {
        if self.entries.is_empty() {
            return None;
        }
        // One pass builds every prefix hash.
        let mut hasher = Sha256::new();
        let mut prefixes: Vec<[u8; 32]> = Vec::with_capacity(tokens.len());
        for &t in tokens {
            hasher.update(t.to_le_bytes());
            prefixes.push(hasher.clone().finalize().into());
        }

        for (i, hash) in prefixes.iter().enumerate().rev() {
            if let Some(entry) = self.entries.get_mut(hash) {
                self.access_counter += 1;
                entry.last_used = self.access_counter;
                return Some((i + 1, entry.clone()));
            }
        }
        None
    }

    /// Evict least recently used entry.
    fn evict_lru(&mut self) {
        let oldest = self.entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| *k);

        if let Some(hash) = oldest {
            debug!(key = %hex::encode(&hash[..8]), "prompt cache evict");
            self.entries.remove(&hash);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Total bytes held by cached snapshots.
    pub fn memory_bytes(&self) -> usize {
        self.entries.values().map(|e| e.snapshot.len()).sum()
    }
}
