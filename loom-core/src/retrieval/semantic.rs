//! Semantic ranking for lorebook entries.
//!
//! The scoring and caching here are pure; the embedding call itself is
//! an external collaborator behind the [`Embedder`] trait. Retrieval
//! degrades to lexical-only ranking when the collaborator is absent or
//! failing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Produces embedding vectors for a batch of texts.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each text, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, muse::Error>;
}

#[async_trait]
impl Embedder for muse::Muse {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, muse::Error> {
        muse::Muse::embed(self, texts).await
    }
}

/// Cosine similarity between two vectors, in [-1, 1].
///
/// Mismatched dimensions and zero-magnitude vectors score 0 rather than
/// erroring; a malformed cached vector must not abort retrieval.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cheap non-cryptographic content hash (FNV-1a, 64-bit).
///
/// Used to detect whether a cached embedding is stale for the text it
/// was computed from.
pub fn content_hash(text: &str) -> String {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")
}

/// A cached embedding with its expiry.
#[derive(Debug, Clone)]
struct CachedVector {
    vector: Vec<f32>,
    expires_at: Instant,
}

/// Embedding cache keyed by content hash with wall-clock expiry.
///
/// An explicit component owned by the session, not ambient global
/// state. Staleness is resolved by recomputation: a `get` miss (absent
/// or expired) means the caller re-embeds and `put`s the result.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: HashMap<String, CachedVector>,
    ttl: Duration,
}

impl EmbeddingCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Look up a live embedding by content hash.
    pub fn get(&self, hash: &str) -> Option<&[f32]> {
        let cached = self.entries.get(hash)?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        Some(&cached.vector)
    }

    /// Store an embedding under a content hash with the default TTL.
    pub fn put(&mut self, hash: impl Into<String>, vector: Vec<f32>) {
        self.expire_at(hash, vector, Instant::now() + self.ttl);
    }

    /// Store an embedding with an explicit expiry instant.
    pub fn expire_at(&mut self, hash: impl Into<String>, vector: Vec<f32>, expires_at: Instant) {
        self.entries.insert(
            hash.into(),
            CachedVector { vector, expires_at },
        );
    }

    /// Drop entries whose expiry has passed.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, cached| cached.expires_at > now);
    }

    /// Number of stored entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        // An hour of reuse; slightly stale embeddings are self-healing,
        // not a correctness hazard.
        Self::new(Duration::from_secs(3600))
    }
}
