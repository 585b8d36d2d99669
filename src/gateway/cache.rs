//! Semantic response cache keyed by per-model request embeddings.
//!
//! Per-model structure behind a `tokio::sync::RwLock`: lookups take a read lock, inserts and
//! evictions a write lock. A hit's bookkeeping (`last_hit_at`, `hit_count`) updates through
//! atomics on the matched entry, so concurrent lookups only ever contend with each other on that
//! one entry, not on the whole model's lock. Similarity search is a brute-force cosine scan,
//! acceptable up to `CACHE_MAX_ITEMS ≈ 10⁴` — approximate indexing is not needed at that scale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

/// One cached response. `last_hit_at`/`hit_count` are atomics so a read-locked lookup can record
/// a hit without taking a write lock.
#[derive(Debug)]
pub struct CacheEntry {
    pub entry_id: u64,
    pub vector: Vec<f32>,
    pub original_request_digest: Vec<u8>,
    pub response: Vec<u8>,
    pub created_at: u64,
    pub last_hit_at: AtomicU64,
    pub hit_count: AtomicU64,
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            entry_id: self.entry_id,
            vector: self.vector.clone(),
            original_request_digest: self.original_request_digest.clone(),
            response: self.response.clone(),
            created_at: self.created_at,
            last_hit_at: AtomicU64::new(self.last_hit_at.load(Ordering::SeqCst)),
            hit_count: AtomicU64::new(self.hit_count.load(Ordering::SeqCst)),
        }
    }
}

/// Per-model store: a flat vector scanned linearly for nearest-neighbor lookup.
struct ModelCache {
    entries: Vec<CacheEntry>,
    max_items: usize,
}

impl ModelCache {
    fn new(max_items: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_items,
        }
    }

    /// Cosine similarity of L2-normalized vectors is their dot product.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    /// `lookup(vector, threshold)`: nearest entry whose cosine similarity ≥ threshold, ties
    /// broken by more recent `last_hit_at`. Takes `&self`: the matched entry's hit bookkeeping
    /// updates through its atomics, so a lookup never needs a write lock on the model.
    fn lookup(&self, vector: &[f32], threshold: f32, now: u64) -> Option<(CacheEntry, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let sim = Self::cosine_similarity(vector, &entry.vector);
            if sim < threshold {
                continue;
            }
            match best {
                Some((best_idx, best_sim)) => {
                    let better = sim > best_sim
                        || (sim == best_sim
                            && entry.last_hit_at.load(Ordering::SeqCst)
                                > self.entries[best_idx].last_hit_at.load(Ordering::SeqCst));
                    if better {
                        best = Some((idx, sim));
                    }
                }
                None => best = Some((idx, sim)),
            }
        }

        best.map(|(idx, sim)| {
            let entry = &self.entries[idx];
            entry.last_hit_at.store(now, Ordering::SeqCst);
            entry.hit_count.fetch_add(1, Ordering::SeqCst);
            (entry.clone(), sim)
        })
    }

    /// `insert(vector, request_digest, response) → entry_id`; evicts the LRU entry by
    /// `last_hit_at` when `max_items` is exceeded.
    fn insert(&mut self, entry_id: u64, vector: Vec<f32>, digest: Vec<u8>, response: Vec<u8>, now: u64) -> u64 {
        if self.entries.len() >= self.max_items {
            if let Some((lru_idx, _)) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_hit_at.load(Ordering::SeqCst))
            {
                self.entries.remove(lru_idx);
            }
        }
        self.entries.push(CacheEntry {
            entry_id,
            vector,
            original_request_digest: digest,
            response,
            created_at: now,
            last_hit_at: AtomicU64::new(now),
            hit_count: AtomicU64::new(0),
        });
        entry_id
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            max_items: self.max_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: usize,
    pub max_items: usize,
}

/// Process-wide semantic cache, one [`ModelCache`] per model identifier — vectors are stored
/// per-model, so a lookup never matches across models.
pub struct SemanticCache {
    models: RwLock<HashMap<String, ModelCache>>,
    max_items: usize,
    next_id: AtomicU64,
    clock: AtomicU64,
}

impl SemanticCache {
    pub fn new(max_items: usize) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            max_items,
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(1),
        }
    }

    /// Logical clock tick, used instead of wall time so lookups/inserts within the same
    /// millisecond still have a well-defined LRU/tie-break order.
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn lookup(&self, model: &str, vector: &[f32], threshold: f32) -> Option<(CacheEntry, f32)> {
        let now = self.tick();
        let models = self.models.read().await;
        let cache = models.get(model)?;
        cache.lookup(vector, threshold, now)
    }

    pub async fn insert(&self, model: &str, vector: Vec<f32>, digest: Vec<u8>, response: Vec<u8>) -> u64 {
        let now = self.tick();
        let entry_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut models = self.models.write().await;
        let cache = models
            .entry(model.to_string())
            .or_insert_with(|| ModelCache::new(self.max_items));
        cache.insert(entry_id, vector, digest, response, now)
    }

    pub async fn clear(&self, model: Option<&str>) {
        let mut models = self.models.write().await;
        match model {
            Some(m) => {
                if let Some(cache) = models.get_mut(m) {
                    cache.clear();
                }
            }
            None => models.clear(),
        }
    }

    pub async fn stats(&self, model: Option<&str>) -> Vec<(String, CacheStats)> {
        let models = self.models.read().await;
        match model {
            Some(m) => models
                .get(m)
                .map(|c| vec![(m.to_string(), c.stats())])
                .unwrap_or_default(),
            None => models.iter().map(|(name, c)| (name.clone(), c.stats())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    #[tokio::test]
    async fn lookup_misses_on_empty_cache() {
        let cache = SemanticCache::new(10);
        assert!(cache.lookup("gpt-4", &unit(&[1.0, 0.0]), 0.9).await.is_none());
    }

    #[tokio::test]
    async fn insert_then_lookup_hits_above_threshold() {
        let cache = SemanticCache::new(10);
        cache
            .insert("gpt-4", unit(&[1.0, 0.0]), vec![1, 2, 3], b"Paris.".to_vec())
            .await;
        let (entry, sim) = cache.lookup("gpt-4", &unit(&[0.99, 0.01]), 0.9).await.unwrap();
        assert_eq!(entry.response, b"Paris.".to_vec());
        assert!(sim >= 0.9);
    }

    #[tokio::test]
    async fn cache_isolation_across_models() {
        let cache = SemanticCache::new(10);
        cache.insert("model-a", unit(&[1.0, 0.0]), vec![], b"a".to_vec()).await;
        assert!(cache.lookup("model-b", &unit(&[1.0, 0.0]), 0.0).await.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_least_recently_hit_entry() {
        let cache = SemanticCache::new(1);
        cache.insert("m", unit(&[1.0, 0.0]), vec![], b"first".to_vec()).await;
        cache.insert("m", unit(&[0.0, 1.0]), vec![], b"second".to_vec()).await;
        let stats = cache.stats(Some("m")).await;
        assert_eq!(stats[0].1.entry_count, 1);
        // The first entry should have been evicted in favor of the second.
        assert!(cache.lookup("m", &unit(&[0.0, 1.0]), 0.9).await.is_some());
        assert!(cache.lookup("m", &unit(&[1.0, 0.0]), 0.9).await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_all_entries_for_model() {
        let cache = SemanticCache::new(10);
        cache.insert("m", unit(&[1.0, 0.0]), vec![], b"x".to_vec()).await;
        cache.clear(Some("m")).await;
        let stats = cache.stats(Some("m")).await;
        assert_eq!(stats[0].1.entry_count, 0);
    }
}
