//! A fixed set of shards with uniform-random producer routing (§4.3).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::shard::{Shard, WriteOutcome};

/// Owns every shard for one logger instance and tracks how many have
/// signaled they're ready to flush.
pub struct ShardCollection {
    shards: Vec<Arc<Shard>>,
    ready_count: AtomicUsize,
    threshold: usize,
}

impl ShardCollection {
    pub fn new(num_shards: usize, per_shard_capacity: usize) -> std::io::Result<Self> {
        let mut shards = Vec::with_capacity(num_shards);
        for id in 0..num_shards {
            shards.push(Arc::new(Shard::new(id, per_shard_capacity)?));
        }
        let threshold = (num_shards / 4).max(1);
        Ok(Self {
            shards,
            ready_count: AtomicUsize::new(0),
            threshold,
        })
    }

    /// The flush-eligibility threshold `T = max(1, floor(N/4))`.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Picks a shard uniformly at random (not round-robin, to avoid
    /// synchronized hot spots under regular producer cadence) and
    /// delegates the write to it.
    pub fn write(&self, payload: &[u8]) -> (WriteOutcome, usize) {
        let idx = rand::thread_rng().gen_range(0..self.shards.len());
        let outcome = self.shards[idx].write(payload);
        if outcome.needs_flush {
            self.ready_count.fetch_add(1, Ordering::AcqRel);
        }
        (outcome, idx)
    }

    pub fn threshold_reached(&self) -> bool {
        self.ready_count.load(Ordering::Acquire) >= self.threshold
    }

    /// Every shard whose `is_full()` is currently true.
    pub fn ready_shards(&self) -> Vec<Arc<Shard>> {
        self.shards
            .iter()
            .filter(|s| s.is_full())
            .cloned()
            .collect()
    }

    pub fn reset_ready(&self) {
        self.ready_count.store(0, Ordering::Release);
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn has_data(&self) -> bool {
        self.shards.iter().any(|s| s.has_data())
    }

    pub fn get(&self, id: usize) -> Option<&Arc<Shard>> {
        self.shards.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_quarter_of_shard_count_minimum_one() {
        assert_eq!(ShardCollection::new(1, 65536).unwrap().threshold(), 1);
        assert_eq!(ShardCollection::new(3, 65536).unwrap().threshold(), 1);
        assert_eq!(ShardCollection::new(8, 65536).unwrap().threshold(), 2);
        assert_eq!(ShardCollection::new(16, 65536).unwrap().threshold(), 4);
    }

    #[test]
    fn write_routes_to_some_shard_and_tracks_readiness() {
        let collection = ShardCollection::new(4, 4096).unwrap();
        let payload = vec![0u8; 4096 - 8 - 4]; // fills exactly, triggers ready
        let (outcome, idx) = collection.write(&payload);
        assert!(outcome.needs_flush);
        assert!(collection.get(idx).unwrap().is_full());
        assert!(collection.threshold_reached() || collection.threshold() > 1);
    }

    #[test]
    fn ready_shards_reports_only_full_shards() {
        let collection = ShardCollection::new(2, 4096).unwrap();
        assert!(collection.ready_shards().is_empty());
        let payload = vec![0u8; 4096 - 8 - 4];
        let (_, idx) = collection.write(&payload);
        let ready = collection.ready_shards();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), idx);
    }
}
