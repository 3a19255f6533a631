//! Size- and age-triggered batching
//!
//! A batch is released when it reaches `bulk_actions` items or when its
//! oldest item has waited `flush_interval`, whichever comes first. Every
//! pushed item leaves in exactly one batch.

use std::mem;
use std::time::{Duration, Instant};

/// Accumulates items into bulk batches
#[derive(Debug)]
pub struct Batcher<T> {
    items: Vec<T>,
    oldest: Option<Instant>,
    bulk_actions: usize,
    flush_interval: Duration,
}

impl<T> Batcher<T> {
    /// Batcher releasing at `bulk_actions` items (minimum 1) or `flush_interval` of age
    pub fn new(bulk_actions: usize, flush_interval: Duration) -> Self {
        let bulk_actions = bulk_actions.max(1);
        Batcher {
            items: Vec::with_capacity(bulk_actions.min(4096)),
            oldest: None,
            bulk_actions,
            flush_interval,
        }
    }

    /// Buffer `item`; returns the batch if this push filled it
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        if self.items.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.items.push(item);
        if self.items.len() >= self.bulk_actions {
            Some(self.take())
        } else {
            None
        }
    }

    /// The buffered batch, if its oldest item has waited long enough
    pub fn take_expired(&mut self, now: Instant) -> Option<Vec<T>> {
        match self.oldest {
            Some(oldest) if now.saturating_duration_since(oldest) >= self.flush_interval => {
                Some(self.take())
            }
            _ => None,
        }
    }

    /// Whatever is buffered, regardless of size or age
    pub fn drain(&mut self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// Items buffered
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn take(&mut self) -> Vec<T> {
        self.oldest = None;
        mem::take(&mut self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_2500_items_at_1000_is_three_batches() {
        let mut batcher = Batcher::new(1000, Duration::from_secs(3600));
        let mut batches = Vec::new();
        for i in 0..2500u32 {
            if let Some(batch) = batcher.push(i) {
                batches.push(batch);
            }
        }
        assert_eq!(batches.len(), 2);
        batches.extend(batcher.drain());
        assert_eq!(batches.len(), 3);

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        let unique: HashSet<u32> = batches.into_iter().flatten().collect();
        assert_eq!(unique.len(), 2500);
    }

    #[test]
    fn test_take_expired_respects_interval() {
        let mut batcher = Batcher::new(10, Duration::from_millis(100));
        let start = Instant::now();
        assert!(batcher.take_expired(start).is_none());

        batcher.push("a");
        assert!(batcher.take_expired(Instant::now()).is_none());
        let later = Instant::now() + Duration::from_millis(150);
        assert_eq!(batcher.take_expired(later), Some(vec!["a"]));
        assert!(batcher.is_empty());
        assert!(batcher.take_expired(later).is_none());
    }

    #[test]
    fn test_drain_empty_is_none() {
        let mut batcher: Batcher<u8> = Batcher::new(5, Duration::from_secs(1));
        assert!(batcher.drain().is_none());
        batcher.push(1);
        assert_eq!(batcher.len(), 1);
        assert_eq!(batcher.drain(), Some(vec![1]));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn every_item_leaves_in_exactly_one_batch(n in 0usize..3000, k in 1usize..1200) {
                let mut batcher = Batcher::new(k, Duration::from_secs(3600));
                let mut batches = Vec::new();
                for i in 0..n {
                    batches.extend(batcher.push(i));
                }
                batches.extend(batcher.drain());

                prop_assert_eq!(batches.len(), (n + k - 1) / k);
                prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= k));
                let flat: Vec<usize> = batches.into_iter().flatten().collect();
                prop_assert_eq!(flat, (0..n).collect::<Vec<_>>());
            }
        }
    }
}
