//! Slot-ordered, key-deduplicated buffer of pending live items.

use std::collections::BTreeMap;

use crate::item::Slot;

/// Sorted set of pending items keyed by `(slot, key)`, ordered by slot then
/// key lexicographically — same-slot tie-breaking falls out of the natural
/// tuple ordering.
#[derive(Debug)]
pub struct DedupBuffer<T> {
    entries: BTreeMap<(Slot, String), T>,
}

impl<T> Default for DedupBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DedupBuffer<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Upserts by `(slot, key)`; a second insert for the same key replaces
    /// the first, keeping the latest value.
    pub fn insert(&mut self, slot: Slot, key: String, item: T) {
        self.entries.insert((slot, key), item);
    }

    /// Removes all entries with `slot <= cutoff`, returning the count
    /// removed.
    pub fn discard_up_to(&mut self, cutoff: Slot) -> usize {
        let keep = self.entries.split_off(&(cutoff.saturating_add(1), String::new()));
        let removed = self.entries.len();
        self.entries = keep;
        removed
    }

    /// Removes and returns, in ascending `(slot, key)` order, all entries
    /// with `slot > cutoff`.
    pub fn drain_above(&mut self, cutoff: Slot) -> Vec<(Slot, String, T)> {
        let drained = self.entries.split_off(&(cutoff.saturating_add(1), String::new()));
        drained
            .into_iter()
            .map(|((slot, key), item)| (slot, key, item))
            .collect()
    }

    pub fn min_slot(&self) -> Option<Slot> {
        self.entries.keys().next().map(|(slot, _)| *slot)
    }

    pub fn max_slot(&self) -> Option<Slot> {
        self.entries.keys().next_back().map(|(slot, _)| *slot)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_upserts_by_slot_and_key() {
        let mut buf = DedupBuffer::new();
        buf.insert(5, "a".into(), "first");
        buf.insert(5, "a".into(), "second");
        assert_eq!(buf.size(), 1);
        let drained = buf.drain_above(0);
        assert_eq!(drained, vec![(5, "a".into(), "second")]);
    }

    #[test]
    fn discard_up_to_removes_inclusive_cutoff() {
        let mut buf = DedupBuffer::new();
        buf.insert(1, "a".into(), 1);
        buf.insert(2, "a".into(), 2);
        buf.insert(3, "a".into(), 3);
        let removed = buf.discard_up_to(2);
        assert_eq!(removed, 2);
        assert_eq!(buf.size(), 1);
        assert_eq!(buf.min_slot(), Some(3));
    }

    #[test]
    fn drain_above_orders_by_slot_then_key() {
        let mut buf = DedupBuffer::new();
        buf.insert(2, "b".into(), "2b");
        buf.insert(2, "a".into(), "2a");
        buf.insert(1, "z".into(), "1z");
        buf.insert(3, "a".into(), "3a");
        let drained = buf.drain_above(0);
        let keys: Vec<_> = drained
            .iter()
            .map(|(s, k, _)| (*s, k.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, "z".into()),
                (2, "a".into()),
                (2, "b".into()),
                (3, "a".into()),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_above_leaves_entries_at_or_below_cutoff() {
        let mut buf = DedupBuffer::new();
        buf.insert(1, "a".into(), 1);
        buf.insert(5, "a".into(), 5);
        buf.insert(6, "a".into(), 6);
        let drained = buf.drain_above(5);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 6);
        assert_eq!(buf.size(), 2);
    }

    #[test]
    fn max_slot_tracks_highest_observed() {
        let mut buf: DedupBuffer<()> = DedupBuffer::new();
        assert_eq!(buf.max_slot(), None);
        buf.insert(10, "a".into(), ());
        buf.insert(3, "b".into(), ());
        assert_eq!(buf.max_slot(), Some(10));
    }

    proptest::proptest! {
        #[test]
        fn drain_above_is_always_sorted_by_slot_then_key(
            pairs in proptest::collection::vec((0u64..50, 0u8..8), 0..40),
            cutoff in 0u64..50,
        ) {
            let mut buf = DedupBuffer::new();
            for (slot, key_byte) in &pairs {
                buf.insert(*slot, key_byte.to_string(), *slot);
            }
            let drained = buf.drain_above(cutoff);

            for (slot, _, item) in &drained {
                proptest::prop_assert!(*slot > cutoff);
                proptest::prop_assert_eq!(*slot, *item);
            }
            let mut sorted = drained.clone();
            sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            proptest::prop_assert_eq!(drained, sorted);
        }

        #[test]
        fn discard_then_drain_partition_every_inserted_slot(
            pairs in proptest::collection::vec((0u64..50, 0u8..8), 0..40),
            cutoff in 0u64..50,
        ) {
            let mut buf = DedupBuffer::new();
            let mut inserted = std::collections::BTreeMap::new();
            for (slot, key_byte) in &pairs {
                buf.insert(*slot, key_byte.to_string(), *slot);
                inserted.insert((*slot, key_byte.to_string()), *slot);
            }
            let total = inserted.len();
            let discarded = buf.discard_up_to(cutoff);
            let remaining = buf.size();
            proptest::prop_assert_eq!(discarded + remaining, total);
        }
    }
}
