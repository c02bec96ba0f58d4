//! Expiration Queue Module
//!
//! Binary min-heap of entry ids ordered by deadline. Entries live in
//! [`EntrySlots`]; the queue only stores ids and keeps every entry's
//! `queue_index` equal to its position in the heap.
//!
//! The queue is not synchronized on its own. Callers hold the cache lock.

use std::time::Instant;

use crate::cache::{EntryId, EntrySlots};

// == Ordering ==
/// Heap ordering over deadlines.
///
/// A missing deadline sorts after every set deadline, and two missing
/// deadlines are never less than each other. Entries without a deadline sink
/// to the bottom and never trigger an early wake.
pub fn expires_before(a: Option<Instant>, b: Option<Instant>) -> bool {
    match (a, b) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(a), Some(b)) => a < b,
    }
}

// == Expiration Queue ==
/// Min-heap of entry ids keyed by each entry's `expire_at`.
///
/// Every operation takes the arena so it can read deadlines and keep
/// `queue_index` in step with the heap.
#[derive(Debug, Default)]
pub struct ExpirationQueue {
    heap: Vec<EntryId>,
}

impl ExpirationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Earliest-expiring entry, without removing it.
    pub fn peek(&self) -> Option<EntryId> {
        self.heap.first().copied()
    }

    // == Push ==
    /// Inserts an entry and records its position.
    ///
    /// # Arguments
    /// * `slots` - Arena owning the entry
    /// * `id` - Entry to track; must not already be in the queue
    pub fn push<K, V>(&mut self, slots: &mut EntrySlots<K, V>, id: EntryId) {
        let position = self.heap.len();
        self.heap.push(id);
        slots[id].queue_index = Some(position);
        self.sift_up(slots, position);
    }

    // == Pop ==
    /// Removes and returns the earliest-expiring entry.
    ///
    /// # Returns
    /// - `Some(id)` of the entry with the earliest deadline, whose
    ///   `queue_index` is cleared
    /// - `None` if the queue is empty
    pub fn pop<K, V>(&mut self, slots: &mut EntrySlots<K, V>) -> Option<EntryId> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(slots, 0, last);
        let id = self.heap.pop()?;
        slots[id].queue_index = None;
        if !self.heap.is_empty() {
            self.sift_down(slots, 0);
        }
        Some(id)
    }

    // == Remove ==
    /// Removes an entry from its recorded position.
    ///
    /// The entry must currently be tracked by this queue. An id whose
    /// recorded position does not hold it is left alone.
    ///
    /// # Returns
    /// - `Some(id)` if the entry was tracked and has been removed
    /// - `None` if the entry was not tracked by this queue
    pub fn remove<K, V>(&mut self, slots: &mut EntrySlots<K, V>, id: EntryId) -> Option<EntryId> {
        let position = self.position_of(slots, id)?;
        let last = self.heap.len() - 1;
        if position != last {
            self.swap(slots, position, last);
        }
        self.heap.pop();
        slots[id].queue_index = None;
        if position < self.heap.len() && !self.sift_down(slots, position) {
            self.sift_up(slots, position);
        }
        Some(id)
    }

    // == Update ==
    /// Restores heap order after the entry's deadline changed.
    ///
    /// Sifts down first and up only if the entry did not move. Untracked ids
    /// are ignored.
    pub fn update<K, V>(&mut self, slots: &mut EntrySlots<K, V>, id: EntryId) {
        if let Some(position) = self.position_of(slots, id) {
            if !self.sift_down(slots, position) {
                self.sift_up(slots, position);
            }
        }
    }

    fn position_of<K, V>(&self, slots: &EntrySlots<K, V>, id: EntryId) -> Option<usize> {
        let position = slots.get(id)?.queue_index?;
        (self.heap.get(position) == Some(&id)).then_some(position)
    }

    fn less<K, V>(&self, slots: &EntrySlots<K, V>, i: usize, j: usize) -> bool {
        expires_before(slots[self.heap[i]].expire_at, slots[self.heap[j]].expire_at)
    }

    fn swap<K, V>(&mut self, slots: &mut EntrySlots<K, V>, i: usize, j: usize) {
        self.heap.swap(i, j);
        slots[self.heap[i]].queue_index = Some(i);
        slots[self.heap[j]].queue_index = Some(j);
    }

    fn sift_up<K, V>(&mut self, slots: &mut EntrySlots<K, V>, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.less(slots, position, parent) {
                break;
            }
            self.swap(slots, position, parent);
            position = parent;
        }
    }

    /// Returns true if the entry moved.
    fn sift_down<K, V>(&mut self, slots: &mut EntrySlots<K, V>, start: usize) -> bool {
        let len = self.heap.len();
        let mut position = start;
        loop {
            let left = 2 * position + 1;
            if left >= len {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < len && self.less(slots, right, left) {
                child = right;
            }
            if !self.less(slots, child, position) {
                break;
            }
            self.swap(slots, position, child);
            position = child;
        }
        position > start
    }

    /// Panics if heap order or any recorded position is wrong.
    #[cfg(test)]
    pub(crate) fn assert_invariants<K, V>(&self, slots: &EntrySlots<K, V>) {
        for (position, id) in self.heap.iter().enumerate() {
            assert_eq!(
                slots[*id].queue_index,
                Some(position),
                "recorded position is stale"
            );
            if position > 0 {
                let parent = (position - 1) / 2;
                assert!(
                    !self.less(slots, position, parent),
                    "heap order violated at {}",
                    position
                );
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Entry, Ttl};
    use std::time::Duration;

    fn filled(ttls: &[Ttl]) -> (EntrySlots<String, u32>, ExpirationQueue, Vec<EntryId>) {
        let mut slots = EntrySlots::new();
        let mut queue = ExpirationQueue::new();
        let mut ids = Vec::new();
        for (i, ttl) in ttls.iter().enumerate() {
            let id = slots.insert(Entry::new(format!("key_{}", i), i as u32, *ttl));
            queue.push(&mut slots, id);
            ids.push(id);
        }
        (slots, queue, ids)
    }

    fn secs(n: u64) -> Ttl {
        Ttl::After(Duration::from_secs(n))
    }

    #[test]
    fn test_push() {
        let (slots, queue, _) = filled(&[Ttl::Never; 10]);

        assert_eq!(queue.len(), 10);
        queue.assert_invariants(&slots);
    }

    #[test]
    fn test_pop_until_empty() {
        let (mut slots, mut queue, _) = filled(&[Ttl::Never; 10]);

        for _ in 0..5 {
            assert!(queue.pop(&mut slots).is_some());
        }
        assert_eq!(queue.len(), 5);
        for _ in 0..5 {
            let id = queue.pop(&mut slots).unwrap();
            assert!(slots[id].queue_index().is_none());
        }
        assert!(queue.is_empty());
        assert!(queue.pop(&mut slots).is_none());
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let ttls: Vec<Ttl> = (1..=10).rev().map(secs).collect();
        let (mut slots, mut queue, _) = filled(&ttls);

        let mut popped = Vec::new();
        while let Some(id) = queue.pop(&mut slots) {
            popped.push(slots[id].value);
        }

        // key_9 has the 1s TTL, key_0 the 10s one
        assert_eq!(popped, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_missing_deadlines_sort_last() {
        let (mut slots, mut queue, _) =
            filled(&[Ttl::Never, secs(3), Ttl::Global, secs(1), Ttl::Never]);

        let first = queue.pop(&mut slots).unwrap();
        let second = queue.pop(&mut slots).unwrap();
        assert_eq!(slots[first].value, 3);
        assert_eq!(slots[second].value, 1);

        while let Some(id) = queue.pop(&mut slots) {
            assert!(slots[id].expire_at().is_none());
        }
    }

    #[test]
    fn test_remove() {
        let ttls: Vec<Ttl> = (0..5).map(|i| secs(i + 1)).collect();
        let (mut slots, mut queue, ids) = filled(&ttls);

        assert_eq!(queue.remove(&mut slots, ids[2]), Some(ids[2]));
        assert_eq!(queue.len(), 4);
        queue.assert_invariants(&slots);

        while let Some(id) = queue.pop(&mut slots) {
            assert_ne!(id, ids[2]);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_untracked_is_ignored() {
        let (mut slots, mut queue, ids) = filled(&[secs(1), secs(2)]);
        queue.remove(&mut slots, ids[0]);

        assert_eq!(queue.remove(&mut slots, ids[0]), None);
        assert_eq!(queue.len(), 1);
        queue.assert_invariants(&slots);
    }

    #[test]
    fn test_update_moves_entry_both_ways() {
        let (mut slots, mut queue, ids) = filled(&[secs(10), secs(20), secs(30)]);
        assert_eq!(queue.peek(), Some(ids[0]));

        // Push the head far into the future.
        slots[ids[0]].ttl = secs(100);
        slots[ids[0]].touch();
        queue.update(&mut slots, ids[0]);
        assert_eq!(queue.peek(), Some(ids[1]));
        queue.assert_invariants(&slots);

        // Pull the last one to the front.
        slots[ids[2]].ttl = secs(1);
        slots[ids[2]].touch();
        queue.update(&mut slots, ids[2]);
        assert_eq!(queue.peek(), Some(ids[2]));
        queue.assert_invariants(&slots);
    }

    #[test]
    fn test_update_after_value_change_keeps_entry() {
        let (mut slots, mut queue, ids) = filled(&[secs(1)]);

        slots[ids[0]].value = 42;
        queue.update(&mut slots, ids[0]);

        let id = queue.pop(&mut slots).unwrap();
        assert_eq!(slots[id].value, 42);
        assert!(queue.is_empty());
    }
}
