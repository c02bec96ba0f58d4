//! Cache Entry Module
//!
//! Defines individual cache entries, their TTL modes and the slot arena that
//! owns them.

use std::ops::{Index, IndexMut};
use std::time::{Duration, Instant};

// == TTL ==
/// Time-to-live mode of a single entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// Expires the given duration after the last touch.
    After(Duration),
    /// Follows the cache-wide TTL. Promoted to `After(global)` on the next
    /// touch once a global TTL is configured; never expires without one.
    #[default]
    Global,
    /// Never expires by time.
    Never,
}

impl Ttl {
    /// Maps a zero duration to [`Ttl::Global`], mirroring the "zero means
    /// use the global TTL" sentinel.
    pub fn normalized(self) -> Self {
        match self {
            Ttl::After(d) if d.is_zero() => Ttl::Global,
            other => other,
        }
    }

    /// Returns the concrete duration, if this TTL has one.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Ttl::After(d) => Some(*d),
            Ttl::Global | Ttl::Never => None,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl::After(duration).normalized()
    }
}

// == Entry ==
/// A single cache entry.
///
/// `expire_at` is `None` while no deadline has been computed, which is not
/// the same as never expiring: a `Global` entry gains a deadline once a
/// global TTL exists and the entry is touched.
#[derive(Debug, Clone)]
pub struct Entry<K, V> {
    key: K,
    /// The stored value
    pub value: V,
    /// TTL mode, possibly promoted from `Global`
    pub ttl: Ttl,
    pub(crate) expire_at: Option<Instant>,
    pub(crate) queue_index: Option<usize>,
}

impl<K, V> Entry<K, V> {
    // == Constructor ==
    /// Creates a new entry and touches it.
    ///
    /// Touching without the cache lock is fine here since nothing else can
    /// see the entry yet.
    pub fn new(key: K, value: V, ttl: Ttl) -> Self {
        let mut entry = Self {
            key,
            value,
            ttl: ttl.normalized(),
            expire_at: None,
            queue_index: None,
        };
        entry.touch();
        entry
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Absolute deadline, if one has been computed.
    pub fn expire_at(&self) -> Option<Instant> {
        self.expire_at
    }

    /// Current position inside the expiration queue.
    pub fn queue_index(&self) -> Option<usize> {
        self.queue_index
    }

    // == Touch ==
    /// Resets the deadline to `now + ttl`. No-op for `Global` and `Never`.
    ///
    /// A TTL too large to be represented as an `Instant` leaves the entry
    /// without a deadline, so it sorts last and is never swept.
    pub fn touch(&mut self) {
        if let Ttl::After(ttl) = self.ttl {
            self.expire_at = Instant::now().checked_add(ttl);
        }
    }

    // == Is Expired ==
    /// Checks whether the entry is past its deadline.
    ///
    /// Only `After` entries can expire by time.
    pub fn is_expired(&self) -> bool {
        match (self.ttl, self.expire_at) {
            (Ttl::After(_), Some(deadline)) => deadline < Instant::now(),
            _ => false,
        }
    }

    /// Whether the entry takes part in time-based expiry given the current
    /// global TTL.
    pub(crate) fn is_time_tracked(&self, global_ttl: Option<Duration>) -> bool {
        match self.ttl {
            Ttl::After(_) => true,
            Ttl::Global => global_ttl.is_some(),
            Ttl::Never => false,
        }
    }

    /// Promotes a `Global` entry to the global TTL and touches it unless
    /// `extend` is false. An entry without a deadline is always touched so a
    /// freshly promoted entry starts counting down.
    ///
    /// Entries that are not time tracked lose their deadline, which keeps
    /// them from sitting at the head of the queue. Returns whether the entry
    /// is time tracked.
    pub(crate) fn refresh(&mut self, global_ttl: Option<Duration>, extend: bool) -> bool {
        if !self.is_time_tracked(global_ttl) {
            self.expire_at = None;
            return false;
        }
        if let (Ttl::Global, Some(global)) = (self.ttl, global_ttl) {
            self.ttl = Ttl::After(global);
        }
        if extend || self.expire_at.is_none() {
            self.touch();
        }
        true
    }

    pub(crate) fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

// == Entry Slots ==
/// Stable handle of an entry inside [`EntrySlots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// Arena owning every live entry.
///
/// Ids stay valid until the entry is removed; freed slots are reused.
#[derive(Debug)]
pub struct EntrySlots<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    len: usize,
}

impl<K, V> Default for EntrySlots<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EntrySlots<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores an entry and returns its id.
    pub fn insert(&mut self, entry: Entry<K, V>) -> EntryId {
        self.len += 1;
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                self.slots.push(Some(entry));
                EntryId(self.slots.len() - 1)
            }
        }
    }

    /// Removes and returns the entry, freeing its slot.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry<K, V>> {
        let entry = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry<K, V>> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K, V> Index<EntryId> for EntrySlots<K, V> {
    type Output = Entry<K, V>;

    fn index(&self, id: EntryId) -> &Self::Output {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("no entry stored at {:?}", id),
        }
    }
}

impl<K, V> IndexMut<EntryId> for EntrySlots<K, V> {
    fn index_mut(&mut self, id: EntryId) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(entry) => entry,
            None => panic!("no entry stored at {:?}", id),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_with_ttl_gets_deadline() {
        let entry = Entry::new("k", 1, Ttl::After(Duration::from_secs(60)));

        assert!(entry.expire_at().is_some());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_global_and_never_have_no_deadline() {
        let global = Entry::new("g", 1, Ttl::Global);
        let never = Entry::new("n", 1, Ttl::Never);

        assert!(global.expire_at().is_none());
        assert!(never.expire_at().is_none());
        assert!(!global.is_expired());
        assert!(!never.is_expired());
    }

    #[test]
    fn test_zero_duration_means_global() {
        let entry = Entry::new("k", 1, Ttl::After(Duration::ZERO));
        assert_eq!(entry.ttl, Ttl::Global);
        assert_eq!(Ttl::from(Duration::ZERO), Ttl::Global);
        assert_eq!(
            Ttl::from(Duration::from_millis(5)),
            Ttl::After(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_ttl_duration() {
        assert_eq!(Ttl::After(Duration::from_secs(3)).duration(), Some(Duration::from_secs(3)));
        assert_eq!(Ttl::Global.duration(), None);
        assert_eq!(Ttl::Never.duration(), None);
    }

    #[test]
    fn test_unrepresentable_ttl_has_no_deadline() {
        let mut entry = Entry::new("k", 1, Ttl::After(Duration::MAX));

        assert_eq!(entry.ttl, Ttl::After(Duration::MAX));
        assert!(entry.expire_at().is_none());
        assert!(!entry.is_expired());

        entry.touch();
        assert!(entry.expire_at().is_none());
        assert!(entry.refresh(None, true));
        assert!(entry.expire_at().is_none());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = Entry::new("k", 1, Ttl::After(Duration::from_millis(20)));

        sleep(Duration::from_millis(30));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_touch_extends_deadline() {
        let mut entry = Entry::new("k", 1, Ttl::After(Duration::from_millis(50)));
        let first = entry.expire_at().unwrap();

        sleep(Duration::from_millis(5));
        entry.touch();

        assert!(entry.expire_at().unwrap() > first);
    }

    #[test]
    fn test_refresh_promotes_global() {
        let mut entry = Entry::new("k", 1, Ttl::Global);

        assert!(!entry.refresh(None, true));
        assert_eq!(entry.ttl, Ttl::Global);

        assert!(entry.refresh(Some(Duration::from_secs(5)), true));
        assert_eq!(entry.ttl, Ttl::After(Duration::from_secs(5)));
        assert!(entry.expire_at().is_some());
    }

    #[test]
    fn test_refresh_without_extension_keeps_deadline() {
        let mut entry = Entry::new("k", 1, Ttl::After(Duration::from_secs(5)));
        let deadline = entry.expire_at();

        sleep(Duration::from_millis(2));
        assert!(entry.refresh(None, false));

        assert_eq!(entry.expire_at(), deadline);
    }

    #[test]
    fn test_promotion_without_extension_still_sets_first_deadline() {
        let mut entry = Entry::new("k", 1, Ttl::Global);

        assert!(entry.refresh(Some(Duration::from_secs(5)), false));

        assert!(entry.expire_at().is_some());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_never_is_not_tracked() {
        let mut entry = Entry::new("k", 1, Ttl::After(Duration::from_secs(1)));
        entry.ttl = Ttl::Never;

        assert!(!entry.refresh(Some(Duration::from_secs(1)), true));
        assert_eq!(entry.ttl, Ttl::Never);
        assert!(entry.expire_at().is_none());
    }

    #[test]
    fn test_slots_reuse_freed_ids() {
        let mut slots = EntrySlots::new();
        let a = slots.insert(Entry::new("a", 1, Ttl::Never));
        let b = slots.insert(Entry::new("b", 2, Ttl::Never));
        assert_eq!(slots.len(), 2);

        let removed = slots.remove(a).unwrap();
        assert_eq!(*removed.key(), "a");
        assert!(slots.get(a).is_none());
        assert!(slots.remove(a).is_none());

        let c = slots.insert(Entry::new("c", 3, Ttl::Never));
        assert_eq!(c, a);
        assert_eq!(slots[b].value, 2);
        assert_eq!(slots[c].value, 3);
        assert_eq!(slots.len(), 2);
    }
}
