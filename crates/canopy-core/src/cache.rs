//! A small LRU cache used for compiled patterns and issued capabilities.

use std::collections::HashMap;
use std::hash::Hash;

/// Sentinel index for the intrusive recency list.
const NIL: usize = usize::MAX;

struct Slot<K, V> {
    prev: usize,
    next: usize,
    data: Option<(K, V)>,
}

/// A fixed-capacity cache with least-recently-used eviction.
///
/// Entries are kept in a slab with an intrusive doubly-linked recency
/// list, so `get`, `insert` and `remove` are O(1) plus hashing. Not
/// internally synchronized; callers wrap it in a lock.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a key, marking the entry as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.detach(index);
        self.attach_front(index);
        self.slots[index].data.as_ref().map(|(_, value)| value)
    }

    /// Look up a key without touching recency order.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.slots[index].data.as_ref().map(|(_, value)| value)
    }

    /// Insert or replace an entry, returning the evicted
    /// least-recently-used entry if the cache was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&index) = self.map.get(&key) {
            if let Some(data) = self.slots[index].data.as_mut() {
                data.1 = value;
            }
            self.detach(index);
            self.attach_front(index);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.evict_tail()
        } else {
            None
        };

        let slot = Slot {
            prev: NIL,
            next: NIL,
            data: Some((key.clone(), value)),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len().saturating_sub(1)
            }
        };
        self.map.insert(key, index);
        self.attach_front(index);
        evicted
    }

    /// Remove an entry by key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.map.remove(key)?;
        self.detach(index);
        self.free.push(index);
        self.slots[index].data.take().map(|(_, value)| value)
    }

    /// Drop every entry for which the predicate returns `false`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut doomed = Vec::new();
        let mut index = self.head;
        while index != NIL {
            if let Some((key, value)) = self.slots[index].data.as_ref() {
                if !keep(key, value) {
                    doomed.push(key.clone());
                }
            }
            index = self.slots[index].next;
        }
        for key in doomed {
            self.remove(&key);
        }
    }

    /// Visit every live entry, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut index = self.head;
        std::iter::from_fn(move || {
            while index != NIL {
                let current = index;
                index = self.slots[current].next;
                if let Some((key, value)) = self.slots[current].data.as_ref() {
                    return Some((key, value));
                }
            }
            None
        })
    }

    fn evict_tail(&mut self) -> Option<(K, V)> {
        let index = self.tail;
        if index == NIL {
            return None;
        }
        self.detach(index);
        self.free.push(index);
        let data = self.slots[index].data.take()?;
        self.map.remove(&data.0);
        Some(data)
    }

    fn detach(&mut self, index: usize) {
        let prev = self.slots[index].prev;
        let next = self.slots[index].next;
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[index].prev = NIL;
        self.slots[index].next = NIL;
    }

    fn attach_front(&mut self, index: usize) {
        self.slots[index].prev = NIL;
        self.slots[index].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.map.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
