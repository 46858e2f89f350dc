//! Intrusive doubly-linked LRU list over slab indices.
//!
//! A hash map from key to slab index gives O(1) lookup; the list itself
//! gives O(1) move-to-head and evict-from-tail. This generalizes the
//! "is this idle too long" check a pooled resource manager does per
//! entry into full move-to-head-on-access ordering.

use apilo_core::CacheKey;

struct Node<V> {
    key: CacheKey,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A doubly-linked list of `(CacheKey, V)` pairs ordered most-recently-used
/// at the head, least-recently-used at the tail.
pub struct LruList<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<V> Default for LruList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruList<V> {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.slots[idx].as_ref().expect("unlink of freed node");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn link_at_head(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.slots[idx].as_mut().expect("link of freed node");
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Insert a brand-new entry at the head, returning its slab index.
    pub fn insert_head(&mut self, key: CacheKey, value: V) -> usize {
        let node = Node {
            key,
            value,
            prev: None,
            next: None,
        };
        let idx = if let Some(free_idx) = self.free.pop() {
            self.slots[free_idx] = Some(node);
            free_idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        };
        self.len += 1;
        self.link_at_head(idx);
        idx
    }

    /// Move an existing entry to the head (most-recently-used position).
    pub fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_at_head(idx);
    }

    /// Borrow the value stored at `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&V> {
        self.slots[idx].as_ref().map(|n| &n.value)
    }

    /// Mutably borrow the value stored at `idx`.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut V> {
        self.slots[idx].as_mut().map(|n| &mut n.value)
    }

    /// Remove the entry at `idx`, returning its value.
    pub fn remove(&mut self, idx: usize) -> Option<V> {
        if self.slots.get(idx).and_then(Option::as_ref).is_none() {
            return None;
        }
        self.unlink(idx);
        let node = self.slots[idx].take().expect("checked above");
        self.free.push(idx);
        self.len -= 1;
        Some(node.value)
    }

    /// The slab index currently at the tail (least-recently-used).
    #[must_use]
    pub const fn tail_index(&self) -> Option<usize> {
        self.tail
    }

    /// The key stored at `idx`, used when evicting to remove the
    /// corresponding entry from the owning key-index map.
    #[must_use]
    pub fn key_at(&self, idx: usize) -> Option<&CacheKey> {
        self.slots[idx].as_ref().map(|n| &n.key)
    }

    /// Iterate slab indices least-recently-used first (tail to head),
    /// used by the TTL sweep.
    pub fn iter_from_tail(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.tail;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.slots[idx].as_ref().and_then(|n| n.prev);
            Some(idx)
        })
    }

    /// Iterate all live slab indices in most-recently-used-first order,
    /// used by full-scan operations like `InvalidateTag`/`InvalidatePattern`.
    pub fn iter_from_head(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.slots[idx].as_ref().and_then(|n| n.next);
            Some(idx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> CacheKey {
        CacheKey::build("GET", &format!("http://example.test/{n}"), &[], b"").unwrap()
    }

    #[test]
    fn eviction_order_follows_recency() {
        let mut list = LruList::new();
        let a = list.insert_head(key(1), "a");
        let b = list.insert_head(key(2), "b");
        let _c = list.insert_head(key(3), "c");
        list.touch(a);
        // tail should now be b, since a was touched to the head.
        let tail = list.tail_index().unwrap();
        assert_eq!(list.get(tail), Some(&"b"));
        let _ = b;
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let mut list = LruList::new();
        let a = list.insert_head(key(1), "a");
        list.remove(a);
        assert_eq!(list.len(), 0);
        let b = list.insert_head(key(2), "b");
        assert_eq!(b, a);
    }
}
