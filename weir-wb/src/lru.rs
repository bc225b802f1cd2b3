//! Arena-and-index LRU ordering.
//!
//! A dense slot arena with explicit prev/next indices plus a reverse map
//! from object identity to slot index. No pointers, so removal never
//! invalidates anything: freed slots go on a free list and are reused.
//!
//! Head is the least-recently-queued identity (the dequeue candidate);
//! tail is the most recent.

use std::collections::HashMap;

use weir_core::ObjectId;

/// One linked slot in the arena.
#[derive(Debug)]
struct Slot {
    id: ObjectId,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU ordering over object identities.
#[derive(Debug, Default)]
pub struct LruList {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<ObjectId, usize>,
}

impl LruList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no identity is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// True if `id` is linked.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    /// Links `id` at the tail (most recently queued).
    ///
    /// # Panics
    /// Panics if `id` is already linked; callers must use
    /// [`touch`](Self::touch) to refresh an existing identity.
    pub fn push_back(&mut self, id: ObjectId) {
        assert!(
            !self.index.contains_key(&id),
            "identity already linked: {id}"
        );
        let slot = Slot {
            id,
            prev: self.tail,
            next: None,
        };
        let i = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        match self.tail {
            Some(t) => self.slot_mut(t).next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        self.index.insert(id, i);
    }

    /// Moves `id` to the tail. Returns `false` if it is not linked.
    pub fn touch(&mut self, id: ObjectId) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        if self.tail == Some(i) {
            return true;
        }
        self.unlink(i);
        self.slot_mut(i).prev = self.tail;
        self.slot_mut(i).next = None;
        match self.tail {
            Some(t) => self.slot_mut(t).next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
        true
    }

    /// Unlinks `id`. Returns `false` if it is not linked.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let Some(i) = self.index.remove(&id) else {
            return false;
        };
        self.unlink(i);
        self.slots[i] = None;
        self.free.push(i);
        true
    }

    /// Unlinks and returns the head (least recently queued) identity.
    pub fn pop_front(&mut self) -> Option<ObjectId> {
        let i = self.head?;
        let id = self.slot(i).id;
        self.unlink(i);
        self.slots[i] = None;
        self.free.push(i);
        self.index.remove(&id);
        Some(id)
    }

    /// Head identity without unlinking it.
    #[must_use]
    pub fn front(&self) -> Option<ObjectId> {
        self.head.map(|i| self.slot(i).id)
    }

    /// Unlinks everything.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.index.clear();
    }

    /// Detaches slot `i` from its neighbors, fixing head/tail.
    fn unlink(&mut self, i: usize) {
        let (prev, next) = {
            let slot = self.slot(i);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn slot(&self, i: usize) -> &Slot {
        self.slots[i].as_ref().expect("dangling slot index")
    }

    fn slot_mut(&mut self, i: usize) -> &mut Slot {
        self.slots[i].as_mut().expect("dangling slot index")
    }
}
