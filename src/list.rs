//! Arena-backed doubly linked list.
//!
//! [`List`] stores its nodes in a generation-checked slab and links them by
//! index, giving O(1) push/pop at both ends and O(1) removal of any node by
//! its [`NodeKey`] without pointer arithmetic or unsafe code. Removed slots
//! go on a free list for reuse; the generation counter makes a stale key
//! miss instead of touching a recycled slot.
//!
//! Values enter and leave by ownership. The deque and the condition
//! variable both keep their queues in a `List`: the deque holds caller
//! values, the condition holds waiter records that must be unlinkable from
//! the middle of the queue when a wait is cancelled.

use core::fmt;

/// Key of a linked node: slab index plus generation for staleness checks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({}:{})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied {
        value: T,
        generation: u32,
        prev: Option<u32>,
        next: Option<u32>,
    },
    Vacant {
        next_free: Option<u32>,
        generation: u32,
    },
}

/// A doubly linked list over a generation-checked slab.
#[derive(Debug)]
pub struct List<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> List<T> {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of linked nodes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no nodes are linked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `value` at the tail. Returns its key.
    pub fn push_back(&mut self, value: T) -> NodeKey {
        let key = self.allocate(value, self.tail, None);
        match self.tail {
            Some(tail) => self.set_next(tail, Some(key.index)),
            None => self.head = Some(key.index),
        }
        self.tail = Some(key.index);
        key
    }

    /// Links `value` at the head. Returns its key.
    pub fn push_front(&mut self, value: T) -> NodeKey {
        let key = self.allocate(value, None, self.head);
        match self.head {
            Some(head) => self.set_prev(head, Some(key.index)),
            None => self.tail = Some(key.index),
        }
        self.head = Some(key.index);
        key
    }

    /// Unlinks and returns the head value.
    pub fn pop_front(&mut self) -> Option<T> {
        let index = self.head?;
        Some(self.unlink(index))
    }

    /// Unlinks and returns the tail value.
    pub fn pop_back(&mut self) -> Option<T> {
        let index = self.tail?;
        Some(self.unlink(index))
    }

    /// Borrows the head value.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.head.map(|index| self.value_at(index))
    }

    /// Borrows the tail value.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.tail.map(|index| self.value_at(index))
    }

    /// Returns true if `key` refers to a currently linked node.
    #[must_use]
    pub fn contains(&self, key: NodeKey) -> bool {
        matches!(
            self.slots.get(key.index as usize),
            Some(Slot::Occupied { generation, .. }) if *generation == key.generation
        )
    }

    /// Unlinks the node at `key` and returns its value.
    ///
    /// Returns `None` for stale or already-removed keys.
    pub fn remove(&mut self, key: NodeKey) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        Some(self.unlink(key.index))
    }

    /// Splices all of `other` onto the tail of `self`, draining it.
    ///
    /// Node keys from `other` do not survive the move.
    pub fn append(&mut self, other: &mut Self) {
        while let Some(value) = other.pop_front() {
            self.push_back(value);
        }
    }

    /// Splices all of `other` in front of `self`'s head, draining it.
    /// `other`'s relative order is preserved.
    pub fn prepend(&mut self, other: &mut Self) {
        while let Some(value) = other.pop_back() {
            self.push_front(value);
        }
    }

    /// Unlinks and drops every node.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    /// Iterates head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn allocate(&mut self, value: T, prev: Option<u32>, next: Option<u32>) -> NodeKey {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant {
                next_free,
                generation,
            } = slot
            else {
                unreachable!("free list pointed to occupied slot");
            };
            let generation = *generation;
            self.free_head = *next_free;
            *slot = Slot::Occupied {
                value,
                generation,
                prev,
                next,
            };
            NodeKey { index, generation }
        } else {
            let index = u32::try_from(self.slots.len()).expect("list slab overflow");
            self.slots.push(Slot::Occupied {
                value,
                generation: 0,
                prev,
                next,
            });
            NodeKey {
                index,
                generation: 0,
            }
        }
    }

    fn unlink(&mut self, index: u32) -> T {
        let slot = &mut self.slots[index as usize];
        let Slot::Occupied {
            generation,
            prev,
            next,
            ..
        } = slot
        else {
            unreachable!("unlink of vacant slot");
        };
        let (generation, prev, next) = (*generation, *prev, *next);
        let vacant = Slot::Vacant {
            next_free: self.free_head,
            generation: generation.wrapping_add(1),
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            unreachable!();
        };
        self.free_head = Some(index);
        match prev {
            Some(prev) => self.set_next(prev, next),
            None => self.head = next,
        }
        match next {
            Some(next) => self.set_prev(next, prev),
            None => self.tail = prev,
        }
        self.len -= 1;
        value
    }

    fn value_at(&self, index: u32) -> &T {
        match &self.slots[index as usize] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!("link pointed to vacant slot"),
        }
    }

    fn set_next(&mut self, index: u32, to: Option<u32>) {
        match &mut self.slots[index as usize] {
            Slot::Occupied { next, .. } => *next = to,
            Slot::Vacant { .. } => unreachable!("link pointed to vacant slot"),
        }
    }

    fn set_prev(&mut self, index: u32, to: Option<u32>) {
        match &mut self.slots[index as usize] {
            Slot::Occupied { prev, .. } => *prev = to,
            Slot::Vacant { .. } => unreachable!("link pointed to vacant slot"),
        }
    }
}

/// Head-to-tail borrowing iterator.
#[derive(Debug)]
pub struct Iter<'a, T> {
    list: &'a List<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let index = self.cursor?;
        match &self.list.slots[index as usize] {
            Slot::Occupied { value, next, .. } => {
                self.cursor = *next;
                Some(value)
            }
            Slot::Vacant { .. } => unreachable!("link pointed to vacant slot"),
        }
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> FromIterator<T> for List<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        for value in iter {
            list.push_back(value);
        }
        list
    }
}
