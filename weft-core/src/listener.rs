//! Listener Registry
//!
//! Each cell keeps two ordered lists of change callbacks:
//!
//! - **Strong listeners** are owned by the cell and invoked synchronously,
//!   directly, on every propagated change.
//!
//! - **Weak listeners** are non-owning references to callbacks owned by
//!   someone else. They are never invoked by the registry itself; the update
//!   propagator hands them to the drain queue, which prunes entries whose
//!   owner has gone away. Dependency subscriptions created during expression
//!   evaluation live in this list, which is what keeps cells from owning
//!   each other.
//!
//! # Ordering
//!
//! Subscription inserts at the *front* of a list, so on the next
//! notification, newly attached listeners run before older ones. This
//! most-recent-first order is part of the public contract and is covered by
//! tests; do not "fix" it to insertion order.
//!
//! # Revocation
//!
//! Subscribing returns a [`Token`] tagging the list and the entry. Tokens are
//! deliberately neither `Clone` nor `Copy` and are consumed by value on
//! revocation, so a double revoke is unrepresentable.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// An owned notification callback, invoked on every propagated change.
pub type Listener = Box<dyn FnMut()>;

/// A shareable callback. Weak listeners point at one of these; the owner
/// keeps it alive for as long as notifications should be delivered.
pub type SharedListener = Rc<dyn Fn()>;

/// A non-owning reference to a [`SharedListener`].
pub type WeakListener = Weak<dyn Fn()>;

/// Wrap a closure into a [`SharedListener`] suitable for weak subscription.
pub fn shared_listener(listener: impl Fn() + 'static) -> SharedListener {
    Rc::new(listener)
}

/// Unique identifier for one listener-list entry.
///
/// Uses an atomic counter to ensure uniqueness across all lists and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which list a [`Token`] refers to.
#[derive(Debug)]
pub(crate) enum TokenSlot {
    Strong(ListenerId),
    Weak(ListenerId),
}

/// Revocation handle for one subscription.
///
/// Returned by `Cell::subscribe` / `Cell::subscribe_weak`; consumed by
/// `Cell::unsubscribe`. Move-only: revocation is single-owner and single-use.
#[derive(Debug)]
pub struct Token {
    pub(crate) slot: TokenSlot,
}

impl Token {
    pub(crate) fn strong(id: ListenerId) -> Self {
        Self {
            slot: TokenSlot::Strong(id),
        }
    }

    pub(crate) fn weak(id: ListenerId) -> Self {
        Self {
            slot: TokenSlot::Weak(id),
        }
    }
}

/// One entry in the strong list.
///
/// The callback sits behind `Rc<RefCell<..>>` so that a notification pass can
/// hold it alive and invoke it without keeping any borrow of the owning cell
/// body, leaving reentrant subscribe/revoke/write from inside the callback
/// well-defined.
struct StrongEntry {
    id: ListenerId,
    callback: Rc<RefCell<Listener>>,
}

/// Ordered list of owned callbacks. Front = most recently subscribed.
pub(crate) struct ListenerList {
    entries: VecDeque<StrongEntry>,
}

impl ListenerList {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert at the front; returns the entry's id.
    pub(crate) fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.entries.push_front(StrongEntry {
            id,
            callback: Rc::new(RefCell::new(listener)),
        });
        id
    }

    /// Erase the entry with the given id. Returns whether it was present.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Front-to-back snapshot of the current entries.
    ///
    /// The notification pass iterates the snapshot so that no borrow of the
    /// cell body is held while a callback runs; it re-checks membership via
    /// [`contains`](Self::contains) right before each call, so an entry
    /// revoked earlier in the same pass is skipped.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, Rc<RefCell<Listener>>)> {
        self.entries
            .iter()
            .map(|entry| (entry.id, Rc::clone(&entry.callback)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One entry in the weak list.
struct WeakEntry {
    id: ListenerId,
    callback: WeakListener,
}

/// Ordered list of non-owning callback references. Front = most recent.
pub(crate) struct WeakListenerList {
    entries: VecDeque<WeakEntry>,
}

impl WeakListenerList {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert at the front; returns the entry's id.
    pub(crate) fn subscribe(&mut self, listener: WeakListener) -> ListenerId {
        let id = ListenerId::new();
        self.entries.push_front(WeakEntry {
            id,
            callback: listener,
        });
        id
    }

    /// Erase the entry with the given id. Returns whether it was present.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Front-to-back snapshot of `(id, weak callback)` pairs.
    ///
    /// Entries subscribed after the snapshot is taken (for example by a
    /// callback invoked during the walk) are not part of this pass.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, WeakListener)> {
        self.entries
            .iter()
            .map(|entry| (entry.id, entry.callback.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        let id3 = ListenerId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn strong_list_inserts_at_front() {
        let mut list = ListenerList::new();
        let first = list.subscribe(Box::new(|| {}));
        let second = list.subscribe(Box::new(|| {}));

        let order: Vec<ListenerId> = list.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![second, first]);
    }

    #[test]
    fn strong_list_remove() {
        let mut list = ListenerList::new();
        let id = list.subscribe(Box::new(|| {}));

        assert!(list.contains(id));
        assert!(list.remove(id));
        assert!(!list.contains(id));
        assert_eq!(list.len(), 0);

        // A second removal finds nothing.
        assert!(!list.remove(id));
    }

    #[test]
    fn weak_list_inserts_at_front() {
        let mut list = WeakListenerList::new();
        let owner1 = shared_listener(|| {});
        let owner2 = shared_listener(|| {});

        let first = list.subscribe(Rc::downgrade(&owner1));
        let second = list.subscribe(Rc::downgrade(&owner2));

        let order: Vec<ListenerId> = list.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![second, first]);
    }

    #[test]
    fn weak_list_entry_expires_with_owner() {
        let mut list = WeakListenerList::new();
        let owner = shared_listener(|| {});
        let id = list.subscribe(Rc::downgrade(&owner));

        // Entry upgrades while the owner lives.
        let (entry_id, weak) = list.snapshot().pop().expect("one entry");
        assert_eq!(entry_id, id);
        assert!(weak.upgrade().is_some());

        drop(owner);
        assert!(weak.upgrade().is_none());
    }
}
