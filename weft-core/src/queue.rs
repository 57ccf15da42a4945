//! Weak Listener Queue
//!
//! Weak-listener notification is reentrant by nature: a listener that writes
//! another cell triggers that cell's own weak-listener run. Doing this
//! recursively would grow the call stack without bound and make the order of
//! interleaved runs accidental. The queue flattens the recursion into an
//! explicit, iterative, depth-first work list.
//!
//! # How It Works
//!
//! 1. The update propagator enqueues one work item per changed cell: a
//!    non-owning reference to the cell body whose weak-listener list should
//!    be walked.
//!
//! 2. If a drain is already running on this thread, the item is just pushed;
//!    the active drain picks it up. Items pop LIFO, so work produced by a
//!    listener during the current drain runs before older pending items,
//!    giving depth-first propagation order.
//!
//! 3. If the queue was idle, a sentinel is pushed below the item and the
//!    drain loop runs until only the sentinel remains. The non-empty queue is
//!    what signals "drain in progress" to nested enqueues.
//!
//! A cell that no longer exists when its item pops is discarded: its listener
//! list died with it.

use std::cell::RefCell;
use std::rc::Weak;

use smallvec::SmallVec;
use tracing::debug;

/// Type-erased access to a cell body's weak-listener walk.
///
/// Implemented once per value type by the cell body; the queue machinery
/// itself is value-type-agnostic. The walk contract (upgrade, invoke,
/// re-check, prune) is documented on the implementation.
pub(crate) trait NotifyWeak {
    fn run_weak_listeners(&self);
}

/// One slot in the per-thread work list.
enum Slot {
    /// Bottom-of-queue marker for the active drain.
    Sentinel,
    /// A cell body whose weak-listener list is pending.
    Work(Weak<dyn NotifyWeak>),
}

thread_local! {
    static QUEUE: RefCell<SmallVec<[Slot; 8]>> = RefCell::new(SmallVec::new());
}

/// Queue a cell body's weak-listener list for processing. Starts a drain if
/// none is running on this thread; otherwise the active drain will pick the
/// item up in LIFO order.
pub(crate) fn enqueue(item: Weak<dyn NotifyWeak>) {
    let start_drain = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if queue.is_empty() {
            queue.push(Slot::Sentinel);
            queue.push(Slot::Work(item));
            true
        } else {
            queue.push(Slot::Work(item));
            false
        }
    });

    if start_drain {
        drain();
    }
}

/// Reset guard: leaves the queue empty no matter how the drain exits.
///
/// On the normal path only the sentinel remains to clear. If a listener
/// panics mid-drain, the remaining work is abandoned with the unwind; without
/// the reset, the thread-local would be stuck in the "drain in progress"
/// state and every later notification would queue forever, never running.
struct ResetOnExit;

impl Drop for ResetOnExit {
    fn drop(&mut self) {
        QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            if queue.len() > 1 {
                debug!(
                    abandoned = queue.len() - 1,
                    "weak-listener drain unwound; dropping pending work"
                );
            }
            queue.clear();
        });
    }
}

/// Run queued work until only the sentinel remains.
fn drain() {
    let _reset = ResetOnExit;

    loop {
        let next = QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            if queue.len() > 1 {
                queue.pop()
            } else {
                None
            }
        });

        match next {
            None => break,
            Some(Slot::Sentinel) => {
                debug_assert!(false, "sentinel above the bottom of the drain queue");
                break;
            }
            Some(Slot::Work(item)) => {
                // Holding the body strong for the whole walk keeps its
                // listener list alive even if unrelated code drops the last
                // external handle mid-walk.
                if let Some(body) = item.upgrade() {
                    body.run_weak_listeners();
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
