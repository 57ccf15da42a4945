//! Dependency Tracker
//!
//! The tracker records which cell evaluation is currently in progress on this
//! thread. This enables automatic dependency wiring: when a cell is read, it
//! can report itself to whichever evaluation is running and receive back the
//! weak recompute-handle reference it should subscribe to.
//!
//! # Implementation
//!
//! We use a thread-local stack of registration frames, one pushed per
//! in-progress expression evaluation, innermost on top. When a cell is read,
//! only the innermost frame is consulted; that gives correct transitive
//! wiring (A depends on B depends on C: a change to C notifies B, which in
//! turn notifies A, with no direct C-to-A edge).
//!
//! The frame is popped by a guard on drop, so the stack discipline survives
//! a panicking expression. A push/pop imbalance would corrupt dependency
//! bookkeeping and is treated as a defect, not a runtime condition.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::cell::CellId;
use crate::listener::WeakListener;

/// A registration frame: given the identity of the cell being read, return
/// `None` when no subscription should be made (the reader *is* the cell
/// currently being evaluated), or the weak recompute-handle reference the
/// reader should subscribe to.
pub(crate) type RegisterFrame = Box<dyn FnMut(CellId) -> Option<WeakListener>>;

thread_local! {
    /// The evaluation stack. Nesting is shallow in practice, so the frames
    /// live inline until an unusually deep derivation chain spills.
    static FRAMES: RefCell<SmallVec<[RegisterFrame; 4]>> = RefCell::new(SmallVec::new());
}

/// Guard that pops the innermost frame when dropped.
///
/// This keeps the stack balanced even if the expression panics.
struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            debug_assert!(
                popped.is_some(),
                "evaluation frame stack underflow: push/pop imbalance"
            );
        });
    }
}

/// Run one expression evaluation with `frame` installed as the innermost
/// registration frame. The frame is removed when the evaluation completes,
/// whether it returns or unwinds.
pub(crate) fn evaluate<R>(frame: RegisterFrame, expression: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(frame));
    let _guard = FrameGuard;
    expression()
}

/// Report a read of the cell `dependency` to the innermost in-progress
/// evaluation, if any.
///
/// Returns the weak recompute-handle reference the reader should subscribe
/// to, or `None` when no evaluation is active or the frame declines
/// (self-read during self-evaluation).
///
/// The frame runs while the stack is borrowed: frames touch only cell
/// bodies, never the tracker itself.
pub(crate) fn register_read(dependency: CellId) -> Option<WeakListener> {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let frame = frames.last_mut()?;
        frame(dependency)
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
