//! Integration Tests for the Reactive Cell Engine
//!
//! These tests exercise whole graphs: transitive propagation, listener
//! lifetime across updates, reentrant mutation during notification, and the
//! depth-first drain order of cascading weak-listener runs.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use weft_core::{shared_listener, Cell, Token};

/// The canonical driver scenario: `x = 5`, `y = x * x`, stepping x while
/// recording `(x, y)` pairs.
#[test]
fn square_cell_follows_its_input() {
    let x = Cell::new(5);
    let xr = x.clone();
    let y = Cell::derived(move || xr.get() * xr.get());

    let mut pairs = Vec::new();
    while x.get() < 10 {
        pairs.push((x.get(), y.get()));
        x.update(|v| v + 1);
    }

    assert_eq!(pairs, vec![(5, 25), (6, 36), (7, 49), (8, 64), (9, 81)]);
}

/// A three-cell chain re-wires itself on every recompute and stays current.
#[test]
fn transitive_chain_propagates() {
    let a = Cell::new(1);
    let ar = a.clone();
    let b = Cell::derived(move || ar.get() + 1);
    let br = b.clone();
    let c = Cell::derived(move || br.get() * 10);

    assert_eq!(c.get(), 20);

    a.set(4);
    assert_eq!(b.get(), 5);
    assert_eq!(c.get(), 50);

    a.set(9);
    assert_eq!(c.get(), 100);
}

/// A weak listener whose owner is gone is never invoked and its entry is
/// pruned by the traversal.
#[test]
fn expired_weak_listener_is_pruned() {
    let cell = Cell::new(0);
    let count = Rc::new(RefCell::new(0));

    let c = Rc::clone(&count);
    let owner = shared_listener(move || *c.borrow_mut() += 1);
    let _token = cell.subscribe_weak(Rc::downgrade(&owner));

    cell.set(1);
    assert_eq!(*count.borrow(), 1);

    drop(owner);
    cell.set(2);
    assert_eq!(*count.borrow(), 1);
    assert_eq!(cell.weak_listener_count(), 0);
}

/// A weak listener that revokes its own token mid-drain is not invoked
/// again and does not break the walk.
#[test]
fn weak_listener_revoking_itself_mid_drain() {
    let cell = Cell::new(0);
    let count = Rc::new(RefCell::new(0));
    let token_slot: Rc<RefCell<Option<Token>>> = Rc::new(RefCell::new(None));

    let c = Rc::clone(&count);
    let slot = Rc::clone(&token_slot);
    let cell_handle = cell.clone();
    let owner = shared_listener(move || {
        *c.borrow_mut() += 1;
        if let Some(token) = slot.borrow_mut().take() {
            cell_handle.unsubscribe(token);
        }
    });
    *token_slot.borrow_mut() = Some(cell.subscribe_weak(Rc::downgrade(&owner)));

    cell.set(1);
    assert_eq!(*count.borrow(), 1);
    assert_eq!(cell.weak_listener_count(), 0);

    cell.set(2);
    assert_eq!(*count.borrow(), 1);
}

/// Dropping the last handle to a derived cell leaves only an expired entry
/// in its dependency, which the next update prunes without invoking.
#[test]
fn dropped_dependent_is_pruned_from_its_dependency() {
    let x = Cell::new(1);

    {
        let xr = x.clone();
        let y = Cell::derived(move || xr.get() + 1);
        assert_eq!(y.get(), 2);
        assert_eq!(x.weak_listener_count(), 1);
    }

    // y is gone; the subscription expires and the next write cleans it up.
    x.set(5);
    assert_eq!(x.weak_listener_count(), 0);
}

/// A derivation that switches inputs stops reacting to the input it no
/// longer reads: the stale subscription expires with the old recompute
/// handle and is pruned on that input's next update.
#[test]
fn rewired_derivation_drops_the_old_input() {
    let flag = Cell::new(true);
    let a = Cell::new(1);
    let b = Cell::new(2);

    let (f, ar, br) = (flag.clone(), a.clone(), b.clone());
    let y = Cell::derived(move || if f.get() { ar.get() } else { br.get() });
    assert_eq!(y.get(), 1);

    flag.set(false);
    assert_eq!(y.get(), 2);

    // a no longer drives y; its stale entry is pruned by this write.
    a.set(100);
    assert_eq!(y.get(), 2);
    assert_eq!(a.weak_listener_count(), 0);

    b.set(7);
    assert_eq!(y.get(), 7);
}

/// Cascading weak-listener runs drain depth-first: work queued during the
/// current drain pops before older pending items.
#[test]
fn cascade_drains_depth_first() {
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let a = Cell::new(1);
    let ar = a.clone();
    let d1 = Cell::derived(move || ar.get() + 1);
    let ar = a.clone();
    let d2 = Cell::derived(move || ar.get() * 2);
    let dr = d1.clone();
    let e1 = Cell::derived(move || dr.get() * 10);
    let dr = d2.clone();
    let e2 = Cell::derived(move || dr.get() * 10);

    for (cell, name) in [(&a, "a"), (&d1, "d1"), (&d2, "d2"), (&e1, "e1"), (&e2, "e2")] {
        let l = Rc::clone(&log);
        let _ = cell.subscribe(move || l.borrow_mut().push(name));
    }

    a.set(10);

    // a's strong listener fires before any weak work. d2 subscribed to a
    // after d1, so it is walked first; d1's cascade (e1) was queued last and
    // therefore drains before d2's (e2).
    assert_eq!(*log.borrow(), vec!["a", "d2", "d1", "e1", "e2"]);

    assert_eq!(e1.get(), 110);
    assert_eq!(e2.get(), 200);
}

/// A panicking re-evaluation unwinds to the caller of the triggering write;
/// the dependent keeps its previous value and recovers on the next update.
#[test]
fn panicking_expression_unwinds_and_recovers() {
    let x = Cell::new(1);
    let xr = x.clone();
    let y = Cell::derived(move || {
        let v = xr.get();
        assert!(v != 13, "unlucky input");
        v * 2
    });
    assert_eq!(y.get(), 2);

    let result = catch_unwind(AssertUnwindSafe(|| x.set(13)));
    assert!(result.is_err());

    // The write itself landed before notification started.
    assert_eq!(x.get_untracked(), 13);
    assert_eq!(y.get_untracked(), 2);

    // The graph is still live: the failed recompute re-subscribed before it
    // panicked, so the next write goes through.
    x.set(5);
    assert_eq!(y.get(), 10);
}

/// Strong listeners run synchronously within the write call, before it
/// returns, and see the already-updated value.
#[test]
fn strong_listeners_observe_the_new_value() {
    let cell = Cell::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let s = Rc::clone(&seen);
    let reader = cell.clone();
    let _token = cell.subscribe(move || s.borrow_mut().push(reader.get_untracked()));

    cell.set(3);
    cell.set(8);
    assert_eq!(*seen.borrow(), vec![3, 8]);
}

/// Writing a cell from inside a listener cascades within the same outer
/// write call.
#[test]
fn listener_driven_write_cascades_synchronously() {
    let source = Cell::new(0);
    let mirror = Cell::new(0);

    let (src, dst) = (source.clone(), mirror.clone());
    let _token = source.subscribe(move || dst.set(src.get_untracked()));

    source.set(42);
    assert_eq!(mirror.get(), 42);
}
