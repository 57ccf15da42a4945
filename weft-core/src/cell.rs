//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive: a container holding a value
//! that is either set directly or derived from an expression over other
//! cells.
//!
//! # How Cells Work
//!
//! 1. A derived cell evaluates its expression once at construction. While
//!    the expression runs, every cell it reads reports itself to the
//!    dependency tracker and receives back a weak reference to this cell's
//!    recompute handle, which it stores in its weak-listener list.
//!
//! 2. When a cell's value changes, its strong listeners run immediately and
//!    its weak-listener list is handed to the drain queue. A dependent's
//!    recompute handle in that list re-evaluates the dependent, which
//!    re-wires its subscriptions and propagates further if its value
//!    actually changed.
//!
//! 3. A recompute that produces a value equal to the stored one stops there:
//!    no storage mutation, no listener calls, no further propagation.
//!
//! # Ownership
//!
//! Dependents never own the cells they read. A dependency subscription is a
//! `Weak` reference to the reader's recompute handle, and the handle's
//! closure holds only a `Weak` reference back to the reader's body, so two
//! cells that read each other cannot form an `Rc` cycle. The handle is
//! discarded and recreated on every recompute pass; subscriptions pointing
//! at a discarded handle find it expired and self-prune on the next
//! traversal instead of triggering a stale target.
//!
//! # Failure
//!
//! A panicking expression unwinds synchronously to whatever call triggered
//! the evaluation. The previously stored value is retained; the recompute
//! handle has already been cleared, so dependents re-register on their next
//! read rather than observing a stale handle.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::listener::{ListenerList, Token, TokenSlot, WeakListener, WeakListenerList};
use crate::queue::{self, NotifyWeak};
use crate::tracker;

/// Unique identifier for a cell body.
///
/// This is the identity the dependency tracker compares against to prevent
/// a cell from subscribing to itself during its own evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

/// The heap-allocated state of one cell.
struct Body<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Dependency identity.
    id: CellId,

    /// The current value. `None` only while the initial derived evaluation
    /// is in flight; every operation after construction sees `Some`.
    value: Option<T>,

    /// The derivation, present iff the cell is derived. Cleared by a direct
    /// write, which turns the cell independent.
    expression: Option<Rc<dyn Fn() -> T>>,

    /// The recompute handle: a separately reference-counted "re-evaluate
    /// this cell" trigger, created lazily while this cell is being evaluated
    /// and shared weakly with every dependency it reads. At most one exists
    /// at a time.
    handle: Option<Rc<dyn Fn()>>,

    /// Owned callbacks, invoked synchronously on every propagated change.
    listeners: ListenerList,

    /// Non-owning callbacks (user weak listeners and dependents' recompute
    /// handles), processed via the drain queue.
    weak_listeners: WeakListenerList,
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning a `Cell` creates a new handle to the **same** underlying state.
///
/// # Type Parameters
///
/// - `T`: the contained value. `Clone` to hand values out of [`get`](Cell::get),
///   `PartialEq` for the equality short-circuit that stops redundant
///   propagation.
///
/// # Example
///
/// ```
/// use weft_core::Cell;
///
/// let x = Cell::new(5);
/// let xr = x.clone();
/// let y = Cell::derived(move || xr.get() * xr.get());
///
/// assert_eq!(y.get(), 25);
/// x.set(6);
/// assert_eq!(y.get(), 36);
/// ```
pub struct Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    body: Rc<RefCell<Body<T>>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create an independent cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            body: Rc::new(RefCell::new(Body {
                id: CellId::new(),
                value: Some(value),
                expression: None,
                handle: None,
                listeners: ListenerList::new(),
                weak_listeners: WeakListenerList::new(),
            })),
        }
    }

    /// Create a derived cell.
    ///
    /// The expression is evaluated exactly once, synchronously, before this
    /// constructor returns; cells it reads are wired up as dependencies. If
    /// the expression panics, no cell is produced.
    pub fn derived(expression: impl Fn() -> T + 'static) -> Self {
        let expression: Rc<dyn Fn() -> T> = Rc::new(expression);
        let body = Rc::new(RefCell::new(Body {
            id: CellId::new(),
            value: None,
            expression: Some(Rc::clone(&expression)),
            handle: None,
            listeners: ListenerList::new(),
            weak_listeners: WeakListenerList::new(),
        }));

        let initial = eval_expression(&body, &expression);
        body.borrow_mut().value = Some(initial);

        Self { body }
    }

    /// Get this cell's unique ID.
    pub fn id(&self) -> CellId {
        self.body.borrow().id
    }

    /// Get the current value.
    ///
    /// If called while another cell's expression is being evaluated, this
    /// cell becomes a dependency of that evaluation: it subscribes a weak
    /// reference to the evaluating cell's recompute handle. A cell read
    /// during its *own* evaluation makes no subscription and simply returns
    /// the previously stored value.
    pub fn get(&self) -> T {
        let id = self.body.borrow().id;
        if let Some(handle) = tracker::register_read(id) {
            self.body.borrow_mut().weak_listeners.subscribe(handle);
        }
        self.read_value()
    }

    /// Get the current value without registering a dependency.
    ///
    /// Use this inside an expression to read a cell the derivation should
    /// not react to.
    pub fn get_untracked(&self) -> T {
        self.read_value()
    }

    fn read_value(&self) -> T {
        self.body
            .borrow()
            .value
            .clone()
            .expect("cell read during its own initial evaluation")
    }

    /// Set a new value directly.
    ///
    /// A value equal to the current one is a complete no-op: no listener
    /// runs, and a derived cell keeps its expression. An unequal value
    /// replaces storage, clears the expression (the cell becomes
    /// independent), and propagates.
    pub fn set(&self, value: T) {
        if self.body.borrow().value.as_ref() == Some(&value) {
            return;
        }
        {
            let mut body = self.body.borrow_mut();
            body.value = Some(value);
            body.expression = None;
        }
        update_body(&self.body);
    }

    /// Update the value using a function of the current value.
    ///
    /// Equality-gates and propagates exactly like [`set`](Cell::set).
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let value = {
            let body = self.body.borrow();
            f(body
                .value
                .as_ref()
                .expect("cell read during its own initial evaluation"))
        };
        self.set(value);
    }

    /// Replace the derivation and propagate unconditionally.
    ///
    /// The propagator always re-evaluates here, since a new derivation may
    /// or may not agree with the stored value; the equality short-circuit
    /// inside it decides whether listeners run.
    pub fn set_expression(&self, expression: impl Fn() -> T + 'static) {
        self.body.borrow_mut().expression = Some(Rc::new(expression));
        update_body(&self.body);
    }

    /// The current derivation, or `None` for an independent cell.
    pub fn expression(&self) -> Option<Rc<dyn Fn() -> T>> {
        self.body.borrow().expression.clone()
    }

    /// Whether this cell currently has a derivation.
    pub fn is_derived(&self) -> bool {
        self.body.borrow().expression.is_some()
    }

    /// Manually run the update propagator: re-evaluate if derived, then
    /// notify if the value changed (an independent cell notifies
    /// unconditionally).
    pub fn recompute(&self) {
        update_body(&self.body);
    }

    /// Register an owned listener; it runs synchronously on every
    /// propagated change. Newly attached listeners run before older ones.
    pub fn subscribe(&self, listener: impl FnMut() + 'static) -> Token {
        let id = self.body.borrow_mut().listeners.subscribe(Box::new(listener));
        Token::strong(id)
    }

    /// Register a non-owning listener.
    ///
    /// The caller keeps the [`SharedListener`](crate::SharedListener) alive;
    /// once it is dropped, the entry is pruned on the next traversal without
    /// ever being invoked again.
    pub fn subscribe_weak(&self, listener: WeakListener) -> Token {
        let id = self.body.borrow_mut().weak_listeners.subscribe(listener);
        Token::weak(id)
    }

    /// Revoke a subscription. Consumes the token; the type system prevents
    /// revoking twice.
    pub fn unsubscribe(&self, token: Token) {
        let removed = match token.slot {
            TokenSlot::Strong(id) => self.body.borrow_mut().listeners.remove(id),
            TokenSlot::Weak(id) => self.body.borrow_mut().weak_listeners.remove(id),
        };
        debug_assert!(removed, "unsubscribe with a token this cell never issued");
    }

    /// Number of strong listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.body.borrow().listeners.len()
    }

    /// Number of weak-listener entries currently registered, including
    /// entries whose owner has expired but which have not been traversed
    /// (and therefore pruned) yet.
    pub fn weak_listener_count(&self) -> usize {
        self.body.borrow().weak_listeners.len()
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            body: Rc::clone(&self.body),
        }
    }
}

impl<T> From<T> for Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = self.body.borrow();
        f.debug_struct("Cell")
            .field("id", &body.id)
            .field("value", &body.value)
            .field("derived", &body.expression.is_some())
            .field("listeners", &body.listeners.len())
            .field("weak_listeners", &body.weak_listeners.len())
            .finish()
    }
}

/// Evaluate `expression` with a registration frame for `body` installed.
///
/// The frame implements the dependency-wiring contract: a read of `body`
/// itself gets no subscription; any other read lazily creates `body`'s
/// recompute handle and receives a weak reference to it. The handle's
/// closure captures the body weakly, so it never extends the body's
/// lifetime.
fn eval_expression<T>(body: &Rc<RefCell<Body<T>>>, expression: &Rc<dyn Fn() -> T>) -> T
where
    T: Clone + PartialEq + 'static,
{
    let self_id = body.borrow().id;
    let weak_body = Rc::downgrade(body);

    let frame: tracker::RegisterFrame = Box::new(move |dependency: CellId| {
        if dependency == self_id {
            return None;
        }
        let body = weak_body.upgrade()?;
        let mut body = body.borrow_mut();
        if body.handle.is_none() {
            let trigger = weak_body.clone();
            body.handle = Some(Rc::new(move || {
                if let Some(body) = trigger.upgrade() {
                    update_body(&body);
                }
            }));
        }
        body.handle.as_ref().map(Rc::downgrade)
    });

    tracker::evaluate(frame, || (**expression)())
}

/// The update propagator.
///
/// Discards the recompute handle (orphaning subscriptions to the old one),
/// re-evaluates if derived, stops on an equal result, and otherwise stores
/// the value, runs the strong listeners front to back, and queues the
/// weak-listener list for draining.
fn update_body<T>(body: &Rc<RefCell<Body<T>>>)
where
    T: Clone + PartialEq + 'static,
{
    body.borrow_mut().handle = None;

    let expression = body.borrow().expression.clone();
    if let Some(expression) = expression {
        let value = eval_expression(body, &expression);
        let mut b = body.borrow_mut();
        if b.value.as_ref() == Some(&value) {
            trace!(cell = ?b.id, "recompute produced an equal value; stopping");
            return;
        }
        b.value = Some(value);
    }

    notify_strong(body);
    let erased: Rc<dyn queue::NotifyWeak> = body.clone();
    queue::enqueue(Rc::downgrade(&erased));
}

/// Invoke the strong listeners front to back (most recently subscribed
/// first).
///
/// No borrow of the body is held while a callback runs, so a listener may
/// subscribe, revoke (itself included), read, and write cells. A callback is
/// not itself reentrant: a write that would re-invoke the currently running
/// listener panics instead of recursing. Membership is re-checked right
/// before each call: an entry revoked earlier in the same pass is skipped.
fn notify_strong<T>(body: &Rc<RefCell<Body<T>>>)
where
    T: Clone + PartialEq + 'static,
{
    let snapshot = body.borrow().listeners.snapshot();
    for (id, callback) in snapshot {
        if !body.borrow().listeners.contains(id) {
            continue;
        }
        let mut callback = callback.borrow_mut();
        (*callback)();
    }
}

impl<T> NotifyWeak for RefCell<Body<T>>
where
    T: Clone + PartialEq + 'static,
{
    /// Walk the weak-listener list front to back.
    ///
    /// Expired entries are pruned without being invoked. Live entries are
    /// invoked and then immediately re-checked: a callback whose owner went
    /// away during its own invocation (reentrant unsubscription, or a
    /// recompute that replaced the handle) is pruned before moving on.
    /// Entries subscribed during the walk wait for the next notification.
    fn run_weak_listeners(&self) {
        let snapshot = self.borrow().weak_listeners.snapshot();
        for (id, weak_callback) in snapshot {
            if !self.borrow().weak_listeners.contains(id) {
                continue;
            }
            let Some(callback) = weak_callback.upgrade() else {
                trace!(listener = ?id, "pruning expired weak listener");
                self.borrow_mut().weak_listeners.remove(id);
                continue;
            };
            (*callback)();
            drop(callback);
            if weak_callback.strong_count() == 0 {
                self.borrow_mut().weak_listeners.remove(id);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
