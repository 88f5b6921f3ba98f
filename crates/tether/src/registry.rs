#![forbid(unsafe_code)]

//! Owner-keyed callback registry with weak owner retention.
//!
//! # Design
//!
//! A [`Registry<T>`] maps an *owner* (any reference-counted allocation) to the
//! callbacks registered under it. The owner is held as a `Weak<dyn Any>`, so
//! registering never extends its lifetime: once the last strong reference to
//! the owner is dropped, its entry is treated as absent and purged lazily on
//! the next `bind`, `unbind`, or `notify`.
//!
//! Entries are keyed by the owner's allocation address. The stored `Weak`
//! keeps that allocation reserved, so an address cannot be handed to a new
//! owner while an entry for it still exists.
//!
//! # Invariants
//!
//! 1. Callbacks within one entry fire in registration order, regardless of
//!    their shape.
//! 2. Entries fire in the order their owners were first bound.
//! 3. A released owner never receives another callback after `notify` starts
//!    a new pass.
//! 4. `unbind` returns `true` only if a live entry was removed.
//!
//! # Failure Modes
//!
//! - **Re-entrant bind/unbind**: a callback may bind or unbind on the registry
//!   that is currently notifying. `notify` works on a snapshot taken before the
//!   first callback runs, so such changes apply from the next pass.
//! - **Re-entrant change**: a container whose value changes again from inside
//!   a callback abandons the outer pass; the inner pass has already delivered
//!   the newer value to every live entry.
//! - **Owner captured by its own callback**: a callback holding a strong
//!   reference to its owner keeps the owner alive for as long as the entry
//!   exists. Capture a `Weak` instead.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

/// Non-owning reference to a subscriber, used as a registry key.
#[derive(Clone)]
pub struct OwnerRef {
    key: usize,
    weak: Weak<dyn Any>,
}

impl OwnerRef {
    /// Build a key for `owner` without taking ownership.
    pub fn new<S: Any>(owner: &Rc<S>) -> Self {
        let weak: Weak<dyn Any> = Rc::downgrade(owner) as Weak<dyn Any>;
        Self {
            key: Rc::as_ptr(owner) as *const () as usize,
            weak,
        }
    }

    /// Whether the owner still has strong references.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }
}

impl std::fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerRef")
            .field("key", &format_args!("{:#x}", self.key))
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Anything that can act as a subscriber identity.
///
/// Implemented for `Rc<S>`, for every container handle in this crate, and for
/// [`Subscription`] tokens.
pub trait Owner {
    /// The weak registry key for this owner.
    fn owner_ref(&self) -> OwnerRef;
}

impl<S: Any> Owner for Rc<S> {
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self)
    }
}

/// The three callback shapes a registry entry can hold.
enum Callback<T> {
    New(Rc<dyn Fn(&T)>),
    Old(Rc<dyn Fn(&T)>),
    Change(Rc<dyn Fn(&T, &T)>),
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        match self {
            Self::New(cb) => Self::New(Rc::clone(cb)),
            Self::Old(cb) => Self::Old(Rc::clone(cb)),
            Self::Change(cb) => Self::Change(Rc::clone(cb)),
        }
    }
}

impl<T> Callback<T> {
    fn dispatch(&self, change: &Change<'_, T>) {
        match (self, change) {
            (Self::New(cb), Change::New(new)) => cb(new),
            (Self::Old(cb), Change::Old(old)) => cb(old),
            (Self::New(cb), Change::Both { new, .. }) => cb(new),
            (Self::Old(cb), Change::Both { old, .. }) => cb(old),
            (Self::Change(cb), Change::Both { old, new }) => cb(old, new),
            _ => {}
        }
    }
}

/// A change delivered through [`Registry::notify`].
///
/// Each variant reaches only the callbacks whose shape it can satisfy:
/// `New` reaches new-value callbacks, `Old` reaches old-value callbacks, and
/// `Both` reaches every shape.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a, T> {
    New(&'a T),
    Old(&'a T),
    Both { old: &'a T, new: &'a T },
}

struct Entry<T> {
    owner: OwnerRef,
    callbacks: Vec<Callback<T>>,
}

/// Owner → callbacks map with weak owner retention.
///
/// Single-threaded by construction (`Rc`/`RefCell`); notification runs
/// synchronously on the caller's thread.
pub struct Registry<T> {
    entries: RefCell<Vec<Entry<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.borrow();
        f.debug_struct("Registry")
            .field("entries", &entries.len())
            .field(
                "callbacks",
                &entries.iter().map(|e| e.callbacks.len()).sum::<usize>(),
            )
            .finish()
    }
}

impl<T: 'static> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new-value callback under `owner`.
    ///
    /// Repeated calls with the same owner accumulate callbacks.
    pub fn bind(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        self.push(owner.owner_ref(), Callback::New(Rc::new(callback)));
        self
    }

    /// Register an old-value callback under `owner`.
    pub fn bind_old(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        self.push(owner.owner_ref(), Callback::Old(Rc::new(callback)));
        self
    }

    /// Register an `(old, new)` callback under `owner`.
    pub fn bind_change(&self, owner: &impl Owner, callback: impl Fn(&T, &T) + 'static) -> &Self {
        self.push(owner.owner_ref(), Callback::Change(Rc::new(callback)));
        self
    }

    /// Remove every callback registered under `owner`.
    ///
    /// Returns whether a live entry existed.
    pub fn unbind(&self, owner: &impl Owner) -> bool {
        self.unbind_key(owner.owner_ref().key())
    }

    /// Whether `owner` currently has a live entry.
    #[must_use]
    pub fn contains(&self, owner: &impl Owner) -> bool {
        let key = owner.owner_ref().key();
        self.entries
            .borrow()
            .iter()
            .any(|e| e.owner.key() == key && e.owner.is_alive())
    }

    /// Number of entries whose owner is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.owner.is_alive())
            .count()
    }

    /// Whether no live entry remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `change` to every live entry.
    ///
    /// The live entries are snapshotted first; the registry is not borrowed
    /// while callbacks run.
    pub fn notify(&self, change: Change<'_, T>) {
        self.notify_while(change, || true);
    }

    /// Like [`notify`](Registry::notify), but stops the pass as soon as
    /// `current()` returns false.
    pub(crate) fn notify_while(&self, change: Change<'_, T>, current: impl Fn() -> bool) {
        let snapshot: Vec<(Weak<dyn Any>, Vec<Callback<T>>)> = {
            let mut entries = self.entries.borrow_mut();
            purge(&mut entries);
            entries
                .iter()
                .map(|e| (e.owner.weak.clone(), e.callbacks.clone()))
                .collect()
        };
        trace!(entries = snapshot.len(), "notifying bindings");

        for (owner, callbacks) in &snapshot {
            for callback in callbacks {
                // The owner may be released by an earlier callback in this pass.
                if owner.strong_count() == 0 {
                    break;
                }
                if !current() {
                    trace!("notification superseded by a newer change");
                    return;
                }
                callback.dispatch(&change);
            }
        }
    }

    pub(crate) fn unbind_key(&self, key: usize) -> bool {
        let mut entries = self.entries.borrow_mut();
        purge(&mut entries);
        match entries.iter().position(|e| e.owner.key() == key) {
            Some(index) => {
                entries.remove(index);
                trace!(remaining = entries.len(), "unbound owner");
                true
            }
            None => false,
        }
    }

    fn push(&self, owner: OwnerRef, callback: Callback<T>) {
        let mut entries = self.entries.borrow_mut();
        purge(&mut entries);
        match entries.iter_mut().find(|e| e.owner.key() == owner.key()) {
            Some(entry) => entry.callbacks.push(callback),
            None => entries.push(Entry {
                owner,
                callbacks: vec![callback],
            }),
        }
    }
}

/// Drop entries whose owner has been released.
fn purge<T>(entries: &mut Vec<Entry<T>>) {
    let before = entries.len();
    entries.retain(|e| e.owner.is_alive());
    let purged = before - entries.len();
    if purged > 0 {
        debug!(
            purged,
            remaining = entries.len(),
            "purged bindings of released owners"
        );
    }
}

/// Identity token for callback-only subscriptions.
struct SubscriptionToken;

/// RAII subscription handle.
///
/// A `Subscription` is an owner whose only purpose is to be dropped: while it
/// lives, the callbacks bound under it fire; once dropped, its entry becomes
/// unreachable and is purged on the next notification cycle.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    token: Rc<SubscriptionToken>,
}

impl Subscription {
    pub(crate) fn new() -> Self {
        Self {
            token: Rc::new(SubscriptionToken),
        }
    }

    /// Drop the subscription explicitly.
    pub fn unsubscribe(self) {}
}

impl Owner for Subscription {
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(&self.token)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
