#![forbid(unsafe_code)]

//! Observable value container with change detection and owner-keyed bindings.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage. Assigning a new value runs the container's equality function; if
//! the values differ (or no equality was supplied), every live binding is
//! notified with the old and new value.
//!
//! Bindings are keyed by an owner and held weakly (see [`Registry`]). A
//! binding disappears on its own when its owner is dropped.
//!
//! # Performance
//!
//! | Operation     | Complexity                  |
//! |---------------|-----------------------------|
//! | `get()`       | O(1) + clone                |
//! | `set()`       | O(B) where B = bound owners |
//! | `bind()`      | O(B) (purge + key lookup)   |
//! | `observe()`   | `bind()` + one callback     |
//!
//! # Failure Modes
//!
//! - **Re-entrant update**: the closure passed to [`Observable::update`] runs
//!   while the value is mutably borrowed; reading the same observable from it
//!   panics. Callbacks run with no borrow held, so `set()` from a callback is
//!   allowed.
//! - **Assignment from a callback**: the nested assignment notifies every
//!   binding with the newer value first. The outer notification then stops,
//!   so no binding receives the superseded value after the newer one.
//! - **Equal assignment**: storing a value equal to the current one replaces
//!   it silently (no version bump, no notification).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};
use crate::registry::{Change, Owner, OwnerRef, Registry, Subscription};

/// Equality function deciding whether an assignment is a change.
pub(crate) type Equality<T> = Option<Rc<dyn Fn(&T, &T) -> bool>>;

/// Shared interior for [`Observable<T>`].
pub(crate) struct ObservableInner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    equality: Equality<T>,
    registry: Registry<T>,
    /// Strong handles to the sources a derived container reads from.
    upstream: RefCell<Vec<Rc<dyn Any>>>,
}

/// A shared value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** container.
/// Two handles compare equal only if they point at the same container; equal
/// values in distinct containers do not make the containers equal.
///
/// # Invariants
///
/// 1. Bindings fire iff `equality(old, new)` is false (always, without an
///    equality function).
/// 2. `version` increments by exactly 1 per notifying assignment.
/// 3. `observe` delivers the current value before returning.
pub struct Observable<T> {
    inner: Rc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Observable<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Observable<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable that deduplicates assignments with `PartialEq`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_parts(value, Some(Rc::new(|a: &T, b: &T| a == b)))
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Create an observable with a custom equality function.
    #[must_use]
    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::from_parts(value, Some(Rc::new(equals)))
    }

    /// Create an observable without equality: every assignment notifies.
    #[must_use]
    pub fn always_notify(value: T) -> Self {
        Self::from_parts(value, None)
    }

    pub(crate) fn from_parts(value: T, equality: Equality<T>) -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                value: RefCell::new(value),
                version: Cell::new(0),
                equality,
                registry: Registry::new(),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Assign a new value, notifying bindings if it is a change.
    pub fn set(&self, value: T) {
        let (old, ()) = self.mutate_quietly(|current| *current = value);
        self.publish_from(old);
    }

    /// Modify the value in place, notifying bindings if it changed.
    ///
    /// # Panics
    ///
    /// Panics if `f` accesses this observable.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let (old, ()) = self.mutate_quietly(f);
        self.publish_from(old);
    }

    /// Number of notifying assignments so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Number of live owners bound to this observable.
    ///
    /// A binding owned by the observable itself is internal bookkeeping and
    /// is not counted.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        let registry = &self.inner.registry;
        registry.len() - usize::from(registry.contains(self))
    }

    /// Register a new-value callback under `owner`.
    pub fn bind(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        self.inner.registry.bind(owner, callback);
        self
    }

    /// Register a callback receiving the value being replaced.
    pub fn bind_old(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        self.inner.registry.bind_old(owner, callback);
        self
    }

    /// Register a callback receiving `(old, new)`.
    pub fn bind_change(&self, owner: &impl Owner, callback: impl Fn(&T, &T) + 'static) -> &Self {
        self.inner.registry.bind_change(owner, callback);
        self
    }

    /// Remove every binding of `owner`. Returns whether one existed.
    pub fn unbind(&self, owner: &impl Owner) -> bool {
        self.inner.registry.unbind(owner)
    }

    /// Deliver the current value to `callback` now, then bind it.
    pub fn observe(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        callback(&self.get());
        self.bind(owner, callback)
    }

    /// Deliver `(current, current)` to `callback` now, then bind it.
    pub fn observe_change(
        &self,
        owner: &impl Owner,
        callback: impl Fn(&T, &T) + 'static,
    ) -> &Self {
        let current = self.get();
        callback(&current, &current);
        self.bind_change(owner, callback)
    }

    /// Bind `callback` under a fresh token and return the token.
    ///
    /// The binding lives exactly as long as the returned [`Subscription`].
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let subscription = Subscription::new();
        self.bind(&subscription, callback);
        subscription
    }

    /// Call `callback` once, with the first value (current or future) that
    /// satisfies `predicate`, then remove the binding.
    ///
    /// Dropping the returned token before a match cancels the observation.
    pub fn observe_single_event(
        &self,
        predicate: impl Fn(&T) -> bool + 'static,
        callback: impl FnOnce(&T) + 'static,
    ) -> Subscription {
        let subscription = Subscription::new();
        let current = self.get();
        if predicate(&current) {
            callback(&current);
            return subscription;
        }

        let slot: RefCell<Option<Box<dyn FnOnce(&T)>>> = RefCell::new(Some(Box::new(callback)));
        let key = subscription.owner_ref().key();
        let this = Rc::downgrade(&self.inner);
        self.bind(&subscription, move |value| {
            if !predicate(value) {
                return;
            }
            let taken = slot.borrow_mut().take();
            if let Some(callback) = taken {
                if let Some(inner) = this.upgrade() {
                    inner.registry.unbind_key(key);
                }
                callback(value);
            }
        });
        subscription
    }

    /// Type-erase this handle.
    #[must_use]
    pub fn erase(&self) -> AnyObservable {
        AnyObservable {
            handle: Rc::clone(&self.inner) as Rc<dyn Any>,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn equality(&self) -> Equality<T> {
        self.inner.equality.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Strong handle to keep this container alive from a derived one.
    pub(crate) fn handle(&self) -> Rc<dyn Any> {
        Rc::clone(&self.inner) as Rc<dyn Any>
    }

    pub(crate) fn retain_upstream(&self, handle: Rc<dyn Any>) {
        self.inner.upstream.borrow_mut().push(handle);
    }

    /// Mutate the stored value without notifying. Returns the prior value.
    pub(crate) fn mutate_quietly<R>(&self, f: impl FnOnce(&mut T) -> R) -> (T, R) {
        let old = self.get();
        let mut value = self.inner.value.borrow_mut();
        let result = f(&mut *value);
        (old, result)
    }

    /// Notify bindings if the current value differs from `old`.
    pub(crate) fn publish_from(&self, old: T) {
        let new = self.get();
        let changed = match &self.inner.equality {
            Some(equals) => !equals(&old, &new),
            None => true,
        };
        if !changed {
            return;
        }
        let version = self.inner.version.get() + 1;
        self.inner.version.set(version);
        let inner = &self.inner;
        inner.registry.notify_while(
            Change::Both {
                old: &old,
                new: &new,
            },
            || inner.version.get() == version,
        );
    }
}

impl<T: 'static> Owner for Observable<T> {
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(&self.inner)
    }
}

/// Non-owning handle used by derived containers and scheduled tasks.
pub(crate) struct WeakObservable<T> {
    inner: Weak<ObservableInner<T>>,
}

impl<T> Clone for WeakObservable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakObservable<T> {
    pub(crate) fn upgrade(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }
}

/// Type-erased observable handle.
///
/// Useful for holding containers of different value types together. The value
/// type is recovered with [`downcast`](AnyObservable::downcast); asking for the
/// wrong type is a configuration error.
#[derive(Clone)]
pub struct AnyObservable {
    handle: Rc<dyn Any>,
    type_name: &'static str,
}

impl AnyObservable {
    /// Recover the typed handle.
    pub fn downcast<T: 'static>(&self) -> Result<Observable<T>> {
        Rc::clone(&self.handle)
            .downcast::<ObservableInner<T>>()
            .map(|inner| Observable { inner })
            .map_err(|_| ReactiveError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: self.type_name,
            })
    }

    /// Recover the typed handle, failing loudly on a mismatch.
    ///
    /// # Panics
    ///
    /// Panics if the container does not hold a `T`.
    #[must_use]
    pub fn expect_typed<T: 'static>(&self) -> Observable<T> {
        match self.downcast() {
            Ok(observable) => observable,
            Err(err) => panic!("{err}"),
        }
    }

    /// Name of the erased value type.
    #[must_use]
    pub fn value_type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for AnyObservable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyObservable")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Listener;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0u32));
        (Rc::clone(&count), count)
    }

    #[test]
    fn get_set_basic() {
        let obs = Observable::new(42);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.version(), 0);

        obs.set(99);
        assert_eq!(obs.get(), 99);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn equal_assignment_does_not_notify() {
        let obs = Observable::new("test".to_string());
        let owner = Rc::new(Listener);
        let (count, seen) = counter();
        obs.bind(&owner, move |_| count.set(count.get() + 1));

        obs.set("test".to_string());
        obs.set("test".to_string());
        obs.set("other".to_string());
        assert_eq!(seen.get(), 1);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn always_notify_fires_on_every_assignment() {
        #[derive(Clone)]
        struct Opaque;

        let obs = Observable::always_notify(Opaque);
        let owner = Rc::new(Listener);
        let (count, seen) = counter();
        obs.bind(&owner, move |_| count.set(count.get() + 1));

        obs.set(Opaque);
        obs.set(Opaque);
        obs.set(Opaque);
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn custom_equality() {
        let obs = Observable::with_equality(10i32, |a, b| a / 10 == b / 10);
        let owner = Rc::new(Listener);
        let (count, seen) = counter();
        obs.bind(&owner, move |_| count.set(count.get() + 1));

        obs.set(15);
        assert_eq!(seen.get(), 0);
        assert_eq!(obs.get(), 15, "value is stored even when not a change");

        obs.set(21);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn change_shapes_receive_old_and_new() {
        let obs = Observable::new(1);
        let owner = Rc::new(Listener);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        let l3 = Rc::clone(&log);
        obs.bind(&owner, move |new| l1.borrow_mut().push(format!("new={new}")))
            .bind_old(&owner, move |old| l2.borrow_mut().push(format!("old={old}")))
            .bind_change(&owner, move |old, new| {
                l3.borrow_mut().push(format!("{old}->{new}"))
            });

        obs.set(2);
        assert_eq!(*log.borrow(), vec!["new=2", "old=1", "1->2"]);
    }

    #[test]
    fn observe_replays_current_value() {
        let obs = Observable::new(5);
        let owner = Rc::new(Listener);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        obs.observe(&owner, move |v| l.borrow_mut().push(*v));
        assert_eq!(*log.borrow(), vec![5]);

        obs.set(6);
        assert_eq!(*log.borrow(), vec![5, 6]);
    }

    #[test]
    fn observe_change_replays_current_as_both() {
        let obs = Observable::new(5);
        let owner = Rc::new(Listener);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        obs.observe_change(&owner, move |o, n| l.borrow_mut().push((*o, *n)));
        obs.set(8);
        assert_eq!(*log.borrow(), vec![(5, 5), (5, 8)]);
    }

    #[test]
    fn released_owner_stops_receiving() {
        let obs = Observable::new("testString".to_string());
        let owner = Rc::new(Listener);
        let (count, seen) = counter();
        obs.bind(&owner, move |_| count.set(count.get() + 1));

        drop(owner);
        obs.set("changed".to_string());
        assert_eq!(seen.get(), 0);
        assert_eq!(obs.binding_count(), 0);
    }

    #[test]
    fn unbind_twice() {
        let obs = Observable::new(0);
        let owner = Rc::new(Listener);
        obs.bind(&owner, |_| {});
        assert!(obs.unbind(&owner));
        assert!(!obs.unbind(&owner));
    }

    #[test]
    fn identity_equality() {
        let a = Observable::new(1);
        let b = Observable::new(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn update_mutates_in_place() {
        let obs = Observable::new(vec![1, 2, 3]);
        obs.update(|v| v.push(4));
        assert_eq!(obs.get(), vec![1, 2, 3, 4]);
        assert_eq!(obs.version(), 1);

        obs.update(|v| v[0] = 1);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn set_from_callback_is_allowed() {
        let obs = Observable::new(0);
        let owner = Rc::new(Listener);
        let handle = obs.clone();
        obs.bind(&owner, move |v| {
            if *v < 3 {
                handle.set(v + 1);
            }
        });

        obs.set(1);
        assert_eq!(obs.get(), 3);
    }

    #[test]
    fn clamp_from_callback_reaches_later_bindings_last() {
        let obs = Observable::new(0);
        let clamp = Rc::new(Listener);
        let view = Rc::new(Listener);
        let handle = obs.clone();
        obs.bind(&clamp, move |v| {
            if *v > 10 {
                handle.set(10);
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        obs.bind_change(&view, move |old, new| s.borrow_mut().push((*old, *new)));

        obs.set(15);
        assert_eq!(obs.get(), 10);
        assert_eq!(*seen.borrow(), vec![(15, 10)]);
        assert_eq!(obs.version(), 2);
    }

    #[test]
    fn subscription_guard() {
        let obs = Observable::new(0);
        let (count, seen) = counter();
        let sub = obs.subscribe(move |_| count.set(count.get() + 1));

        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn single_event_fires_once_on_first_match() {
        let obs = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        let _token = obs.observe_single_event(|v| (1..=5).contains(v), move |v| {
            l.borrow_mut().push(*v)
        });

        obs.set(10);
        obs.set(1);
        obs.set(2);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(obs.binding_count(), 0);
    }

    #[test]
    fn single_event_matches_current_value() {
        let obs = Observable::new(3);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        let _token = obs.observe_single_event(|v| *v == 3, move |v| l.borrow_mut().push(*v));
        obs.set(4);
        obs.set(3);
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn erased_downcast() {
        let obs = Observable::new("name".to_string());
        let erased = obs.erase();

        let back = erased.downcast::<String>().unwrap();
        assert_eq!(back, obs);

        let err = erased.downcast::<u32>().unwrap_err();
        assert_eq!(
            err,
            ReactiveError::TypeMismatch {
                expected: "u32",
                found: std::any::type_name::<String>(),
            }
        );
    }

    #[test]
    #[should_panic(expected = "provide an explicit transform")]
    fn expect_typed_fails_loudly() {
        let erased = Observable::new(1u8).erase();
        let _ = erased.expect_typed::<String>();
    }

    #[test]
    fn debug_format() {
        let obs = Observable::new(42);
        let dbg = format!("{obs:?}");
        assert!(dbg.contains("Observable"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("version"));
    }
}
