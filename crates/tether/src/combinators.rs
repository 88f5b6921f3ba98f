#![forbid(unsafe_code)]

//! Derived containers: transform, combine, collection folds, and time shaping.
//!
//! # Design
//!
//! Every combinator returns a new container that binds to its source(s)
//! with **itself** as the owner. The derived container:
//!
//! - holds its sources strongly, so a chain `a.map(..).map(..)` survives
//!   the intermediate handle being dropped;
//! - is held only weakly by its sources, so dropping the last handle to it
//!   removes its bindings on the next notification or bind.
//!
//! Recomputation is synchronous with the source assignment and goes through
//! the derived container's own `set`, so its change detection applies: a
//! transform that maps two inputs to the same output notifies nothing.
//!
//! The combinators live on the [`Observe`] trait, implemented for
//! [`Observable<T>`] and [`ObservableArray<T>`] (whose value is `Vec<T>`).
//!
//! # Invariants
//!
//! 1. A derived value equals its transform applied to the current source
//!    values, immediately after any source assignment.
//! 2. Unbinding a subscriber from the end of a chain stops delivery to it,
//!    however deep the chain.
//! 3. A dropped derived container never recomputes again.

use std::rc::Rc;
use std::time::Duration;

use crate::array::ObservableArray;
use crate::observable::Observable;
use crate::scheduler::{RunLoop, Scheduler};
use crate::signal::Signal;
use crate::timing::{DebounceConfig, DebounceEdge, Debouncer, ThrottleConfig, Throttler};

pub(crate) mod sealed {
    use crate::observable::Observable;

    pub trait Source {
        type Value: Clone + 'static;

        fn source(&self) -> &Observable<Self::Value>;
    }
}

impl<T: Clone + 'static> sealed::Source for Observable<T> {
    type Value = T;

    fn source(&self) -> &Observable<T> {
        self
    }
}

impl<T: Clone + PartialEq + 'static> sealed::Source for ObservableArray<T> {
    type Value = Vec<T>;

    fn source(&self) -> &Observable<Vec<T>> {
        self.values()
    }
}

/// Bind `derived` to `source` so that it is reassigned with `f(value)` on
/// every source change.
fn derive<T, U>(
    source: &Observable<T>,
    derived: Observable<U>,
    f: impl Fn(&T) -> U + 'static,
) -> Observable<U>
where
    T: Clone + 'static,
    U: Clone + 'static,
{
    let target = derived.downgrade();
    source.bind(&derived, move |value| {
        if let Some(derived) = target.upgrade() {
            derived.set(f(value));
        }
    });
    derived.retain_upstream(source.handle());
    derived
}

/// Combinators over anything holding an observable value.
///
/// Sealed: implemented for [`Observable<T>`] and [`ObservableArray<T>`].
pub trait Observe: sealed::Source {
    /// Derived container holding `f(value)`, deduplicated by `PartialEq`.
    ///
    /// ```
    /// use tether::{Observable, Observe};
    ///
    /// let count = Observable::new(3);
    /// let label = count.map(|n| format!("{n} items"));
    /// count.set(4);
    /// assert_eq!(label.get(), "4 items");
    /// ```
    #[doc(alias = "transform")]
    #[must_use]
    fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&Self::Value) -> U + 'static,
    {
        let source = self.source();
        let seed = source.with(&f);
        derive(source, Observable::new(seed), f)
    }

    /// Like [`map`](Observe::map), but the result notifies on every source
    /// change, even when the output is unchanged or not comparable.
    #[must_use]
    fn map_always<U, F>(&self, f: F) -> Observable<U>
    where
        U: Clone + 'static,
        F: Fn(&Self::Value) -> U + 'static,
    {
        let source = self.source();
        let seed = source.with(&f);
        derive(source, Observable::always_notify(seed), f)
    }

    /// Derived container holding `f(self, other)`, recomputed when either
    /// side changes.
    ///
    /// N-ary combinations chain pairwise calls.
    #[must_use]
    fn combined<O, U, F>(&self, other: &O, f: F) -> Observable<U>
    where
        O: Observe,
        U: Clone + PartialEq + 'static,
        F: Fn(&Self::Value, &O::Value) -> U + 'static,
    {
        let left = self.source();
        let right = other.source();
        let derived = Observable::new(left.with(|a| right.with(|b| f(a, b))));
        let f = Rc::new(f);

        let target = derived.downgrade();
        let weak_right = right.downgrade();
        let compute = Rc::clone(&f);
        left.bind(&derived, move |a| {
            if let (Some(derived), Some(right)) = (target.upgrade(), weak_right.upgrade()) {
                derived.set(right.with(|b| compute(a, b)));
            }
        });

        let target = derived.downgrade();
        let weak_left = left.downgrade();
        right.bind(&derived, move |b| {
            if let (Some(derived), Some(left)) = (target.upgrade(), weak_left.upgrade()) {
                derived.set(left.with(|a| f(a, b)));
            }
        });

        derived.retain_upstream(left.handle());
        derived.retain_upstream(right.handle());
        derived
    }

    /// Elements of the source collection that satisfy `predicate`.
    #[must_use]
    fn filter<E, P>(&self, predicate: P) -> Observable<Vec<E>>
    where
        Self: Observe<Value = Vec<E>>,
        E: Clone + PartialEq + 'static,
        P: Fn(&E) -> bool + 'static,
    {
        self.map(move |items: &Vec<E>| items.iter().filter(|e| predicate(*e)).cloned().collect())
    }

    /// Fold of the whole current collection, starting from `initial` each
    /// time. Nothing accumulates across changes.
    ///
    /// ```
    /// use tether::{ObservableArray, Observe};
    ///
    /// let prices = ObservableArray::new(vec![3, 4]);
    /// let total = prices.reduce(0, |acc, p| acc + p);
    /// prices.append(5);
    /// assert_eq!(total.get(), 12);
    /// ```
    #[must_use]
    fn reduce<E, R, F>(&self, initial: R, f: F) -> Observable<R>
    where
        Self: Observe<Value = Vec<E>>,
        E: 'static,
        R: Clone + PartialEq + 'static,
        F: Fn(R, &E) -> R + 'static,
    {
        self.map(move |items: &Vec<E>| items.iter().fold(initial.clone(), &f))
    }

    /// Map each element, dropping `None` results.
    #[must_use]
    fn compact_map<E, R, F>(&self, f: F) -> Observable<Vec<R>>
    where
        Self: Observe<Value = Vec<E>>,
        E: 'static,
        R: Clone + PartialEq + 'static,
        F: Fn(&E) -> Option<R> + 'static,
    {
        self.map(move |items: &Vec<E>| items.iter().filter_map(&f).collect())
    }

    /// The present elements of a collection of optionals.
    #[must_use]
    fn compacted<E>(&self) -> Observable<Vec<E>>
    where
        Self: Observe<Value = Vec<Option<E>>>,
        E: Clone + PartialEq + 'static,
    {
        self.compact_map(|item: &Option<E>| item.clone())
    }

    /// Map each element of the source collection.
    #[must_use]
    fn map_each<E, R, F>(&self, f: F) -> Observable<Vec<R>>
    where
        Self: Observe<Value = Vec<E>>,
        E: 'static,
        R: Clone + PartialEq + 'static,
        F: Fn(&E) -> R + 'static,
    {
        self.map(move |items: &Vec<E>| items.iter().map(&f).collect())
    }

    /// Stream of `f(value)` for every source change where it is `Some`.
    ///
    /// The current value is not replayed.
    #[must_use]
    fn flat_map<U, F>(&self, f: F) -> Signal<U>
    where
        U: 'static,
        F: Fn(&Self::Value) -> Option<U> + 'static,
    {
        let source = self.source();
        let out = Signal::new();
        let target = out.downgrade();
        source.bind(&out, move |value| {
            if let (Some(mapped), Some(out)) = (f(value), target.upgrade()) {
                out.send(mapped);
            }
        });
        out.retain_upstream(source.handle());
        out
    }

    /// Debounced copy on the thread's main [`RunLoop`].
    #[must_use]
    fn debounced(&self, delay: Duration, edge: DebounceEdge) -> Observable<Self::Value> {
        self.debounced_on(
            DebounceConfig::new(delay).with_edge(edge),
            RunLoop::main(),
        )
    }

    /// Debounced copy; deferred assignments run on `scheduler`.
    ///
    /// The result starts with the source's current value and uses the
    /// source's equality.
    #[must_use]
    fn debounced_on(
        &self,
        config: DebounceConfig,
        scheduler: impl Scheduler + 'static,
    ) -> Observable<Self::Value> {
        let source = self.source();
        let derived = Observable::from_parts(source.get(), source.equality());
        let target = derived.downgrade();
        let gate = Debouncer::new(config, Rc::new(scheduler), move |value| {
            if let Some(derived) = target.upgrade() {
                derived.set(value);
            }
        });
        source.bind(&derived, move |value| gate.call(value.clone()));
        derived.retain_upstream(source.handle());
        derived
    }

    /// Throttled copy on the thread's main [`RunLoop`].
    #[must_use]
    fn throttled(&self, delay: Duration) -> Observable<Self::Value> {
        self.throttled_on(ThrottleConfig::new(delay), RunLoop::main())
    }

    /// Throttled copy; deferred assignments run on `scheduler`.
    #[must_use]
    fn throttled_on(
        &self,
        config: ThrottleConfig,
        scheduler: impl Scheduler + 'static,
    ) -> Observable<Self::Value> {
        let source = self.source();
        let derived = Observable::from_parts(source.get(), source.equality());
        let target = derived.downgrade();
        let gate = Throttler::new(config, Rc::new(scheduler), move |value| {
            if let Some(derived) = target.upgrade() {
                derived.set(value);
            }
        });
        source.bind(&derived, move |value| gate.call(value.clone()));
        derived.retain_upstream(source.handle());
        derived
    }
}

impl<S: sealed::Source> Observe for S {}

// ---------------------------------------------------------------------------
// Boolean algebra
// ---------------------------------------------------------------------------

/// Values with a logical inverse.
pub trait Invert {
    #[must_use]
    fn inverted(&self) -> Self;
}

impl Invert for bool {
    fn inverted(&self) -> Self {
        !*self
    }
}

/// The inverse of an observable is a derived observable of the inverse.
impl<T: Invert + Clone + PartialEq + 'static> Invert for Observable<T> {
    fn inverted(&self) -> Self {
        self.map(T::inverted)
    }
}

/// `a && b`, kept up to date.
#[must_use]
pub fn and(a: &impl Observe<Value = bool>, b: &impl Observe<Value = bool>) -> Observable<bool> {
    a.combined(b, |a, b| *a && *b)
}

/// `a || b`, kept up to date.
#[must_use]
pub fn or(a: &impl Observe<Value = bool>, b: &impl Observe<Value = bool>) -> Observable<bool> {
    a.combined(b, |a, b| *a || *b)
}

/// The inverse of `source`, kept up to date.
#[must_use]
pub fn negate<T>(source: &impl Observe<Value = T>) -> Observable<T>
where
    T: Invert + Clone + PartialEq + 'static,
{
    source.map(T::inverted)
}

/// Conjunction of every source. Empty input yields a constant `true`.
#[must_use]
pub fn all(sources: &[Observable<bool>]) -> Observable<bool> {
    fold_bool(sources, true, |a, b| and(a, b))
}

/// Disjunction of every source. Empty input yields a constant `false`.
#[must_use]
pub fn any(sources: &[Observable<bool>]) -> Observable<bool> {
    fold_bool(sources, false, |a, b| or(a, b))
}

fn fold_bool(
    sources: &[Observable<bool>],
    empty: bool,
    join: impl Fn(&Observable<bool>, &Observable<bool>) -> Observable<bool>,
) -> Observable<bool> {
    match sources.split_first() {
        None => Observable::new(empty),
        Some((first, rest)) => rest
            .iter()
            .fold(first.map(|v| *v), |acc, next| join(&acc, next)),
    }
}
