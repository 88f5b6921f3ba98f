//! Property-based invariant tests for value containers and derived values.
//!
//! 1. Bindings fire iff the equality function reports a change.
//! 2. Version counts exactly the notifying assignments.
//! 3. `observe` replays the current value once, then tracks changes.
//! 4. A mapped value always equals the transform of the current source.
//! 5. A combined value always equals the transform of both sources.
//! 6. `reduce` equals a fresh fold of the current collection.
//! 7. Dropped owners never receive callbacks.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use tether::{Observable, Observe};

// ── Strategies ────────────────────────────────────────────────────────────

fn assignments(max_len: usize) -> impl Strategy<Value = Vec<i16>> {
    proptest::collection::vec(-5i16..=5, 1..=max_len)
}

fn pairs(max_len: usize) -> impl Strategy<Value = Vec<(bool, i16)>> {
    proptest::collection::vec((proptest::bool::ANY, -5i16..=5), 1..=max_len)
}

// 1 + 2. Notify iff not equal; version tracks notifications

proptest! {
    #[test]
    fn notifies_iff_changed(initial in -5i16..=5, values in assignments(40)) {
        let obs = Observable::new(initial);
        let owner = Rc::new(());
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        obs.bind_change(&owner, move |old, new| sink.borrow_mut().push((*old, *new)));

        let mut expected = Vec::new();
        let mut current = initial;
        for v in values {
            if v != current {
                expected.push((current, v));
            }
            current = v;
            obs.set(v);
        }

        prop_assert_eq!(&*log.borrow(), &expected);
        prop_assert_eq!(obs.version(), expected.len() as u64);
    }
}

proptest! {
    #[test]
    fn custom_equality_gates_notifications(values in assignments(40)) {
        // Equal by sign only.
        let obs = Observable::with_equality(0i16, |a, b| a.signum() == b.signum());
        let owner = Rc::new(());
        let hits = Rc::new(RefCell::new(0u64));
        let h = Rc::clone(&hits);
        obs.bind(&owner, move |_| *h.borrow_mut() += 1);

        let mut expected = 0u64;
        let mut current = 0i16;
        for v in values {
            if v.signum() != current.signum() {
                expected += 1;
            }
            current = v;
            obs.set(v);
            prop_assert_eq!(obs.get(), v);
        }
        prop_assert_eq!(*hits.borrow(), expected);
        prop_assert_eq!(obs.version(), expected);
    }
}

// 3. observe replays current value first

proptest! {
    #[test]
    fn observe_replays_then_tracks(initial in -5i16..=5, values in assignments(20)) {
        let obs = Observable::new(initial);
        for &v in &values[..values.len() / 2] {
            obs.set(v);
        }

        let owner = Rc::new(());
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let at_subscribe = obs.get();
        obs.observe(&owner, move |v| sink.borrow_mut().push(*v));
        prop_assert_eq!(&*log.borrow(), &vec![at_subscribe]);

        let mut expected = vec![at_subscribe];
        let mut current = at_subscribe;
        for &v in &values[values.len() / 2..] {
            if v != current {
                expected.push(v);
            }
            current = v;
            obs.set(v);
        }
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}

// 4 + 5 + 6. Derived values stay consistent

proptest! {
    #[test]
    fn derived_values_stay_consistent(steps in pairs(40)) {
        let a = Observable::new(0i16);
        let b = Observable::new(0i16);
        let doubled = a.map(|v| i32::from(*v) * 2);
        let sum = a.combined(&b, |x, y| i32::from(*x) + i32::from(*y));
        let chained = sum.combined(&doubled, |s, d| s - d);

        for (left, v) in steps {
            if left { a.set(v) } else { b.set(v) }
            let (x, y) = (i32::from(a.get()), i32::from(b.get()));
            prop_assert_eq!(doubled.get(), x * 2);
            prop_assert_eq!(sum.get(), x + y);
            prop_assert_eq!(chained.get(), (x + y) - x * 2);
        }
    }
}

proptest! {
    #[test]
    fn reduce_is_a_fresh_fold(batches in proptest::collection::vec(assignments(10), 1..10)) {
        let items = Observable::new(Vec::<i16>::new());
        let total = items.reduce(0i64, |acc, v| acc + i64::from(*v));
        let positives = items.filter(|v| *v > 0);

        for batch in batches {
            let expected_total: i64 = batch.iter().map(|v| i64::from(*v)).sum();
            let expected_pos: Vec<i16> = batch.iter().copied().filter(|v| *v > 0).collect();
            items.set(batch);
            prop_assert_eq!(total.get(), expected_total);
            prop_assert_eq!(positives.get(), expected_pos);
        }
    }
}

// 7. Dropped owners never hear anything

proptest! {
    #[test]
    fn dropped_owner_is_silent(values in assignments(20), drop_at in 0usize..20) {
        let obs = Observable::new(100i16);
        let owner = Rc::new(());
        let hits = Rc::new(RefCell::new(0usize));
        let h = Rc::clone(&hits);
        obs.bind(&owner, move |_| *h.borrow_mut() += 1);

        let mut owner = Some(owner);
        let mut at_drop = None;
        for (i, v) in values.into_iter().enumerate() {
            if i == drop_at {
                owner.take();
                at_drop = Some(*hits.borrow());
            }
            obs.set(v);
        }
        if let Some(count) = at_drop {
            prop_assert_eq!(*hits.borrow(), count);
            prop_assert_eq!(obs.binding_count(), 0);
        }
        drop(owner);
    }
}
