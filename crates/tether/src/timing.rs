#![forbid(unsafe_code)]

//! Debounce and throttle gates for time-shaped combinators.
//!
//! Both gates sit between a source callback and a downstream action. They
//! never block: deferred work goes through a [`Scheduler`].
//!
//! # Debounce
//!
//! - **Trailing**: every call cancels the pending task and schedules a new
//!   one `delay` later. Only the last value of a burst is delivered.
//! - **Leading**: the first call runs the action immediately and locks the
//!   gate; calls are dropped until `delay` has passed, then the next call is
//!   leading again.
//!
//! # Throttle
//!
//! A call runs immediately if strictly more than `delay` has passed since the
//! last delivery. Otherwise one deferred delivery is scheduled for
//! `last + delay`; calls arriving before it fires only replace the value it
//! will deliver.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Downstream dropped while a task is pending | Task runs, action finds no target, nothing happens |
//! | Gate dropped while a task is pending | Pending task cancelled |
//! | Scheduler never pumped | Deferred deliveries never happen |

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::scheduler::{Scheduler, TaskId};

/// Which end of a burst a debounce delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DebounceEdge {
    /// Deliver the first change, then ignore changes for `delay`.
    Leading,
    /// Deliver the last change once `delay` passes without another.
    #[default]
    Trailing,
}

/// Configuration for debounced combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebounceConfig {
    /// Quiet period. Default: 300ms.
    pub delay: Duration,
    /// Delivered edge. Default: trailing.
    pub edge: DebounceEdge,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(300),
            edge: DebounceEdge::Trailing,
        }
    }
}

impl DebounceConfig {
    /// Trailing debounce with the given delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_edge(mut self, edge: DebounceEdge) -> Self {
        self.edge = edge;
        self
    }
}

/// Configuration for throttled combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleConfig {
    /// Minimum spacing between deliveries. Default: 300ms.
    pub delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(300),
        }
    }
}

impl ThrottleConfig {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

struct DebounceState<T> {
    pending: Cell<Option<TaskId>>,
    locked: Cell<bool>,
    action: Box<dyn Fn(T)>,
}

pub(crate) struct Debouncer<T> {
    config: DebounceConfig,
    scheduler: Rc<dyn Scheduler>,
    state: Rc<DebounceState<T>>,
}

impl<T: 'static> Debouncer<T> {
    pub(crate) fn new(
        config: DebounceConfig,
        scheduler: Rc<dyn Scheduler>,
        action: impl Fn(T) + 'static,
    ) -> Self {
        Self {
            config,
            scheduler,
            state: Rc::new(DebounceState {
                pending: Cell::new(None),
                locked: Cell::new(false),
                action: Box::new(action),
            }),
        }
    }

    pub(crate) fn call(&self, value: T) {
        match self.config.edge {
            DebounceEdge::Trailing => {
                if let Some(id) = self.state.pending.take() {
                    self.scheduler.cancel(id);
                }
                let state = Rc::clone(&self.state);
                let id = self.scheduler.schedule(
                    self.config.delay,
                    Box::new(move || {
                        state.pending.set(None);
                        (state.action)(value);
                    }),
                );
                self.state.pending.set(Some(id));
            }
            DebounceEdge::Leading => {
                if self.state.locked.get() {
                    trace!("debounce locked, dropping change");
                    return;
                }
                self.state.locked.set(true);
                let state = Rc::clone(&self.state);
                let id = self.scheduler.schedule(
                    self.config.delay,
                    Box::new(move || {
                        state.pending.set(None);
                        state.locked.set(false);
                    }),
                );
                self.state.pending.set(Some(id));
                (self.state.action)(value);
            }
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(id) = self.state.pending.take() {
            self.scheduler.cancel(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Throttler
// ---------------------------------------------------------------------------

struct ThrottleState<T> {
    last_fire: Cell<Option<Instant>>,
    pending: Cell<Option<TaskId>>,
    latest: RefCell<Option<T>>,
    action: Box<dyn Fn(T)>,
}

pub(crate) struct Throttler<T> {
    config: ThrottleConfig,
    scheduler: Rc<dyn Scheduler>,
    state: Rc<ThrottleState<T>>,
}

impl<T: 'static> Throttler<T> {
    pub(crate) fn new(
        config: ThrottleConfig,
        scheduler: Rc<dyn Scheduler>,
        action: impl Fn(T) + 'static,
    ) -> Self {
        Self {
            config,
            scheduler,
            state: Rc::new(ThrottleState {
                last_fire: Cell::new(None),
                pending: Cell::new(None),
                latest: RefCell::new(None),
                action: Box::new(action),
            }),
        }
    }

    pub(crate) fn call(&self, value: T) {
        if self.state.pending.get().is_some() {
            *self.state.latest.borrow_mut() = Some(value);
            return;
        }

        let now = self.scheduler.now();
        let last = match self.state.last_fire.get() {
            Some(last) if now.saturating_duration_since(last) <= self.config.delay => last,
            _ => {
                self.state.last_fire.set(Some(now));
                (self.state.action)(value);
                return;
            }
        };

        *self.state.latest.borrow_mut() = Some(value);
        let due = last + self.config.delay;
        let state = Rc::clone(&self.state);
        let id = self.scheduler.schedule(
            due.saturating_duration_since(now),
            Box::new(move || {
                state.pending.set(None);
                state.last_fire.set(Some(due));
                let latest = state.latest.borrow_mut().take();
                if let Some(value) = latest {
                    (state.action)(value);
                }
            }),
        );
        trace!(
            wait_ms = due.saturating_duration_since(now).as_millis() as u64,
            "throttle deferred delivery"
        );
        self.state.pending.set(Some(id));
    }
}

impl<T> Drop for Throttler<T> {
    fn drop(&mut self) {
        if let Some(id) = self.state.pending.take() {
            self.scheduler.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn sink() -> (Rc<RefCell<Vec<i32>>>, impl Fn(i32) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&log);
        (log, move |v: i32| out.borrow_mut().push(v))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn config_defaults() {
        let debounce = DebounceConfig::default();
        assert_eq!(debounce.delay, ms(300));
        assert_eq!(debounce.edge, DebounceEdge::Trailing);
        assert_eq!(ThrottleConfig::default().delay, ms(300));
        assert_eq!(
            DebounceConfig::new(ms(5)).with_edge(DebounceEdge::Leading).edge,
            DebounceEdge::Leading
        );
    }

    #[test]
    fn trailing_delivers_last_of_burst() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let gate = Debouncer::new(DebounceConfig::new(ms(100)), Rc::new(clock.clone()), action);

        gate.call(1);
        clock.advance(ms(50));
        gate.call(2);
        clock.advance(ms(50));
        gate.call(3);
        assert_eq!(clock.pending(), 1);

        clock.advance(ms(99));
        assert!(log.borrow().is_empty());
        clock.advance(ms(1));
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn leading_delivers_first_and_relocks() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let config = DebounceConfig::new(ms(100)).with_edge(DebounceEdge::Leading);
        let gate = Debouncer::new(config, Rc::new(clock.clone()), action);

        gate.call(1);
        gate.call(2);
        clock.advance(ms(60));
        gate.call(3);
        assert_eq!(*log.borrow(), vec![1]);

        clock.advance(ms(40));
        gate.call(4);
        assert_eq!(*log.borrow(), vec![1, 4]);
    }

    #[test]
    fn throttle_first_immediate_then_coalesced() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let gate = Throttler::new(ThrottleConfig::new(ms(100)), Rc::new(clock.clone()), action);

        gate.call(1);
        clock.advance(ms(10));
        gate.call(2);
        clock.advance(ms(10));
        gate.call(3);
        assert_eq!(*log.borrow(), vec![1]);

        clock.advance(ms(79));
        assert_eq!(*log.borrow(), vec![1]);
        clock.advance(ms(1));
        assert_eq!(*log.borrow(), vec![1, 3]);
    }

    #[test]
    fn throttle_measures_from_deferred_delivery() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let gate = Throttler::new(ThrottleConfig::new(ms(100)), Rc::new(clock.clone()), action);

        gate.call(1);
        gate.call(2);
        clock.advance(ms(100));
        assert_eq!(*log.borrow(), vec![1, 2]);

        // Exactly `delay` after the deferred delivery is still inside the window.
        clock.advance(ms(100));
        gate.call(3);
        assert_eq!(*log.borrow(), vec![1, 2]);

        clock.advance(ms(100));
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn throttle_spaced_calls_fire_immediately() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let gate = Throttler::new(ThrottleConfig::new(ms(100)), Rc::new(clock.clone()), action);

        gate.call(1);
        clock.advance(ms(101));
        gate.call(2);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn dropping_gate_cancels_pending_task() {
        let clock = ManualScheduler::new();
        let (log, action) = sink();
        let gate = Debouncer::new(DebounceConfig::new(ms(100)), Rc::new(clock.clone()), action);

        gate.call(1);
        drop(gate);
        assert_eq!(clock.pending(), 0);
        clock.advance(ms(200));
        assert!(log.borrow().is_empty());
    }
}
