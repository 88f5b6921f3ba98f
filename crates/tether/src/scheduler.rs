#![forbid(unsafe_code)]

//! Deferred task execution for time-based combinators.
//!
//! Debounce and throttle never spawn threads. They hand closures to a
//! [`Scheduler`], which runs them on the thread that drives it:
//!
//! - [`RunLoop`] uses the real clock. The application pumps it with
//!   [`RunLoop::run_pending`] from its event loop, the same way a UI main
//!   loop drains its timers. [`RunLoop::main`] returns the thread's default
//!   loop.
//! - [`ManualScheduler`] uses a virtual clock advanced explicitly, for
//!   deterministic tests.
//!
//! # Invariants
//!
//! 1. Tasks run in deadline order; equal deadlines run in scheduling order.
//! 2. A cancelled task never runs.
//! 3. A task scheduled while another runs is queued, never run inline.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

/// Handle for a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Something that can run a closure after a delay on the current thread.
pub trait Scheduler {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Queue `task` to run once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TaskId;

    /// Drop a queued task. Returns whether it was still pending.
    fn cancel(&self, id: TaskId) -> bool;
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TaskId {
        (**self).schedule(delay, task)
    }

    fn cancel(&self, id: TaskId) -> bool {
        (**self).cancel(id)
    }
}

type Task = Box<dyn FnOnce()>;

/// Deadline-ordered task storage shared by both schedulers.
#[derive(Default)]
struct TaskQueue {
    next_id: Cell<u64>,
    tasks: RefCell<BTreeMap<(Instant, u64), Task>>,
    deadlines: RefCell<HashMap<u64, Instant>>,
}

impl TaskQueue {
    fn push(&self, due: Instant, task: Task) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.tasks.borrow_mut().insert((due, id), task);
        self.deadlines.borrow_mut().insert(id, due);
        trace!(task = id, pending = self.len(), "scheduled task");
        TaskId(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let Some(due) = self.deadlines.borrow_mut().remove(&id.0) else {
            return false;
        };
        let removed = self.tasks.borrow_mut().remove(&(due, id.0)).is_some();
        trace!(task = id.0, "cancelled task");
        removed
    }

    /// Take the earliest task due at or before `now`.
    fn pop_due(&self, now: Instant) -> Option<(Instant, Task)> {
        let mut tasks = self.tasks.borrow_mut();
        let (&(due, id), _) = tasks.first_key_value()?;
        if due > now {
            return None;
        }
        let task = tasks.remove(&(due, id))?;
        self.deadlines.borrow_mut().remove(&id);
        Some((due, task))
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.tasks.borrow().keys().next().map(|&(due, _)| due)
    }

    fn len(&self) -> usize {
        self.tasks.borrow().len()
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

struct ManualState {
    origin: Instant,
    elapsed: Cell<Duration>,
    queue: TaskQueue,
}

/// Scheduler on a virtual clock that only moves when told to.
///
/// Clones share the clock and the queue.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use tether::{ManualScheduler, Scheduler};
///
/// let clock = ManualScheduler::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&fired);
/// clock.schedule(Duration::from_secs(1), Box::new(move || flag.set(true)));
///
/// clock.advance(Duration::from_millis(999));
/// assert!(!fired.get());
/// clock.advance(Duration::from_millis(1));
/// assert!(fired.get());
/// ```
#[derive(Clone)]
pub struct ManualScheduler {
    state: Rc<ManualState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(ManualState {
                origin: Instant::now(),
                elapsed: Cell::new(Duration::ZERO),
                queue: TaskQueue::default(),
            }),
        }
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.elapsed.get()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Each task observes the clock at its own deadline. Tasks scheduled by a
    /// running task also run if they fall due before the target. Returns the
    /// number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.origin + self.state.elapsed.get() + by;
        let mut ran = 0;
        while let Some((due, task)) = self.state.queue.pop_due(target) {
            let at = due.max(self.now());
            self.state.elapsed.set(at - self.state.origin);
            task();
            ran += 1;
        }
        self.state.elapsed.set(target - self.state.origin);
        if ran > 0 {
            trace!(ran, elapsed_ms = self.elapsed().as_millis() as u64, "advanced manual clock");
        }
        ran
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.queue.len()
    }

    /// Deadline of the earliest queued task, relative to the origin.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.state
            .queue
            .next_deadline()
            .map(|due| due - self.state.origin)
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.state.origin + self.state.elapsed.get()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TaskId {
        self.state.queue.push(self.now() + delay, task)
    }

    fn cancel(&self, id: TaskId) -> bool {
        self.state.queue.cancel(id)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RunLoop
// ---------------------------------------------------------------------------

thread_local! {
    static MAIN_LOOP: RunLoop = RunLoop::new();
}

/// Wall-clock scheduler drained by the owning thread.
///
/// Clones share the queue.
#[derive(Clone, Default)]
pub struct RunLoop {
    queue: Rc<TaskQueue>,
}

impl RunLoop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's default run loop.
    ///
    /// Combinators built without an explicit scheduler queue their work here.
    #[must_use]
    pub fn main() -> Self {
        MAIN_LOOP.with(Clone::clone)
    }

    /// Run every task whose deadline has passed. Returns the number run.
    pub fn run_pending(&self) -> usize {
        let now = Instant::now();
        let mut ran = 0;
        while let Some((_, task)) = self.queue.pop_due(now) {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, remaining = self.queue.len(), "ran due tasks");
        }
        ran
    }

    /// Block, sleeping between deadlines, until the queue is empty.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(due) = self.queue.next_deadline() {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            ran += self.run_pending();
        }
        ran
    }

    /// Deadline of the earliest queued task, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Scheduler for RunLoop {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TaskId {
        self.queue.push(Instant::now() + delay, task)
    }

    fn cancel(&self, id: TaskId) -> bool {
        self.queue.cancel(id)
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("pending", &self.pending())
            .finish()
    }
}
