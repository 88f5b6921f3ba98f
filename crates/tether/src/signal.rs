#![forbid(unsafe_code)]

//! Fire-and-forget event streams.
//!
//! A [`Signal<T>`] stores no value: `send` delivers to every live binding and
//! forgets. There is no replay for late subscribers and no deduplication.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::registry::{Change, Owner, OwnerRef, Registry, Subscription};
use crate::scheduler::{RunLoop, Scheduler};
use crate::timing::{DebounceConfig, DebounceEdge, Debouncer, ThrottleConfig, Throttler};

struct SignalInner<T> {
    registry: Registry<T>,
    upstream: RefCell<Vec<Rc<dyn Any>>>,
}

/// Multicast event stream without a retained value.
///
/// Cloning a `Signal` yields another handle to the same stream; equality is
/// handle identity.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Signal<T> {}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Signal<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SignalInner {
                registry: Registry::new(),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Deliver `value` to every live binding, synchronously.
    pub fn send(&self, value: T) {
        self.inner.registry.notify(Change::New(&value));
    }

    pub fn bind(&self, owner: &impl Owner, callback: impl Fn(&T) + 'static) -> &Self {
        self.inner.registry.bind(owner, callback);
        self
    }

    pub fn unbind(&self, owner: &impl Owner) -> bool {
        self.inner.registry.unbind(owner)
    }

    /// Bind `callback` for as long as the returned token lives.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let subscription = Subscription::new();
        self.bind(&subscription, callback);
        subscription
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub(crate) fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn retain_upstream(&self, handle: Rc<dyn Any>) {
        self.inner.upstream.borrow_mut().push(handle);
    }

    fn handle(&self) -> Rc<dyn Any> {
        Rc::clone(&self.inner) as Rc<dyn Any>
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Debounced copy of this stream on the thread's main run loop.
    #[must_use]
    pub fn debounced(&self, delay: Duration, edge: DebounceEdge) -> Signal<T> {
        self.debounced_on(DebounceConfig::new(delay).with_edge(edge), RunLoop::main())
    }

    /// Debounced copy of this stream, with deferred sends run by `scheduler`.
    #[must_use]
    pub fn debounced_on(
        &self,
        config: DebounceConfig,
        scheduler: impl Scheduler + 'static,
    ) -> Signal<T> {
        let out = Signal::new();
        let target = out.downgrade();
        let debouncer = Debouncer::new(config, Rc::new(scheduler), move |value: T| {
            if let Some(out) = target.upgrade() {
                out.send(value);
            }
        });
        self.bind(&out, move |value| debouncer.call(value.clone()));
        out.retain_upstream(self.handle());
        out
    }

    /// Throttled copy of this stream on the thread's main run loop.
    #[must_use]
    pub fn throttled(&self, delay: Duration) -> Signal<T> {
        self.throttled_on(ThrottleConfig::new(delay), RunLoop::main())
    }

    /// Throttled copy of this stream, with deferred sends run by `scheduler`.
    #[must_use]
    pub fn throttled_on(
        &self,
        config: ThrottleConfig,
        scheduler: impl Scheduler + 'static,
    ) -> Signal<T> {
        let out = Signal::new();
        let target = out.downgrade();
        let throttler = Throttler::new(config, Rc::new(scheduler), move |value: T| {
            if let Some(out) = target.upgrade() {
                out.send(value);
            }
        });
        self.bind(&out, move |value| throttler.call(value.clone()));
        out.retain_upstream(self.handle());
        out
    }
}

impl Signal<()> {
    /// Unit form of [`send`](Signal::send).
    pub fn trigger(&self) {
        self.send(());
    }
}

impl<T: 'static> Owner for Signal<T> {
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(&self.inner)
    }
}

pub(crate) struct WeakSignal<T> {
    inner: Weak<SignalInner<T>>,
}

impl<T> WeakSignal<T> {
    pub(crate) fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }
}
