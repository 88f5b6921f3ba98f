#![forbid(unsafe_code)]

//! Reactive value observation with owner-scoped bindings.
//!
//! # Role
//! `tether` keeps application state and the things that display it in sync
//! without manual subscription bookkeeping. A binding is keyed by an *owner*
//! (typically the view that renders the value) and held weakly: when the
//! owner is dropped, its bindings go with it.
//!
//! # Primary responsibilities
//! - **Registry**: owner → callbacks map with weak owner retention.
//! - **Observable**: a shared value with injectable equality and
//!   `(old, new)` change notification.
//! - **ObservableArray**: a shared `Vec` that also reports index-level
//!   insert/delete/replace records.
//! - **Signal**: fire-and-forget event stream with no stored value.
//! - **Combinators**: `map`, `filter`, `reduce`, `compact_map`, `combined`,
//!   boolean `and`/`or`/`negate`, `debounced`, `throttled`.
//!
//! # Architecture
//!
//! Containers are `Rc` handles and single-threaded by construction.
//! Notification is synchronous on the thread performing the assignment. The
//! only deferred work is the debounce/throttle timers, which run on a
//! [`Scheduler`] the application drives ([`RunLoop`] by default,
//! [`ManualScheduler`] in tests).
//!
//! # Invariants
//!
//! 1. Bindings fire only when the container's equality reports a change.
//! 2. Callbacks bound under one owner fire in registration order.
//! 3. `observe` delivers the current value before returning.
//! 4. A derived container lives as long as someone holds it, and keeps its
//!    sources alive while it does.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tether::{Observable, Observe};
//!
//! struct Header {
//!     title: RefCell<String>,
//! }
//!
//! let name = Observable::new("Max".to_string());
//! let age = Observable::new(24);
//! let title = name.combined(&age, |n, a| format!("{n} {a}"));
//!
//! let header = Rc::new(Header { title: RefCell::new(String::new()) });
//! let view = Rc::downgrade(&header);
//! title.observe(&header, move |t| {
//!     if let Some(view) = view.upgrade() {
//!         *view.title.borrow_mut() = t.clone();
//!     }
//! });
//! assert_eq!(*header.title.borrow(), "Max 24");
//!
//! name.set("Maxim".to_string());
//! assert_eq!(*header.title.borrow(), "Maxim 24");
//! ```

pub mod array;
pub mod bridge;
pub mod combinators;
pub mod error;
pub mod observable;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod timing;

pub use array::{ArrayUpdate, ObservableArray, UpdateBatch, UpdateEvent, positional_diff};
pub use bridge::{PropertySource, bind_property, observable_for};
pub use combinators::{Invert, Observe, all, and, any, negate, or};
pub use error::{ReactiveError, Result};
pub use observable::{AnyObservable, Observable};
pub use registry::{Change, Owner, OwnerRef, Registry, Subscription};
pub use scheduler::{ManualScheduler, RunLoop, Scheduler, TaskId};
pub use signal::Signal;
pub use timing::{DebounceConfig, DebounceEdge, ThrottleConfig};
