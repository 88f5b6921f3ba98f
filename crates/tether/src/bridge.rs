#![forbid(unsafe_code)]

//! Glue between observables and external property systems.
//!
//! Two directions are covered:
//!
//! - **Into a view**: [`bind_property`] writes every value of a source into a
//!   property of a view object. The binding is keyed by the view and holds it
//!   weakly, so destroying the view needs no teardown.
//! - **Out of a foreign property**: a [`PropertySource`] adapter describes a
//!   property that lives elsewhere (a widget field, a settings store).
//!   [`observable_for`] seeds an [`Observable`] from it, forwards every
//!   change, and keeps the adapter's observation token alive exactly as long
//!   as the observable.
//!
//! # Failure Modes
//!
//! - **Adapter ignores token drop**: the change callback holds the observable
//!   weakly, so changes after the observable is gone are discarded rather
//!   than resurrecting it.

use std::rc::Rc;

use tracing::debug;

use crate::combinators::Observe;
use crate::observable::Observable;

/// A property owned by another system that can report its value and changes.
pub trait PropertySource {
    type Value: Clone + PartialEq + 'static;

    /// Guard returned by [`on_change`](PropertySource::on_change); dropping it
    /// ends the observation.
    type Token: 'static;

    fn current_value(&self) -> Self::Value;

    fn on_change(&self, callback: Box<dyn Fn(Self::Value)>) -> Self::Token;
}

/// Observable mirror of an external property.
///
/// The returned observable holds the source's observation token through an
/// empty binding on itself; the token is released when the observable is.
/// That binding is not reported by
/// [`binding_count`](Observable::binding_count).
pub fn observable_for<P: PropertySource>(source: &P) -> Observable<P::Value> {
    let observable = Observable::new(source.current_value());
    let target = observable.downgrade();
    let token = source.on_change(Box::new(move |value| {
        if let Some(observable) = target.upgrade() {
            observable.set(value);
        }
    }));
    observable.bind(&observable, move |_| {
        let _ = &token;
    });
    debug!(
        value_type = std::any::type_name::<P::Value>(),
        "bridged external property"
    );
    observable
}

/// Write every value of `source` into `view`, starting with the current one.
///
/// The binding is owned by `view` and disappears with it.
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use tether::{bind_property, Observable};
///
/// #[derive(Default)]
/// struct TextField {
///     text: RefCell<String>,
/// }
///
/// let name = Observable::new("Max".to_string());
/// let field = Rc::new(TextField::default());
/// bind_property(&name, &field, |field, value| *field.text.borrow_mut() = value.clone());
///
/// name.set("Maxim".to_string());
/// assert_eq!(*field.text.borrow(), "Maxim");
/// ```
pub fn bind_property<S, V, F>(source: &S, view: &Rc<V>, write: F)
where
    S: Observe,
    V: 'static,
    F: Fn(&V, &S::Value) + 'static,
{
    let weak = Rc::downgrade(view);
    source.source().observe(view, move |value| {
        if let Some(view) = weak.upgrade() {
            write(&view, value);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    type Listener = Rc<dyn Fn(u32)>;

    /// A stand-in for a widget property with its own change callbacks.
    #[derive(Default)]
    struct Slider {
        position: Cell<u32>,
        listeners: Rc<RefCell<Vec<(u64, Listener)>>>,
        next_id: Cell<u64>,
    }

    impl Slider {
        fn move_to(&self, position: u32) {
            self.position.set(position);
            let listeners: Vec<Listener> = self
                .listeners
                .borrow()
                .iter()
                .map(|(_, l)| Rc::clone(l))
                .collect();
            for listener in listeners {
                listener(position);
            }
        }

        fn listener_count(&self) -> usize {
            self.listeners.borrow().len()
        }
    }

    struct SliderToken {
        id: u64,
        listeners: Rc<RefCell<Vec<(u64, Listener)>>>,
    }

    impl Drop for SliderToken {
        fn drop(&mut self) {
            self.listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }

    impl PropertySource for Slider {
        type Value = u32;
        type Token = SliderToken;

        fn current_value(&self) -> u32 {
            self.position.get()
        }

        fn on_change(&self, callback: Box<dyn Fn(u32)>) -> SliderToken {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            self.listeners.borrow_mut().push((id, Rc::from(callback)));
            SliderToken {
                id,
                listeners: Rc::clone(&self.listeners),
            }
        }
    }

    #[test]
    fn observable_for_mirrors_property() {
        let slider = Slider::default();
        slider.move_to(3);

        let position = observable_for(&slider);
        assert_eq!(position.get(), 3);

        slider.move_to(7);
        assert_eq!(position.get(), 7);
        assert_eq!(position.version(), 1);
    }

    #[test]
    fn dropping_observable_releases_token() {
        let slider = Slider::default();
        let position = observable_for(&slider);
        assert_eq!(slider.listener_count(), 1);

        drop(position);
        assert_eq!(slider.listener_count(), 0);
        slider.move_to(1);
    }

    #[test]
    fn token_binding_is_not_counted() {
        let slider = Slider::default();
        let position = observable_for(&slider);
        assert_eq!(position.binding_count(), 0);

        let sub = position.subscribe(|_| {});
        assert_eq!(position.binding_count(), 1);
        drop(sub);
        assert_eq!(position.binding_count(), 0);
        assert_eq!(slider.listener_count(), 1);
    }

    #[test]
    fn property_changes_deduplicate() {
        let slider = Slider::default();
        let position = observable_for(&slider);
        let owner = Rc::new(());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        position.bind(&owner, move |v| l.borrow_mut().push(*v));

        slider.move_to(2);
        slider.move_to(2);
        assert_eq!(*log.borrow(), vec![2]);
    }

    struct Badge {
        text: RefCell<String>,
    }

    #[test]
    fn bind_property_writes_current_then_changes() {
        let count = Observable::new(1);
        let badge = Rc::new(Badge {
            text: RefCell::new(String::new()),
        });
        bind_property(&count, &badge, |badge, n| {
            *badge.text.borrow_mut() = format!("{n} new");
        });
        assert_eq!(*badge.text.borrow(), "1 new");

        count.set(4);
        assert_eq!(*badge.text.borrow(), "4 new");
    }

    #[test]
    fn destroyed_view_drops_binding() {
        let count = Observable::new(1);
        let badge = Rc::new(Badge {
            text: RefCell::new(String::new()),
        });
        bind_property(&count, &badge, |badge, n| {
            *badge.text.borrow_mut() = n.to_string();
        });
        assert_eq!(count.binding_count(), 1);

        drop(badge);
        assert_eq!(count.binding_count(), 0);
        count.set(2);
    }

    #[test]
    fn bind_property_from_derived() {
        let name = Observable::new("ada".to_string());
        let badge = Rc::new(Badge {
            text: RefCell::new(String::new()),
        });
        let upper = name.map(|n| n.to_uppercase());
        bind_property(&upper, &badge, |badge, n| {
            badge.text.borrow_mut().clone_from(n);
        });

        name.set("grace".to_string());
        assert_eq!(*badge.text.borrow(), "GRACE");
    }
}
