#![forbid(unsafe_code)]

//! Observable sequences with index-level update records.
//!
//! # Design
//!
//! [`ObservableArray<T>`] pairs an [`Observable<Vec<T>>`] (the whole value)
//! with a [`Signal<Vec<ArrayUpdate>>`] (what changed, by index). Every
//! mutator does four things, in order:
//!
//! 1. mutate the stored sequence without notifying,
//! 2. describe the mutation as [`ArrayUpdate`] records,
//! 3. send the records on [`updates()`](ObservableArray::updates) if any,
//! 4. fire the whole-value notification if the sequence changed.
//!
//! # Diff
//!
//! [`replace_all`](ObservableArray::replace_all) uses [`positional_diff`]:
//! index `i` is a replacement if both sides have an element there and they
//! differ, an insertion if only the new side has one, a deletion if only the
//! old side has one. No element matching is attempted, so moving one element
//! to the front reports every shifted index as replaced. This is what an
//! index-path list view needs and costs O(max(m, n)).
//!
//! # Consuming updates
//!
//! A list view applies the records of one notification as three independent
//! batches: deletions (old index space), insertions (new index space), then
//! replacements, with no index adjustment between records. [`UpdateBatch`]
//! flattens records into that form and can replay them.
//!
//! # Performance
//!
//! | Operation        | Complexity                          |
//! |------------------|-------------------------------------|
//! | `append`         | O(n) clone for old-value snapshot   |
//! | `replace_all`    | O(max(m, n)) diff + O(n) clone      |
//! | `positional_diff`| O(max(m, n)), no allocation if equal|

use std::ops::Range;

use tracing::trace;

use crate::error::{ReactiveError, Result};
use crate::observable::Observable;
use crate::registry::{Owner, OwnerRef, Subscription};
use crate::signal::Signal;

/// Kind of change described by an [`ArrayUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UpdateEvent {
    Insert,
    Delete,
    Replace,
}

/// One record of an array change: an event kind and the indexes it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArrayUpdate {
    pub event: UpdateEvent,
    pub indexes: Vec<usize>,
}

impl ArrayUpdate {
    #[must_use]
    pub fn insert(indexes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            event: UpdateEvent::Insert,
            indexes: indexes.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn delete(indexes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            event: UpdateEvent::Delete,
            indexes: indexes.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn replace(indexes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            event: UpdateEvent::Replace,
            indexes: indexes.into_iter().collect(),
        }
    }
}

/// Positional diff from `old` to `new`.
///
/// Returns at most three records, in the order Replace, Insert, Delete; a
/// record is omitted when it would carry no index.
///
/// ```
/// use tether::{positional_diff, ArrayUpdate};
///
/// let old = ["1", "2", "3", "4", "5"];
/// let new = ["5", "4", "3", "2", "1", "0"];
/// assert_eq!(
///     positional_diff(&old, &new),
///     vec![ArrayUpdate::replace([0, 1, 3, 4]), ArrayUpdate::insert([5])],
/// );
/// ```
#[must_use]
pub fn positional_diff<T: PartialEq>(old: &[T], new: &[T]) -> Vec<ArrayUpdate> {
    let shared = old.len().min(new.len());
    let replaced: Vec<usize> = (0..shared).filter(|&i| old[i] != new[i]).collect();

    let mut updates = Vec::with_capacity(3);
    if !replaced.is_empty() {
        updates.push(ArrayUpdate::replace(replaced));
    }
    if new.len() > shared {
        updates.push(ArrayUpdate::insert(shared..new.len()));
    }
    if old.len() > shared {
        updates.push(ArrayUpdate::delete(shared..old.len()));
    }
    updates
}

/// Update records flattened into the three index sets a list view applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    /// Sorted, deduplicated indexes in the new sequence.
    pub insertions: Vec<usize>,
    /// Sorted, deduplicated indexes in the old sequence.
    pub deletions: Vec<usize>,
    /// Sorted, deduplicated indexes to reload.
    pub replacements: Vec<usize>,
}

impl UpdateBatch {
    /// Group `updates` by event kind.
    #[must_use]
    pub fn collect(updates: &[ArrayUpdate]) -> Self {
        let mut batch = Self::default();
        for update in updates {
            let target = match update.event {
                UpdateEvent::Insert => &mut batch.insertions,
                UpdateEvent::Delete => &mut batch.deletions,
                UpdateEvent::Replace => &mut batch.replacements,
            };
            target.extend_from_slice(&update.indexes);
        }
        for set in [
            &mut batch.insertions,
            &mut batch.deletions,
            &mut batch.replacements,
        ] {
            set.sort_unstable();
            set.dedup();
        }
        batch
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.replacements.is_empty()
    }

    /// Replay this batch on `old`, taking inserted and replaced elements from
    /// `new`.
    ///
    /// Deletions are removed from the highest index down, insertions are
    /// placed from the lowest index up, then replacements are copied over.
    /// For a batch built from one notification of an [`ObservableArray`] the
    /// result equals `new`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactiveError::IndexOutOfBounds`] if an index does not exist
    /// in the sequence it refers to.
    pub fn apply<T: Clone>(&self, old: &[T], new: &[T]) -> Result<Vec<T>> {
        let mut out = old.to_vec();

        for &index in self.deletions.iter().rev() {
            if index >= out.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: out.len(),
                });
            }
            out.remove(index);
        }

        for &index in &self.insertions {
            let Some(value) = new.get(index) else {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: new.len(),
                });
            };
            if index > out.len() {
                return Err(ReactiveError::IndexOutOfBounds {
                    index,
                    len: out.len(),
                });
            }
            out.insert(index, value.clone());
        }

        for &index in &self.replacements {
            match (out.get_mut(index), new.get(index)) {
                (Some(slot), Some(value)) => *slot = value.clone(),
                _ => {
                    return Err(ReactiveError::IndexOutOfBounds {
                        index,
                        len: out.len().min(new.len()),
                    });
                }
            }
        }

        Ok(out)
    }
}

/// An observable `Vec<T>` that also reports index-level updates.
///
/// Cloning creates another handle to the same array; equality is identity.
pub struct ObservableArray<T> {
    values: Observable<Vec<T>>,
    updates: Signal<Vec<ArrayUpdate>>,
}

impl<T> Clone for ObservableArray<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            updates: self.updates.clone(),
        }
    }
}

impl<T> PartialEq for ObservableArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl<T> Eq for ObservableArray<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableArray")
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + PartialEq + 'static> Default for ObservableArray<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Clone + PartialEq + 'static> From<Vec<T>> for ObservableArray<T> {
    fn from(values: Vec<T>) -> Self {
        Self::new(values)
    }
}

impl<T: Clone + PartialEq + 'static> FromIterator<T> for ObservableArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T: Clone + PartialEq + 'static> ObservableArray<T> {
    /// Array whose whole-value notification is deduplicated by `PartialEq`.
    #[must_use]
    pub fn new(values: Vec<T>) -> Self {
        Self::from_values(Observable::new(values))
    }

    /// Array with a custom equality deciding whether a mutation notifies
    /// whole-value bindings.
    ///
    /// Update records are unaffected: they always describe the positional
    /// difference by element `PartialEq`.
    #[must_use]
    pub fn with_equality(
        values: Vec<T>,
        equals: impl Fn(&Vec<T>, &Vec<T>) -> bool + 'static,
    ) -> Self {
        Self::from_values(Observable::with_equality(values, equals))
    }

    /// Array whose whole-value bindings fire on every mutation call that
    /// reaches the container, even when the sequence is unchanged.
    #[must_use]
    pub fn always_notify(values: Vec<T>) -> Self {
        Self::from_values(Observable::always_notify(values))
    }

    fn from_values(values: Observable<Vec<T>>) -> Self {
        Self {
            values,
            updates: Signal::new(),
        }
    }

    /// Clone of the current sequence.
    #[must_use]
    pub fn get(&self) -> Vec<T> {
        self.values.get()
    }

    /// Borrow the current sequence.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.values.with(|values| f(values.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with(<[T]>::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the element at `index`.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<T> {
        self.with(|values| values.get(index).cloned())
    }

    /// Number of whole-value notifications so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.values.version()
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.values.binding_count()
    }

    /// Stream of update records, one `send` per mutation.
    #[must_use]
    pub fn updates(&self) -> &Signal<Vec<ArrayUpdate>> {
        &self.updates
    }

    /// The whole-value container backing this array.
    #[must_use]
    pub fn values(&self) -> &Observable<Vec<T>> {
        &self.values
    }

    pub fn bind(&self, owner: &impl Owner, callback: impl Fn(&Vec<T>) + 'static) -> &Self {
        self.values.bind(owner, callback);
        self
    }

    pub fn bind_old(&self, owner: &impl Owner, callback: impl Fn(&Vec<T>) + 'static) -> &Self {
        self.values.bind_old(owner, callback);
        self
    }

    pub fn bind_change(
        &self,
        owner: &impl Owner,
        callback: impl Fn(&Vec<T>, &Vec<T>) + 'static,
    ) -> &Self {
        self.values.bind_change(owner, callback);
        self
    }

    /// Bind `callback` to update records under `owner`.
    pub fn bind_updates(
        &self,
        owner: &impl Owner,
        callback: impl Fn(&Vec<ArrayUpdate>) + 'static,
    ) -> &Self {
        self.updates.bind(owner, callback);
        self
    }

    pub fn observe(&self, owner: &impl Owner, callback: impl Fn(&Vec<T>) + 'static) -> &Self {
        self.values.observe(owner, callback);
        self
    }

    pub fn observe_change(
        &self,
        owner: &impl Owner,
        callback: impl Fn(&Vec<T>, &Vec<T>) + 'static,
    ) -> &Self {
        self.values.observe_change(owner, callback);
        self
    }

    pub fn subscribe(&self, callback: impl Fn(&Vec<T>) + 'static) -> Subscription {
        self.values.subscribe(callback)
    }

    /// Remove `owner` from both the value and update channels.
    pub fn unbind(&self, owner: &impl Owner) -> bool {
        let values = self.values.unbind(owner);
        let updates = self.updates.unbind(owner);
        values || updates
    }

    // ── Mutators ────────────────────────────────────────────────────

    /// Overwrite the element at `index`, or append if `index == len`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] if `index > len`.
    pub fn try_set(&self, index: usize, value: T) -> Result<()> {
        let (old, update) = self.values.mutate_quietly(|values| {
            let len = values.len();
            if index < len {
                values[index] = value;
                Ok(ArrayUpdate::replace([index]))
            } else if index == len {
                values.push(value);
                Ok(ArrayUpdate::insert([index]))
            } else {
                Err(ReactiveError::IndexOutOfBounds { index, len })
            }
        });
        self.commit(old, vec![update?]);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn set(&self, index: usize, value: T) {
        self.try_set(index, value).unwrap_or_else(|err| panic!("{err}"));
    }

    /// Insert `value` at `at`, shifting later elements right.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] if `at > len`.
    pub fn try_insert(&self, value: T, at: usize) -> Result<()> {
        self.try_insert_all([value], at)
    }

    /// # Panics
    ///
    /// Panics if `at > len`.
    pub fn insert(&self, value: T, at: usize) {
        self.try_insert(value, at).unwrap_or_else(|err| panic!("{err}"));
    }

    /// Insert `values` starting at `at`. Inserting nothing is a no-op.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] if `at > len`.
    pub fn try_insert_all(&self, values: impl IntoIterator<Item = T>, at: usize) -> Result<()> {
        let incoming: Vec<T> = values.into_iter().collect();
        let len = self.len();
        if at > len {
            return Err(ReactiveError::IndexOutOfBounds { index: at, len });
        }
        if incoming.is_empty() {
            return Ok(());
        }
        let count = incoming.len();
        let (old, ()) = self.values.mutate_quietly(|values| {
            values.splice(at..at, incoming);
        });
        self.commit(old, vec![ArrayUpdate::insert(at..at + count)]);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `at > len`.
    pub fn insert_all(&self, values: impl IntoIterator<Item = T>, at: usize) {
        self.try_insert_all(values, at)
            .unwrap_or_else(|err| panic!("{err}"));
    }

    pub fn append(&self, value: T) {
        self.append_all([value]);
    }

    /// Append `values` at the end. Appending nothing is a no-op.
    pub fn append_all(&self, values: impl IntoIterator<Item = T>) {
        let incoming: Vec<T> = values.into_iter().collect();
        if incoming.is_empty() {
            return;
        }
        let count = incoming.len();
        let (old, start) = self.values.mutate_quietly(|values| {
            let start = values.len();
            values.extend(incoming);
            start
        });
        self.commit(old, vec![ArrayUpdate::insert(start..start + count)]);
    }

    /// Remove and return the last element, if any.
    pub fn remove_last(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let (old, removed) = self.values.mutate_quietly(|values| {
            let removed = values.pop();
            (removed, values.len())
        });
        let (removed, index) = removed;
        self.commit(old, vec![ArrayUpdate::delete([index])]);
        removed
    }

    /// Remove and return the element at `at`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::IndexOutOfBounds`] if `at >= len`.
    pub fn try_remove(&self, at: usize) -> Result<T> {
        let len = self.len();
        if at >= len {
            return Err(ReactiveError::IndexOutOfBounds { index: at, len });
        }
        let (old, removed) = self.values.mutate_quietly(|values| values.remove(at));
        self.commit(old, vec![ArrayUpdate::delete([at])]);
        Ok(removed)
    }

    /// # Panics
    ///
    /// Panics if `at >= len`.
    pub fn remove(&self, at: usize) -> T {
        self.try_remove(at).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Remove every element. Clearing an empty array is a no-op.
    pub fn remove_all(&self) {
        let len = self.len();
        if len == 0 {
            return;
        }
        let (old, ()) = self.values.mutate_quietly(Vec::clear);
        self.commit(old, vec![ArrayUpdate::delete(0..len)]);
    }

    /// Replace the elements in `range` with `values`.
    ///
    /// Emits `Insert(start..start + new_len)` then `Delete(range)`, skipping
    /// whichever is empty.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::RangeOutOfBounds`] if the range is inverted or ends
    /// past `len`.
    pub fn try_replace_range(
        &self,
        range: Range<usize>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<()> {
        let len = self.len();
        if range.start > range.end || range.end > len {
            return Err(ReactiveError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let incoming: Vec<T> = values.into_iter().collect();
        let inserted = range.start..range.start + incoming.len();

        let mut updates = Vec::with_capacity(2);
        if !inserted.is_empty() {
            updates.push(ArrayUpdate::insert(inserted));
        }
        if !range.is_empty() {
            updates.push(ArrayUpdate::delete(range.clone()));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let (old, ()) = self.values.mutate_quietly(|values| {
            values.splice(range, incoming);
        });
        self.commit(old, updates);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the range is inverted or ends past `len`.
    pub fn replace_range(&self, range: Range<usize>, values: impl IntoIterator<Item = T>) {
        self.try_replace_range(range, values)
            .unwrap_or_else(|err| panic!("{err}"));
    }

    /// Replace the whole sequence, reporting a [`positional_diff`].
    pub fn replace_all(&self, values: Vec<T>) {
        let (old, updates) = self.values.mutate_quietly(|current| {
            let updates = positional_diff(current, &values);
            *current = values;
            updates
        });
        self.commit(old, updates);
    }

    fn commit(&self, old: Vec<T>, updates: Vec<ArrayUpdate>) {
        if !updates.is_empty() {
            trace!(
                records = updates.len(),
                len = self.len(),
                "array update emitted"
            );
            self.updates.send(updates);
        }
        self.values.publish_from(old);
    }
}

impl<T: 'static> Owner for ObservableArray<T> {
    fn owner_ref(&self) -> OwnerRef {
        self.values.owner_ref()
    }
}
