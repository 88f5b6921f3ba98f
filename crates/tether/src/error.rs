#![forbid(unsafe_code)]

//! Error type shared by the fallible container operations.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Type mismatch | `AnyObservable` downcast to the wrong value type | `Err(TypeMismatch)`, or panic via `expect_typed` |
//! | Index out of bounds | `try_set`/`try_insert`/`try_remove` past the end, or `UpdateBatch::apply` with an index missing from its sequence | `Err(IndexOutOfBounds)`, or panic via the plain mutator |
//! | Range out of bounds | `try_replace_range` with an inverted or overlong range | `Err(RangeOutOfBounds)` |
//! | Missing equality | `Observable::always_notify` | Not an error: every assignment notifies |
//! | Released owner | Owner dropped while bound | Not an error: entry purged, `unbind` returns `false` |

/// Errors from reactive container operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactiveError {
    /// A type-erased container was asked for a value type it does not hold.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// An element index was past the end of the array.
    IndexOutOfBounds { index: usize, len: usize },
    /// A range was inverted or extended past the end of the array.
    RangeOutOfBounds { start: usize, end: usize, len: usize },
}

impl std::fmt::Display for ReactiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => write!(
                f,
                "can't treat observable of {found} as {expected}; provide an explicit transform"
            ),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::RangeOutOfBounds { start, end, len } => {
                write!(f, "range {start}..{end} out of bounds for length {len}")
            }
        }
    }
}

impl std::error::Error for ReactiveError {}

/// Result alias for reactive container operations.
pub type Result<T> = std::result::Result<T, ReactiveError>;
