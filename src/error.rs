//! Errors reported by fallible operations on values and handles.
//!
//! Only misuse that can be recovered from is reported as an error. Destroying
//! a [`Value`](crate::Value) while handles still observe it is a lifetime
//! violation and terminates the process instead, see [`crate::hooks`].

/// The concrete type of a value refused to be cloned.
///
/// Returned when cloning a value that was constructed with the
/// [`Uncloneable`](crate::handlers::Uncloneable) handler, or any other handler
/// that declines to produce a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("values of type `{type_name}` cannot be cloned")]
pub struct CloneError {
    type_name: &'static str,
}

impl CloneError {
    pub(crate) fn new(type_name: &'static str) -> Self {
        Self { type_name }
    }

    /// The name of the concrete type that could not be cloned.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// A value or handle was narrowed to a type it does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("cannot view a value of type `{actual}` as `{requested}`")]
pub struct CastError {
    requested: &'static str,
    actual: &'static str,
}

impl CastError {
    pub(crate) fn new<U: ?Sized>(actual: &'static str) -> Self {
        Self {
            requested: core::any::type_name::<U>(),
            actual,
        }
    }

    /// The name of the type that was requested.
    #[must_use]
    pub fn requested(&self) -> &'static str {
        self.requested
    }

    /// The name of the concrete type that is actually stored.
    #[must_use]
    pub fn actual(&self) -> &'static str {
        self.actual
    }
}

/// Any error produced by this crate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error, derive_more::From,
)]
pub enum Error {
    /// A value was constructed from a null pointer.
    #[display("cannot take ownership of a null pointer")]
    NullPointer,
    /// A value could not be cloned.
    #[display("failed to clone value")]
    #[from]
    Clone(#[error(source)] CloneError),
    /// A value could not be narrowed.
    #[display("failed to narrow value")]
    #[from]
    Cast(#[error(source)] CastError),
}
