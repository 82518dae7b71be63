//! Re-deriving a typed view from the erased address of a stored value.
//!
//! A [`Handle`](crate::Handle) caches its view, but a fresh copy of a value
//! lives at a new address and needs a new view. Pointer metadata cannot be
//! moved from one address to another, so a [`Value`](crate::Value) instead
//! remembers *how* its view was obtained: from the concrete type, followed by
//! any number of widenings.

use alloc::boxed::Box;
use core::{marker::PhantomData, ptr::NonNull};

use polyval_internals::Erased;

use crate::Base;

/// Produces a view of type `T` for a stored value.
trait Project<T: ?Sized + 'static>: Send + Sync + 'static {
    /// Derives the view for the value at `data`.
    fn project(&self, data: NonNull<Erased>) -> NonNull<T>;

    /// Duplicates this projection.
    fn clone_box(&self) -> Box<dyn Project<T>>;
}

/// Views a `U` directly as `T` through `T: Base<U>`. Zero-sized.
struct Direct<U>(PhantomData<fn() -> U>);

impl<U, T> Project<T> for Direct<U>
where
    U: 'static,
    T: ?Sized + Base<U>,
{
    #[inline]
    fn project(&self, data: NonNull<Erased>) -> NonNull<T> {
        T::upcast(data.cast::<U>())
    }

    fn clone_box(&self) -> Box<dyn Project<T>> {
        Box::new(Direct::<U>(PhantomData))
    }
}

/// Widens the view produced by an inner projection.
struct Widened<T: ?Sized + 'static> {
    inner: Box<dyn Project<T>>,
}

impl<T, S> Project<S> for Widened<T>
where
    T: ?Sized + 'static,
    S: ?Sized + Base<T>,
{
    #[inline]
    fn project(&self, data: NonNull<Erased>) -> NonNull<S> {
        S::upcast(self.inner.project(data))
    }

    fn clone_box(&self) -> Box<dyn Project<S>> {
        Box::new(Widened {
            inner: self.inner.clone_box(),
        })
    }
}

/// How a [`Value<T>`](crate::Value) derives its view from the address of the
/// stored object.
pub(crate) struct Projection<T: ?Sized + 'static>(Box<dyn Project<T>>);

impl<T: ?Sized + 'static> Projection<T> {
    /// Projects a stored `U` straight into `T`.
    ///
    /// Does not allocate.
    pub(crate) fn direct<U: 'static>() -> Self
    where
        T: Base<U>,
    {
        Self(Box::new(Direct::<U>(PhantomData)))
    }

    /// Extends the projection with a widening into `S`.
    pub(crate) fn widen<S>(self) -> Projection<S>
    where
        S: ?Sized + Base<T>,
    {
        Projection(Box::new(Widened { inner: self.0 }))
    }

    /// Derives the view of the object at `data`.
    ///
    /// The result has the same address as `data`. It is only meaningful if
    /// `data` holds the concrete type this projection was created for.
    #[inline]
    pub(crate) fn apply(&self, data: NonNull<Erased>) -> NonNull<T> {
        self.0.project(data)
    }
}

impl<T: ?Sized + 'static> Clone for Projection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone_box())
    }
}
