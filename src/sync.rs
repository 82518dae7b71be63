//! Locks that work with and without the `std` feature.
//!
//! With `std` these are the operating-system backed locks from `std::sync`,
//! without it they are the spinning locks from [`spin`]. Poisoning is ignored:
//! every critical section in this crate leaves the protected data consistent
//! even when it unwinds.

#[cfg(feature = "std")]
use std::sync as impl_;

#[cfg(not(feature = "std"))]
use spin as impl_;

/// A mutual-exclusion lock around a handle's descriptor.
#[repr(transparent)]
pub(crate) struct Lock<T>(impl_::Mutex<T>);

/// Guard returned by [`Lock::lock`].
pub(crate) type LockGuard<'a, T> = impl_::MutexGuard<'a, T>;

impl<T> Lock<T> {
    #[must_use]
    pub(crate) const fn new(value: T) -> Self {
        Self(impl_::Mutex::new(value))
    }

    #[inline]
    pub(crate) fn lock(&self) -> LockGuard<'_, T> {
        #[cfg(feature = "std")]
        let guard = self.0.lock().unwrap_or_else(impl_::PoisonError::into_inner);

        #[cfg(not(feature = "std"))]
        let guard = self.0.lock();

        guard
    }

    #[inline]
    pub(crate) fn get_mut(&mut self) -> &mut T {
        #[cfg(feature = "std")]
        let value = self.0.get_mut().unwrap_or_else(impl_::PoisonError::into_inner);

        #[cfg(not(feature = "std"))]
        let value = self.0.get_mut();

        value
    }

    #[inline]
    pub(crate) fn into_inner(self) -> T {
        #[cfg(feature = "std")]
        let value = self.0.into_inner().unwrap_or_else(impl_::PoisonError::into_inner);

        #[cfg(not(feature = "std"))]
        let value = self.0.into_inner();

        value
    }
}

/// A reader-writer lock for global hook registries.
///
/// The registry starts out empty and is only allocated once the first hook
/// is registered.
#[repr(transparent)]
pub(crate) struct HookLock<T: 'static + Send + Sync>(impl_::RwLock<Option<T>>);

impl<T: 'static + Send + Sync> HookLock<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self(impl_::RwLock::new(None))
    }

    #[inline]
    pub(crate) fn read(&'static self) -> impl core::ops::Deref<Target = Option<T>> {
        #[cfg(feature = "std")]
        let guard = self.0.read().unwrap_or_else(impl_::PoisonError::into_inner);

        #[cfg(not(feature = "std"))]
        let guard = self.0.read();

        guard
    }

    #[inline]
    pub(crate) fn write(&'static self) -> impl core::ops::DerefMut<Target = Option<T>> {
        #[cfg(feature = "std")]
        let guard = self.0.write().unwrap_or_else(impl_::PoisonError::into_inner);

        #[cfg(not(feature = "std"))]
        let guard = self.0.write();

        guard
    }
}
