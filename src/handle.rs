use core::{any::TypeId, fmt, marker::PhantomData, ops::Deref};

use crate::{
    Base, Value,
    descriptor::Descriptor,
    error::CastError,
    sync::Lock,
};

/// A non-owning observer of a [`Value`].
///
/// A handle refers to the storage of a value, through any base type of the
/// value's concrete type. It keeps the value's storage block allocated, but it
/// never owns the value: the [`Value`] decides when the object is destroyed,
/// and destroying a value while handles to it still exist terminates the
/// process (see [`crate::hooks`]).
///
/// Handles are cheap to clone and can be redirected to another value through
/// a shared reference with [`Handle::assign`], which makes them usable as
/// shared, re-pointable references in long-lived structures.
///
/// Handles give read-only access through [`Handle::get`]. Mutation goes
/// through the owning [`Value`] once no handle observes it any more, or
/// through interior mutability inside `T`.
///
/// # Examples
///
/// ```
/// use polyval::{Handle, Value, impl_base};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// #[derive(Clone)]
/// struct Circle {
///     radius: f64,
/// }
///
/// impl Shape for Circle {
///     fn area(&self) -> f64 {
///         3.0 * self.radius * self.radius
///     }
/// }
///
/// impl_base!(dyn Shape);
///
/// let circle: Value<dyn Shape> = Value::new(Circle { radius: 1.0 });
/// let handle: Handle<dyn Shape> = circle.handle();
/// assert_eq!(handle.get().area(), 3.0);
///
/// let exact: Handle<Circle> = handle.try_downcast::<Circle>().unwrap();
/// assert_eq!(exact.get().radius, 1.0);
///
/// // Handles must be gone before the value is destroyed.
/// drop((handle, exact));
/// drop(circle);
/// ```
pub struct Handle<T: ?Sized + 'static> {
    descriptor: Lock<Descriptor<T>>,
}

// SAFETY: A handle only hands out shared references to `T`, so sending it to
// another thread is the same as sending a `&T`. The descriptor is protected by
// the lock and the block count is atomic.
unsafe impl<T: ?Sized + Sync + 'static> Send for Handle<T> {}

// SAFETY: See the `Send` implementation; every operation through `&Handle`
// goes through the lock.
unsafe impl<T: ?Sized + Sync + 'static> Sync for Handle<T> {}

impl<T: ?Sized + 'static> Handle<T> {
    #[inline]
    pub(crate) fn from_descriptor(descriptor: Descriptor<T>) -> Self {
        Self {
            descriptor: Lock::new(descriptor),
        }
    }

    /// Takes a new count on the current descriptor.
    #[inline]
    pub(crate) fn descriptor(&self) -> Descriptor<T> {
        self.descriptor.lock().clone()
    }

    #[inline]
    pub(crate) fn with_descriptor<R>(&self, f: impl FnOnce(&Descriptor<T>) -> R) -> R {
        f(&self.descriptor.lock())
    }

    #[inline]
    pub(crate) fn descriptor_mut(&mut self) -> &mut Descriptor<T> {
        self.descriptor.get_mut()
    }

    #[inline]
    pub(crate) fn into_descriptor(self) -> Descriptor<T> {
        self.descriptor.into_inner()
    }

    /// Replaces the descriptor. The old one is released after the lock.
    fn replace(&self, descriptor: Descriptor<T>) {
        let old = core::mem::replace(&mut *self.descriptor.lock(), descriptor);
        drop(old);
    }

    /// Dereferences the handle.
    ///
    /// The returned guard keeps its own count on the value's storage, so the
    /// view stays valid even if this handle is reassigned in the meantime.
    ///
    /// # Panics
    ///
    /// Panics if the observed value has already been destroyed. This can only
    /// be observed while the process is already aborting due to a lifetime
    /// violation.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> HandleRef<'_, T> {
        match self.try_get() {
            Some(guard) => guard,
            None => panic!(
                "handle to a `{}` dereferenced after its value was destroyed",
                self.type_name()
            ),
        }
    }

    /// Dereferences the handle, or returns `None` if the observed value has
    /// already been destroyed.
    #[must_use]
    pub fn try_get(&self) -> Option<HandleRef<'_, T>> {
        let descriptor = self.descriptor();
        descriptor.data()?;
        Some(HandleRef {
            descriptor,
            _marker: PhantomData,
        })
    }

    /// Redirects this handle to the value observed by `other`.
    ///
    /// The new storage is retained before the old one is released, so
    /// assigning a handle to itself, or to another handle of the same value,
    /// is fine.
    pub fn assign(&self, other: &Handle<T>) {
        self.replace(other.descriptor());
    }

    /// Redirects this handle to the value observed by `other`, widening the
    /// view to `T`.
    pub fn assign_from<U>(&self, other: &Handle<U>)
    where
        U: ?Sized + 'static,
        T: Base<U>,
    {
        self.replace(other.descriptor().upcast());
    }

    /// Redirects this handle to `value`, widening the view to `T`.
    pub fn assign_value<U, const INLINE: usize>(&self, value: &Value<U, INLINE>)
    where
        U: ?Sized + 'static,
        T: Base<U>,
    {
        self.assign_from(value.as_handle());
    }

    /// Creates a new handle to the same value, viewed as the base type `S`.
    ///
    /// Widening never fails.
    #[must_use]
    pub fn upcast<S>(&self) -> Handle<S>
    where
        S: ?Sized + Base<T>,
    {
        Handle::from_descriptor(self.descriptor().upcast())
    }

    /// Converts this handle into a handle of the concrete type `U`.
    ///
    /// Returns the handle unchanged if the observed value is not a `U`.
    pub fn downcast<U: 'static>(self) -> Result<Handle<U>, Self> {
        self.into_descriptor()
            .downcast::<U>()
            .map(Handle::from_descriptor)
            .map_err(Handle::from_descriptor)
    }

    /// Creates a new handle of the concrete type `U` to the same value.
    pub fn try_downcast<U: 'static>(&self) -> Result<Handle<U>, CastError> {
        self.descriptor()
            .downcast::<U>()
            .map(Handle::from_descriptor)
            .map_err(|descriptor| descriptor.cast_error::<U>())
    }

    /// Whether the observed value is a `U`.
    #[must_use]
    pub fn is<U: 'static>(&self) -> bool {
        self.with_descriptor(Descriptor::is::<U>)
    }

    /// The [`TypeId`] of the concrete type of the observed value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.with_descriptor(|descriptor| descriptor.dispatcher().type_id())
    }

    /// The [`core::any::type_name`] of the concrete type of the observed
    /// value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.with_descriptor(|descriptor| descriptor.dispatcher().type_name())
    }

    /// The size of the concrete type of the observed value, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.with_descriptor(|descriptor| descriptor.dispatcher().size())
    }

    /// The number of counts on the observed storage: the owning value, every
    /// handle, and every live [`HandleRef`].
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.with_descriptor(Descriptor::strong_count)
    }

    /// Whether both handles observe the same storage.
    #[must_use]
    pub fn ptr_eq<U: ?Sized + 'static>(&self, other: &Handle<U>) -> bool {
        let block = self.descriptor();
        other.with_descriptor(|other| block.block().as_ref().ptr_eq(other.block().as_ref()))
    }
}

impl<T: ?Sized + 'static> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::from_descriptor(self.descriptor())
    }
}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_get() {
            Some(value) => f.debug_tuple("Handle").field(&&*value).finish(),
            None => f.write_str("Handle(<destroyed>)"),
        }
    }
}

/// A dereferenced [`Handle`].
///
/// Holds its own count on the observed storage for as long as it lives.
pub struct HandleRef<'a, T: ?Sized + 'static> {
    /// # Safety
    ///
    /// The value behind this descriptor was alive when the guard was created.
    descriptor: Descriptor<T>,
    _marker: PhantomData<&'a T>,
}

// SAFETY: The guard behaves like a `&T`.
unsafe impl<T: ?Sized + Sync + 'static> Send for HandleRef<'_, T> {}

// SAFETY: The guard behaves like a `&T`.
unsafe impl<T: ?Sized + Sync + 'static> Sync for HandleRef<'_, T> {}

impl<T: ?Sized + 'static> Deref for HandleRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        let view = self.descriptor.view();
        // SAFETY: The value was alive when this guard was created, and the guard's
        // count keeps it alive: a `Value` aborts the process instead of destroying
        // its object while other counts exist. For the same reason the owning
        // `Value` cannot hand out `&mut T` while this guard lives.
        unsafe { view.as_ref() }
    }
}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for HandleRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display + 'static> fmt::Display for HandleRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use alloc::{format, string::String};

    use super::*;

    trait Greeter {
        fn greet(&self) -> String;
    }

    #[derive(Clone, Debug)]
    struct English;

    #[derive(Clone, Debug)]
    struct Swedish;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    impl Greeter for Swedish {
        fn greet(&self) -> String {
            "hej".into()
        }
    }

    crate::impl_base!(dyn Greeter + Send + Sync);

    static_assertions::assert_impl_all!(Handle<dyn Greeter + Send + Sync>: Send, Sync, Clone);
    static_assertions::assert_impl_all!(Handle<u32>: Send, Sync);
    static_assertions::assert_not_impl_any!(Handle<core::cell::Cell<u32>>: Send, Sync);
    static_assertions::assert_not_impl_any!(HandleRef<'static, core::cell::Cell<u32>>: Send, Sync);

    #[test]
    fn test_get_and_counts() {
        let value: Value<dyn Greeter + Send + Sync> = Value::new(English);
        let handle = value.handle();
        assert_eq!(handle.strong_count(), 2);

        {
            let guard = handle.get();
            assert_eq!(guard.greet(), "hello");
            assert_eq!(handle.strong_count(), 3);
        }

        let clone = handle.clone();
        assert_eq!(value.handle_count(), 2);
        assert!(clone.ptr_eq(&handle));
        drop((handle, clone));
        assert_eq!(value.handle_count(), 0);
    }

    #[test]
    fn test_assign() {
        let english: Value<dyn Greeter + Send + Sync> = Value::new(English);
        let swedish: Value<Swedish> = Value::new(Swedish);

        let handle = english.handle();
        handle.assign(&handle.clone());
        assert_eq!(english.handle_count(), 1);

        handle.assign_value(&swedish);
        assert_eq!(handle.get().greet(), "hej");
        assert_eq!(english.handle_count(), 0);
        assert_eq!(swedish.handle_count(), 1);

        let other = english.handle();
        handle.assign(&other);
        assert_eq!(handle.get().greet(), "hello");
        assert_eq!(swedish.handle_count(), 0);
        assert_eq!(english.handle_count(), 2);
        drop((handle, other));
    }

    #[test]
    fn test_casts() {
        let value: Value<Swedish> = Value::new(Swedish);
        let exact = value.handle();
        let wide: Handle<dyn Greeter + Send + Sync> = exact.upcast();

        assert!(wide.is::<Swedish>());
        assert!(!wide.is::<English>());
        assert_eq!(wide.type_id(), TypeId::of::<Swedish>());
        assert_eq!(wide.type_name(), core::any::type_name::<Swedish>());
        assert_eq!(wide.size(), 0);

        let error = wide.try_downcast::<English>().unwrap_err();
        assert_eq!(error.requested(), core::any::type_name::<English>());
        assert_eq!(error.actual(), core::any::type_name::<Swedish>());

        let wide = wide.downcast::<English>().unwrap_err();
        let Ok(narrow) = wide.downcast::<Swedish>() else {
            panic!("handle lost its concrete type");
        };
        assert!(narrow.ptr_eq(&exact));
        drop((narrow, exact));
    }

    #[test]
    fn test_debug() {
        let value: Value<u8> = Value::new(4);
        let handle = value.handle();
        assert_eq!(format!("{handle:?}"), "Handle(4)");
        assert_eq!(format!("{:?} {}", handle.get(), handle.get()), "4 4");
        drop(handle);
    }
}
