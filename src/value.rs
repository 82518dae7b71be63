use alloc::boxed::Box;
use core::{
    any::TypeId,
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    sync::atomic,
};

use polyval_internals::{Dispatcher, Erased, Placement, RawBlock};

use crate::{
    Base, Handle,
    descriptor::Descriptor,
    error::{CastError, CloneError, Error},
    handlers::{Cloneable, ValueHandler},
    hooks::{self, LifetimeViolation},
    projection::Projection,
};

/// Objects of at most this many bytes are stored inside the storage block
/// itself when no other limit is given.
pub const DEFAULT_INLINE_SIZE: usize = 16;

/// A polymorphic object with value semantics.
///
/// A `Value<T>` holds one object of any concrete type `U` for which
/// [`T: Base<U>`](Base) holds, typically a trait object `T = dyn Trait`
/// implemented by `U`. It behaves like a plain value of that object:
///
/// - cloning produces a deep, independent copy of the concrete object;
/// - dropping destroys the object deterministically;
/// - it dereferences to `&T`, and to `&mut T` while nothing observes it.
///
/// Objects of at most `INLINE` bytes are co-allocated with the value's
/// storage block; larger objects get a heap allocation of their own.
///
/// [`Handle`]s observe a value without owning it. A value must outlive all of
/// its handles: dropping a value that is still observed is a lifetime
/// violation, which runs the [violation hooks](crate::hooks) and then
/// terminates the process.
///
/// # Examples
///
/// ```
/// use polyval::{Value, impl_base};
///
/// trait Shape {
///     fn area(&self) -> f64;
///     fn scale(&mut self, factor: f64);
/// }
///
/// #[derive(Clone)]
/// struct Square {
///     side: f64,
/// }
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.side * self.side
///     }
///
///     fn scale(&mut self, factor: f64) {
///         self.side *= factor;
///     }
/// }
///
/// impl_base!(dyn Shape);
///
/// let original: Value<dyn Shape> = Value::new(Square { side: 2.0 });
/// let mut copy = original.clone();
/// copy.scale(2.0);
///
/// assert_eq!(original.area(), 4.0);
/// assert_eq!(copy.area(), 16.0);
/// ```
pub struct Value<T: ?Sized + 'static, const INLINE: usize = DEFAULT_INLINE_SIZE> {
    handle: Handle<T>,
    /// Copy of the view held by `handle`, whose descriptor never changes.
    view: NonNull<T>,
    projection: Projection<T>,
}

// SAFETY: Moving a value to another thread moves the object, which needs
// `T: Send`. Handles left behind on the original thread may still read the
// object while the value reads it too, which needs `T: Sync`.
unsafe impl<T: ?Sized + Send + Sync + 'static, const INLINE: usize> Send for Value<T, INLINE> {}

// SAFETY: A shared value only gives out `&T` and handles, which are `Send` for
// `T: Sync`.
unsafe impl<T: ?Sized + Sync + 'static, const INLINE: usize> Sync for Value<T, INLINE> {}

impl<T: ?Sized + 'static, const INLINE: usize> Value<T, INLINE> {
    /// Creates a value holding `value`, cloned through its [`Clone`]
    /// implementation.
    pub fn new<U>(value: U) -> Self
    where
        U: Clone + 'static,
        T: Base<U>,
    {
        Self::new_custom::<U, Cloneable>(value)
    }

    /// Creates a value holding `value`, cloned through the handler `H`.
    ///
    /// See [`handlers`](crate::handlers) for the built-in handlers.
    pub fn new_custom<U, H>(value: U) -> Self
    where
        U: 'static,
        H: ValueHandler<U>,
        T: Base<U>,
    {
        let size = core::mem::size_of::<U>();
        let block = match Placement::for_size(size, INLINE) {
            Placement::Inline => {
                tracing::trace!(
                    stored_type = core::any::type_name::<U>(),
                    declared_type = core::any::type_name::<T>(),
                    size,
                    "storing value inline"
                );
                RawBlock::new_inline::<U, H>(value)
            }
            Placement::Detached => {
                tracing::debug!(
                    stored_type = core::any::type_name::<U>(),
                    declared_type = core::any::type_name::<T>(),
                    size,
                    inline_limit = INLINE,
                    "value does not fit inline, allocating it on the heap"
                );
                RawBlock::new_detached::<U, H>(Box::new(value))
            }
        };
        // SAFETY:
        // 1. The projection is created for `U`, the type stored in `block`.
        unsafe { Self::from_block(block, Projection::direct::<U>()) }
    }

    /// Creates a value that takes over the boxed `value` without copying it.
    pub fn from_box<U>(value: Box<U>) -> Self
    where
        U: Clone + 'static,
        T: Base<U>,
    {
        Self::from_box_custom::<U, Cloneable>(value)
    }

    /// Creates a value that takes over the boxed `value` without copying it,
    /// cloned through the handler `H`.
    pub fn from_box_custom<U, H>(value: Box<U>) -> Self
    where
        U: 'static,
        H: ValueHandler<U>,
        T: Base<U>,
    {
        let block = RawBlock::new_detached::<U, H>(value);
        // SAFETY:
        // 1. The projection is created for `U`, the type stored in `block`.
        unsafe { Self::from_block(block, Projection::direct::<U>()) }
    }

    /// Creates a value that takes ownership of the object at `ptr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullPointer`] if `ptr` is null.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. If `ptr` is not null, it was obtained from [`Box::into_raw`] for a
    ///    `Box<U>`.
    /// 2. Ownership is transferred: the caller does not use or free `ptr`
    ///    afterwards.
    pub unsafe fn from_raw<U>(ptr: *mut U) -> Result<Self, Error>
    where
        U: Clone + 'static,
        T: Base<U>,
    {
        // SAFETY:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { Self::from_raw_custom::<U, Cloneable>(ptr) }
    }

    /// Creates a value that takes ownership of the object at `ptr`, cloned
    /// through the handler `H`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullPointer`] if `ptr` is null.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. If `ptr` is not null, it was obtained from [`Box::into_raw`] for a
    ///    `Box<U>`.
    /// 2. Ownership is transferred: the caller does not use or free `ptr`
    ///    afterwards.
    pub unsafe fn from_raw_custom<U, H>(ptr: *mut U) -> Result<Self, Error>
    where
        U: 'static,
        H: ValueHandler<U>,
        T: Base<U>,
    {
        // SAFETY:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        let block = unsafe { RawBlock::from_raw_parts::<U, H>(ptr) };
        let block = block.ok_or(Error::NullPointer)?;
        // SAFETY:
        // 1. The projection is created for `U`, the type stored in `block`.
        Ok(unsafe { Self::from_block(block, Projection::direct::<U>()) })
    }

    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `projection` was created for the concrete type stored in `block`.
    unsafe fn from_block(block: RawBlock, projection: Projection<T>) -> Self {
        let Some(data) = block.as_ref().data() else {
            unreachable!("new blocks always hold a value")
        };
        let view = projection.apply(data);
        // SAFETY:
        // 1. `view` was derived from the address of the stored value by a projection
        //    for its concrete type (guaranteed by the caller).
        let descriptor = unsafe { Descriptor::new(block, view) };
        Self {
            handle: Handle::from_descriptor(descriptor),
            view,
            projection,
        }
    }

    fn from_parts(handle: Handle<T>, projection: Projection<T>) -> Self {
        let view = handle.with_descriptor(Descriptor::view);
        Self {
            handle,
            view,
            projection,
        }
    }

    fn into_parts(self) -> (Handle<T>, Projection<T>) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never used or dropped again, so the field is moved out
        // exactly once.
        let handle = unsafe { core::ptr::read(&this.handle) };
        // SAFETY: Same as above.
        let projection = unsafe { core::ptr::read(&this.projection) };
        (handle, projection)
    }

    /// The address, dispatcher and view of the stored object.
    fn raw_parts(&self) -> (NonNull<Erased>, &'static Dispatcher, NonNull<T>) {
        self.handle.with_descriptor(|descriptor| {
            let Some(data) = descriptor.data() else {
                unreachable!("a live value always holds its object")
            };
            (data, descriptor.dispatcher(), descriptor.view())
        })
    }

    pub(crate) fn as_handle(&self) -> &Handle<T> {
        &self.handle
    }

    fn clone_block(&self, inline_limit: usize) -> Result<RawBlock, CloneError> {
        let (data, dispatcher, _) = self.raw_parts();
        let placement = Placement::for_size(dispatcher.size(), inline_limit);
        tracing::trace!(
            stored_type = dispatcher.type_name(),
            ?placement,
            "cloning value"
        );
        // SAFETY:
        // 1. `data` is the address of the object owned by `self`, and `dispatcher`
        //    belongs to it.
        // 2. `self` is borrowed for the duration of the call, so the object cannot
        //    be mutated through it, and handles never mutate.
        let block = unsafe { dispatcher.clone(data, placement) };
        block.ok_or_else(|| CloneError::new(dispatcher.type_name()))
    }

    /// Creates an independent copy of the stored object.
    ///
    /// # Errors
    ///
    /// Returns a [`CloneError`] if the handler of the stored type refuses to
    /// clone it.
    pub fn try_clone(&self) -> Result<Self, CloneError> {
        let block = self.clone_block(INLINE)?;
        // SAFETY:
        // 1. The new block stores a copy of our object, which has the same concrete
        //    type, so our projection applies.
        Ok(unsafe { Self::from_block(block, self.projection.clone()) })
    }

    /// Creates an independent copy of the stored object, held as the base
    /// type `S` with the inline size `M`.
    ///
    /// # Errors
    ///
    /// Returns a [`CloneError`] if the handler of the stored type refuses to
    /// clone it.
    pub fn try_upcast<S, const M: usize>(&self) -> Result<Value<S, M>, CloneError>
    where
        S: ?Sized + Base<T>,
    {
        let block = self.clone_block(M)?;
        // SAFETY:
        // 1. The new block stores a copy of our object, and the widened projection
        //    starts from our projection.
        Ok(unsafe { Value::from_block(block, self.projection.clone().widen()) })
    }

    /// Creates an independent copy of the stored object, held as its concrete
    /// type `U` with the inline size `M`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cast`] if the stored object is not a `U`, and
    /// [`Error::Clone`] if its handler refuses to clone it.
    pub fn try_downcast<U, const M: usize>(&self) -> Result<Value<U, M>, Error>
    where
        U: 'static,
    {
        if !self.is::<U>() {
            return Err(CastError::new::<U>(self.type_name()).into());
        }
        let block = self.clone_block(M)?;
        // SAFETY:
        // 1. We just checked that the stored type, and thus the type of the copy,
        //    is `U`.
        Ok(unsafe { Value::from_block(block, Projection::direct::<U>()) })
    }

    /// Converts the value into a value of the base type `S` without copying
    /// the object.
    pub fn upcast<S>(self) -> Value<S, INLINE>
    where
        S: ?Sized + Base<T>,
    {
        let (handle, projection) = self.into_parts();
        Value::from_parts(
            Handle::from_descriptor(handle.into_descriptor().upcast()),
            projection.widen(),
        )
    }

    /// Converts the value into a value of the concrete type `U` without
    /// copying the object.
    ///
    /// # Errors
    ///
    /// Returns the value unchanged if the stored object is not a `U`.
    pub fn downcast<U: 'static>(self) -> Result<Value<U, INLINE>, Self> {
        let (handle, projection) = self.into_parts();
        match handle.downcast::<U>() {
            Ok(handle) => Ok(Value::from_parts(handle, Projection::direct::<U>())),
            Err(handle) => Err(Value::from_parts(handle, projection)),
        }
    }

    /// Clones the stored object into a box of its own.
    ///
    /// The copy never uses inline storage and is not observed by anything.
    ///
    /// # Errors
    ///
    /// Returns a [`CloneError`] if the handler of the stored type refuses to
    /// clone it.
    pub fn try_clone_boxed(&self) -> Result<Box<T>, CloneError> {
        let (data, dispatcher, _) = self.raw_parts();
        // SAFETY:
        // 1. `data` is the address of the object owned by `self`, and `dispatcher`
        //    belongs to it.
        // 2. `self` is borrowed for the duration of the call.
        let copy = unsafe { dispatcher.clone_boxed(data) };
        let copy = copy.ok_or_else(|| CloneError::new(dispatcher.type_name()))?;
        let view = self.projection.apply(copy);
        // SAFETY: `copy` comes from `Box::into_raw` for the concrete type, and `view`
        // has the same address with metadata for that type, so the box is rebuilt
        // with the layout it was allocated with.
        Ok(unsafe { Box::from_raw(view.as_ptr()) })
    }

    /// Moves the stored object out into a box.
    ///
    /// Inline objects are moved to the heap, detached objects are handed out
    /// as they are.
    ///
    /// A value that is still observed by handles cannot give its object away:
    /// this is a lifetime violation and terminates the process.
    #[must_use]
    pub fn into_box(self) -> Box<T> {
        let (mut handle, projection) = self.into_parts();
        let descriptor = handle.descriptor_mut();
        check_unobserved(descriptor);

        let block = descriptor.block();
        let Some(data) = block.detach() else {
            unreachable!("a live value always holds its object")
        };
        let data = if block.as_ref().is_inline() {
            // SAFETY:
            // 1. `data` points to the initialized inline object.
            // 2. The object has been detached and no other counts exist, so the
            //    inline slot is never read or dropped again.
            unsafe { descriptor.dispatcher().relocate(data) }
        } else {
            data
        };
        let view = projection.apply(data);
        // SAFETY: `data` comes from `Box::into_raw` for the concrete type, either in
        // `relocate` or when the block was created, and `view` has the same address
        // with metadata for that type.
        unsafe { Box::from_raw(view.as_ptr()) }
    }

    /// Returns a mutable reference to the stored object, or `None` while
    /// handles observe it.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.handle.descriptor_mut().strong_count() != 1 {
            return None;
        }
        atomic::fence(atomic::Ordering::Acquire);
        let mut view = self.view;
        // SAFETY: Ours is the only count on the block, so no handle or guard can
        // read the object, and creating a new one requires borrowing `self`.
        Some(unsafe { view.as_mut() })
    }

    /// Creates a handle observing this value.
    #[must_use]
    pub fn handle(&self) -> Handle<T> {
        self.handle.clone()
    }

    /// Creates a handle observing this value as the base type `S`.
    #[must_use]
    pub fn handle_as<S>(&self) -> Handle<S>
    where
        S: ?Sized + Base<T>,
    {
        self.handle.upcast()
    }

    /// Creates a handle observing this value as its concrete type `U`.
    ///
    /// # Errors
    ///
    /// Returns a [`CastError`] if the stored object is not a `U`.
    pub fn try_handle<U: 'static>(&self) -> Result<Handle<U>, CastError> {
        self.handle.try_downcast()
    }

    /// The number of handles and [`HandleRef`](crate::HandleRef)s currently
    /// observing this value.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handle.strong_count() - 1
    }

    /// Whether the stored object is co-allocated with its storage block.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.handle
            .with_descriptor(|descriptor| descriptor.block().as_ref().is_inline())
    }

    /// Whether the stored object is a `U`.
    #[must_use]
    pub fn is<U: 'static>(&self) -> bool {
        self.handle.is::<U>()
    }

    /// The [`TypeId`] of the concrete type of the stored object.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.handle.type_id()
    }

    /// The [`core::any::type_name`] of the concrete type of the stored object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.handle.type_name()
    }

    /// The size of the concrete type of the stored object, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handle.size()
    }
}

/// Reports a lifetime violation unless `descriptor` holds the only count.
fn check_unobserved<T: ?Sized + 'static>(descriptor: &Descriptor<T>) {
    let count = descriptor.strong_count();
    if count != 1 {
        let dispatcher = descriptor.dispatcher();
        hooks::lifetime_violation(LifetimeViolation::new::<T>(
            dispatcher.type_name(),
            dispatcher.type_id(),
            count - 1,
        ));
    }
}

impl<T: ?Sized + 'static, const INLINE: usize> Drop for Value<T, INLINE> {
    fn drop(&mut self) {
        let descriptor = self.handle.descriptor_mut();
        let data = descriptor.block().detach();
        check_unobserved(descriptor);
        if let Some(data) = data {
            // SAFETY:
            // 1. `data` was just detached from this block.
            // 2. No other counts exist and the value is being dropped, so nothing
            //    accesses the object again.
            unsafe { descriptor.block().as_ref().dispose(data) }
        }
    }
}

impl<T: ?Sized + 'static, const INLINE: usize> Clone for Value<T, INLINE> {
    /// Creates an independent copy of the stored object.
    ///
    /// # Panics
    ///
    /// Panics if the stored type cannot be cloned; use
    /// [`Value::try_clone`] to handle that case.
    #[track_caller]
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }
}

impl<T: ?Sized + 'static, const INLINE: usize> Deref for Value<T, INLINE> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: The object lives until `self` is dropped, and `&mut` access
        // requires a unique borrow of `self`.
        unsafe { self.view.as_ref() }
    }
}

impl<T: ?Sized + 'static, const INLINE: usize> DerefMut for Value<T, INLINE> {
    /// # Panics
    ///
    /// Panics while handles observe the value; use [`Value::get_mut`] to
    /// handle that case.
    #[track_caller]
    fn deref_mut(&mut self) -> &mut T {
        let descriptor = self.handle.descriptor_mut();
        let count = descriptor.strong_count();
        if count != 1 {
            panic!(
                "cannot mutably borrow a `{}` while {} handle(s) observe it",
                descriptor.dispatcher().type_name(),
                count - 1
            );
        }
        atomic::fence(atomic::Ordering::Acquire);
        let mut view = self.view;
        // SAFETY: Same as in `get_mut`.
        unsafe { view.as_mut() }
    }
}

impl<T: ?Sized + 'static, const INLINE: usize> AsRef<T> for Value<T, INLINE> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T, U, const INLINE: usize> From<&Value<U, INLINE>> for Handle<T>
where
    T: ?Sized + Base<U>,
    U: ?Sized + 'static,
{
    fn from(value: &Value<U, INLINE>) -> Self {
        value.handle_as()
    }
}

impl<T: ?Sized + fmt::Debug + 'static, const INLINE: usize> fmt::Debug for Value<T, INLINE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display + 'static, const INLINE: usize> fmt::Display for Value<T, INLINE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T, const INLINE: usize, const M: usize> PartialEq<Value<T, M>> for Value<T, INLINE>
where
    T: ?Sized + PartialEq + 'static,
{
    fn eq(&self, other: &Value<T, M>) -> bool {
        **self == **other
    }
}

impl<T: ?Sized + Eq + 'static, const INLINE: usize> Eq for Value<T, INLINE> {}

#[cfg(test)]
mod tests {
    use alloc::{format, rc::Rc, string::String, vec, vec::Vec};
    use core::cell::Cell;

    use super::*;
    use crate::handlers::Uncloneable;

    trait Instrument {
        fn play(&self) -> String;
        fn tune(&mut self, pitch: u32);
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Flute {
        pitch: u32,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Organ {
        pipes: [u64; 8],
    }

    impl Instrument for Flute {
        fn play(&self) -> String {
            format!("flute at {}", self.pitch)
        }

        fn tune(&mut self, pitch: u32) {
            self.pitch = pitch;
        }
    }

    impl Instrument for Organ {
        fn play(&self) -> String {
            format!("organ with {} pipes", self.pipes.len())
        }

        fn tune(&mut self, pitch: u32) {
            self.pipes = [u64::from(pitch); 8];
        }
    }

    crate::impl_base!(dyn Instrument);

    #[derive(Clone)]
    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    static_assertions::assert_impl_all!(Value<u32>: Send, Sync, Clone);
    static_assertions::assert_not_impl_any!(Value<Cell<u32>>: Sync);
    static_assertions::assert_not_impl_any!(Value<Cell<u32>>: Send);
    static_assertions::assert_not_impl_any!(Value<dyn Instrument>: Send, Sync);

    #[test]
    fn test_storage_selection() {
        let small: Value<dyn Instrument> = Value::new(Flute { pitch: 440 });
        let large: Value<dyn Instrument> = Value::new(Organ { pipes: [1; 8] });
        let forced: Value<dyn Instrument, 0> = Value::new(Flute { pitch: 440 });

        assert!(small.is_inline());
        assert!(!large.is_inline());
        assert!(!forced.is_inline());
        assert_eq!(small.size(), 4);
        assert_eq!(large.size(), 64);
    }

    #[test]
    fn test_clone_is_deep() {
        let original: Value<dyn Instrument> = Value::new(Flute { pitch: 440 });
        let mut copy = original.clone();
        copy.tune(432);

        assert_eq!(original.play(), "flute at 440");
        assert_eq!(copy.play(), "flute at 432");
        assert!(!original.handle().ptr_eq(&copy.handle()));
    }

    #[test]
    fn test_clone_keeps_type_information() {
        let original: Value<dyn Instrument> = Value::new(Organ { pipes: [2; 8] });
        let copy = original.try_clone().unwrap();

        assert_eq!(copy.type_name(), original.type_name());
        assert_eq!(copy.type_id(), TypeId::of::<Organ>());
        assert_eq!(copy.size(), original.size());
        assert_eq!(
            copy.try_handle::<Organ>().unwrap().get().pipes,
            original.try_handle::<Organ>().unwrap().get().pipes
        );
    }

    #[test]
    fn test_uncloneable() {
        let value: Value<dyn Instrument> =
            Value::new_custom::<Flute, Uncloneable>(Flute { pitch: 1 });
        let Err(error) = value.try_clone() else {
            panic!("uncloneable value was cloned");
        };
        assert_eq!(error.type_name(), core::any::type_name::<Flute>());
        assert!(value.try_clone_boxed().is_err());
        assert!(value.try_upcast::<dyn Instrument, 64>().is_err());
        assert_eq!(
            value.try_downcast::<Flute, 16>().unwrap_err(),
            Error::Clone(error)
        );
    }

    #[test]
    #[should_panic(expected = "cannot be cloned")]
    fn test_clone_panics_when_uncloneable() {
        let value: Value<u8> = Value::new_custom::<u8, Uncloneable>(1);
        let _copy = value.clone();
    }

    #[test]
    fn test_drop_releases_once() {
        let drops = Rc::new(Cell::new(0));
        {
            let _inline: Value<Tracked> = Value::new(Tracked(drops.clone()));
            let _detached: Value<Tracked, 0> = Value::new(Tracked(drops.clone()));
            let _boxed: Value<Tracked> = Value::from_box(Box::new(Tracked(drops.clone())));
        }
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn test_from_raw() {
        // SAFETY: A null pointer is always accepted.
        let result = unsafe { Value::<dyn Instrument>::from_raw::<Flute>(core::ptr::null_mut()) };
        assert_eq!(result.err(), Some(Error::NullPointer));

        let ptr = Box::into_raw(Box::new(Flute { pitch: 3 }));
        // SAFETY: The pointer comes from `Box::into_raw` and is not used again.
        let value: Value<dyn Instrument> = unsafe { Value::from_raw(ptr) }.unwrap();
        assert_eq!(value.play(), "flute at 3");
        assert!(!value.is_inline());
    }

    #[test]
    fn test_mutation_requires_no_observers() {
        let mut value: Value<dyn Instrument> = Value::new(Flute { pitch: 1 });
        let handle = value.handle();
        assert!(value.get_mut().is_none());
        drop(handle);

        value.get_mut().unwrap().tune(2);
        assert_eq!(value.play(), "flute at 2");
    }

    #[test]
    #[should_panic(expected = "while 1 handle(s) observe it")]
    fn test_deref_mut_panics_when_observed() {
        // Dropping an observed value would abort, so the value is leaked.
        let mut value: ManuallyDrop<Value<dyn Instrument>> =
            ManuallyDrop::new(Value::new(Flute { pitch: 1 }));
        let _handle = value.handle();
        value.tune(5);
    }

    #[test]
    fn test_upcast_and_downcast() {
        let flute: Value<Flute> = Value::new(Flute { pitch: 7 });
        let wide: Value<dyn Instrument> = flute.try_upcast::<dyn Instrument, 16>().unwrap();
        assert_eq!(wide.play(), "flute at 7");

        let narrow: Value<Flute, 16> = wide.try_downcast::<Flute, 16>().unwrap();
        assert_eq!(*narrow, Flute { pitch: 7 });
        assert_eq!(narrow, flute);

        let error = wide.try_downcast::<Organ, 16>().unwrap_err();
        assert!(matches!(error, Error::Cast(_)));

        let moved: Value<dyn Instrument> = flute.upcast();
        let moved = moved.downcast::<Organ>().unwrap_err();
        let Ok(moved) = moved.downcast::<Flute>() else {
            panic!("value lost its concrete type");
        };
        assert_eq!(moved.pitch, 7);
    }

    /// Address of the object a value or handle dereferences to.
    fn address<T: ?Sized>(value: &T) -> *const u8 {
        core::ptr::from_ref(value).cast::<u8>()
    }

    #[test]
    fn test_deref_follows_casts() {
        let flute: Value<Flute> = Value::new(Flute { pitch: 3 });
        let handle = flute.handle();
        let at = address(&*handle.get());
        assert_eq!(address(&*flute), at);
        drop(handle);

        let mut wide: Value<dyn Instrument> = flute.upcast();
        assert_eq!(address(&*wide), at);
        wide.tune(4);
        assert_eq!(wide.play(), "flute at 4");

        let Ok(mut narrow) = wide.downcast::<Flute>() else {
            panic!("value lost its concrete type");
        };
        assert_eq!(address(&*narrow), at);
        narrow.pitch = 5;
        assert_eq!(narrow.handle().get().pitch, 5);
    }

    #[test]
    fn test_clone_boxed_and_into_box() {
        let value: Value<dyn Instrument> = Value::new(Flute { pitch: 9 });
        let boxed: Box<dyn Instrument> = value.try_clone_boxed().unwrap();
        assert_eq!(boxed.play(), "flute at 9");

        let inner = value.into_box();
        assert_eq!(inner.play(), "flute at 9");

        let drops = Rc::new(Cell::new(0));
        let detached: Value<Tracked, 0> = Value::new(Tracked(drops.clone()));
        let inner = detached.into_box();
        assert_eq!(drops.get(), 0);
        drop(inner);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_handles() {
        let value: Value<dyn Instrument> = Value::new(Organ { pipes: [0; 8] });
        let handles: Vec<Handle<dyn Instrument>> = vec![value.handle(); 3];
        assert_eq!(value.handle_count(), 3);
        assert!(value.try_handle::<Flute>().is_err());

        let exact: Handle<Organ> = value.try_handle().unwrap();
        let from: Handle<dyn Instrument> = Handle::from(&value);
        assert!(exact.ptr_eq(&from));
        assert_eq!(value.handle_count(), 5);

        drop((handles, exact, from));
        assert_eq!(value.handle_count(), 0);
    }

    #[test]
    fn test_formatting() {
        let value: Value<u32> = Value::new(12);
        assert_eq!(format!("{value} {value:?}"), "12 12");
    }
}
