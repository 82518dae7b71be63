//! Dispatch table for operations on type-erased values.
//!
//! This module contains the [`Dispatcher`] which enables cloning, dropping and
//! describing a stored value when its concrete type `U` and handler type `H`
//! have been erased. One dispatcher exists per instantiated `(U, H)` pair; it
//! is created in a `const` block and lives for `'static`.
//!
//! This module encapsulates the fields of [`Dispatcher`] so they cannot be
//! accessed directly. This visibility restriction guarantees the safety
//! invariant: **all function pointers are instantiated with the same `U` and
//! `H`**. Whether a given erased address actually holds a `U` is the caller's
//! obligation, which is why the value operations are `unsafe`.

use alloc::boxed::Box;
use core::{alloc::Layout, any::TypeId, ptr::NonNull};

use crate::{block::RawBlock, handlers::ValueHandler, util::Erased};

/// Where a freshly cloned value should be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Co-allocated inside the new block
    Inline,
    /// In a heap allocation of its own
    Detached,
}

impl Placement {
    /// Chooses [`Placement::Inline`] if a value of `size` bytes fits into
    /// `inline_limit` bytes, and [`Placement::Detached`] otherwise.
    #[inline]
    pub const fn for_size(size: usize, inline_limit: usize) -> Self {
        if size <= inline_limit {
            Placement::Inline
        } else {
            Placement::Detached
        }
    }
}

/// Dispatch table for operations on a type-erased value.
///
/// # Safety
///
/// The following safety invariants are guaranteed to be upheld as long as this
/// struct exists:
///
/// * All fields point to the functions defined below
/// * The concrete pointers are all instantiated with the same value type `U`
///   and handler type `H` that were used to create this `Dispatcher`.
#[derive(Clone, Copy)]
pub struct Dispatcher {
    /// Gets the [`TypeId`] of the value type that was used to create this
    /// [`Dispatcher`].
    type_id: fn() -> TypeId,
    /// Gets the [`core::any::type_name`] of the value type.
    type_name: fn() -> &'static str,
    /// Gets the [`Layout`] of the value type.
    layout: fn() -> Layout,
    /// Gets the [`TypeId`] of the handler that was used to create this
    /// [`Dispatcher`].
    handler_type_id: fn() -> TypeId,
    /// Clones the value into a new block.
    clone: unsafe fn(NonNull<Erased>, Placement) -> Option<RawBlock>,
    /// Clones the value into a new box.
    clone_boxed: unsafe fn(NonNull<Erased>) -> Option<NonNull<Erased>>,
    /// Drops a boxed value and frees the box.
    delete: unsafe fn(NonNull<Erased>),
    /// Drops a value in place.
    destruct: unsafe fn(NonNull<Erased>),
    /// Moves a value out of its current storage into a new box.
    relocate: unsafe fn(NonNull<Erased>) -> NonNull<Erased>,
}

impl Dispatcher {
    /// Creates a new [`Dispatcher`] for the value type `U` and the handler
    /// type `H`.
    pub const fn new<U: 'static, H: ValueHandler<U>>() -> &'static Self {
        const {
            &Self {
                type_id: TypeId::of::<U>,
                type_name: core::any::type_name::<U>,
                layout: Layout::new::<U>,
                handler_type_id: TypeId::of::<H>,
                clone: clone::<U, H>,
                clone_boxed: clone_boxed::<U, H>,
                delete: delete::<U>,
                destruct: destruct::<U>,
                relocate: relocate::<U>,
            }
        }
    }

    /// Gets the [`TypeId`] of the value type that was used to create this
    /// [`Dispatcher`].
    #[inline]
    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Gets the [`core::any::type_name`] of the value type that was used to
    /// create this [`Dispatcher`].
    #[inline]
    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }

    /// Gets the [`Layout`] of the value type.
    #[inline]
    pub fn layout(&self) -> Layout {
        (self.layout)()
    }

    /// Gets the size in bytes of the value type.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout().size()
    }

    /// Gets the [`TypeId`] of the handler that was used to create this
    /// [`Dispatcher`].
    #[inline]
    pub fn handler_type_id(&self) -> TypeId {
        (self.handler_type_id)()
    }

    /// Clones the value at `value` into a brand-new block with a strong count
    /// of 1.
    ///
    /// Returns `None` if the handler refuses to clone the value.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `value` points to an initialized value of the type this
    ///    [`Dispatcher`] was created for.
    /// 2. The value is not mutated for the duration of the call.
    #[inline]
    pub unsafe fn clone(&self, value: NonNull<Erased>, placement: Placement) -> Option<RawBlock> {
        // SAFETY: We know that `self.clone` points to the function `clone::<U, H>`
        // below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.clone)(value, placement) }
    }

    /// Clones the value at `value` into a new heap allocation that is not
    /// bound to any block.
    ///
    /// Returns `None` if the handler refuses to clone the value. On success
    /// the returned pointer was created by [`Box::into_raw`] for a `Box<U>`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `value` points to an initialized value of the type this
    ///    [`Dispatcher`] was created for.
    /// 2. The value is not mutated for the duration of the call.
    #[inline]
    pub unsafe fn clone_boxed(&self, value: NonNull<Erased>) -> Option<NonNull<Erased>> {
        // SAFETY: We know that `self.clone_boxed` points to the function
        // `clone_boxed::<U, H>` below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.clone_boxed)(value) }
    }

    /// Drops the boxed value at `value` and frees its allocation.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `value` was created by [`Box::into_raw`] for a `Box<U>`, where `U`
    ///    is the type this [`Dispatcher`] was created for.
    /// 2. `value` is not used after calling this method.
    #[inline]
    pub unsafe fn delete(&self, value: NonNull<Erased>) {
        // SAFETY: We know that `self.delete` points to the function `delete::<U>`
        // below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.delete)(value) }
    }

    /// Drops the value at `value` in place without releasing its storage.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `value` points to an initialized value of the type this
    ///    [`Dispatcher`] was created for, valid for writes.
    /// 2. The value is treated as uninitialized after calling this method.
    #[inline]
    pub unsafe fn destruct(&self, value: NonNull<Erased>) {
        // SAFETY: We know that `self.destruct` points to the function `destruct::<U>`
        // below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.destruct)(value) }
    }

    /// Moves the value at `value` into a new box and returns the pointer
    /// created by [`Box::into_raw`].
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `value` points to an initialized value of the type this
    ///    [`Dispatcher`] was created for.
    /// 2. The old location is treated as uninitialized after calling this
    ///    method; in particular its value is never dropped.
    #[inline]
    pub unsafe fn relocate(&self, value: NonNull<Erased>) -> NonNull<Erased> {
        // SAFETY: We know that `self.relocate` points to the function `relocate::<U>`
        // below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.relocate)(value) }
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("type_name", &self.type_name())
            .field("layout", &self.layout())
            .finish_non_exhaustive()
    }
}

/// Clones a value through its handler into a new block.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `value` points to an initialized `U`
/// 2. The value is not mutated for the duration of the call
unsafe fn clone<U: 'static, H: ValueHandler<U>>(
    value: NonNull<Erased>,
    placement: Placement,
) -> Option<RawBlock> {
    // SAFETY:
    // 1. Guaranteed by the caller
    // 2. Guaranteed by the caller
    let value: &U = unsafe { value.cast::<U>().as_ref() };
    let cloned = H::try_clone(value)?;
    Some(match placement {
        Placement::Inline => RawBlock::new_inline::<U, H>(cloned),
        Placement::Detached => RawBlock::new_detached::<U, H>(Box::new(cloned)),
    })
}

/// Clones a value through its handler into a new box.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `value` points to an initialized `U`
/// 2. The value is not mutated for the duration of the call
unsafe fn clone_boxed<U: 'static, H: ValueHandler<U>>(
    value: NonNull<Erased>,
) -> Option<NonNull<Erased>> {
    // SAFETY:
    // 1. Guaranteed by the caller
    // 2. Guaranteed by the caller
    let value: &U = unsafe { value.cast::<U>().as_ref() };
    let cloned: &mut U = Box::leak(Box::new(H::try_clone(value)?));
    Some(NonNull::from(cloned).cast::<Erased>())
}

/// Drops a boxed `U` and frees the box.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `value` was created by `Box::into_raw` for a `Box<U>`
/// 2. `value` is not used afterwards
unsafe fn delete<U: 'static>(value: NonNull<Erased>) {
    // SAFETY:
    // 1. Guaranteed by the caller
    // 2. Guaranteed by the caller
    let boxed: Box<U> = unsafe { Box::from_raw(value.cast::<U>().as_ptr()) };
    core::mem::drop(boxed);
}

/// Drops a `U` in place.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `value` points to an initialized `U`, valid for writes
/// 2. The value is treated as uninitialized afterwards
unsafe fn destruct<U: 'static>(value: NonNull<Erased>) {
    // SAFETY:
    // 1. Guaranteed by the caller
    // 2. Guaranteed by the caller
    unsafe { core::ptr::drop_in_place(value.cast::<U>().as_ptr()) }
}

/// Moves a `U` into a new box.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. `value` points to an initialized `U`
/// 2. The old location is treated as uninitialized afterwards
unsafe fn relocate<U: 'static>(value: NonNull<Erased>) -> NonNull<Erased> {
    // SAFETY:
    // 1. Guaranteed by the caller
    // 2. Guaranteed by the caller
    let moved: U = unsafe { value.cast::<U>().as_ptr().read() };
    NonNull::from(Box::leak(Box::new(moved))).cast::<Erased>()
}
