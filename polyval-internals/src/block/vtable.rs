//! Vtable for type-erased block operations.
//!
//! This module contains the [`BlockVtable`] which enables releasing, cloning
//! and counting blocks when their storage type `S` has been erased. The vtable
//! stores function pointers that dispatch to the correct typed
//! implementations.
//!
//! This module encapsulates the fields of [`BlockVtable`] so they cannot be
//! accessed directly. This visibility restriction guarantees the safety
//! invariant: **the vtable's type parameter must match the actual storage
//! type of the `BlockData`**.
//!
//! # Safety Invariant
//!
//! This invariant is maintained because vtables are created as `&'static`
//! references via [`BlockVtable::new`], which pairs the function pointers
//! with a specific storage type `S` at compile time.

use core::ptr::NonNull;

use crate::{
    block::{
        data::{BlockData, Storage},
        raw::RawBlock,
    },
    util::Erased,
};

/// Vtable for type-erased block operations.
///
/// # Safety
///
/// The following safety invariants are guaranteed to be upheld as long as this
/// struct exists:
///
/// * The fields `drop`, `clone_arc` and `strong_count` all point to the
///   functions defined below
/// * The concrete pointers are all instantiated with the same storage type
///   `S` that was used to create this `BlockVtable`, and `inline` is
///   `S::INLINE`.
pub(crate) struct BlockVtable {
    /// Method to drop the [`triomphe::Arc<BlockData<S>>`] instance pointed to
    /// by this pointer.
    drop: unsafe fn(NonNull<BlockData<Erased>>),
    /// Clones the `triomphe::Arc<BlockData<S>>` pointed to by this pointer.
    clone_arc: unsafe fn(NonNull<BlockData<Erased>>) -> RawBlock,
    /// Gets the strong count of the [`triomphe::Arc<BlockData<S>>`] pointed to
    /// by this pointer.
    strong_count: unsafe fn(NonNull<BlockData<Erased>>) -> usize,
    /// Whether the storage type co-allocates the value with the block.
    inline: bool,
}

impl BlockVtable {
    /// Creates a new [`BlockVtable`] for the storage type `S`.
    pub(super) const fn new<S: Storage>() -> &'static Self {
        const {
            &Self {
                drop: drop::<S>,
                clone_arc: clone_arc::<S>,
                strong_count: strong_count::<S>,
                inline: S::INLINE,
            }
        }
    }

    /// Whether blocks with this vtable store their value inline.
    #[inline]
    pub(super) fn is_inline(&self) -> bool {
        self.inline
    }

    /// Drops the `triomphe::Arc<BlockData<S>>` instance pointed to by this
    /// pointer.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The pointer comes from a [`triomphe::Arc<BlockData<S>>`] turned into
    ///    a pointer via [`triomphe::Arc::into_raw`]
    /// 2. This [`BlockVtable`] must be a vtable for the storage type of the
    ///    [`BlockData`].
    /// 3. The pointer is not used after calling this method. Storing the
    ///    pointer in structures that claim ownership of it, such as another
    ///    `Arc` counts as using after calling this method.
    #[inline]
    pub(super) unsafe fn drop(&self, ptr: NonNull<BlockData<Erased>>) {
        // SAFETY: We know that `self.drop` points to the function `drop::<S>` below.
        // That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        // 3. Guaranteed by the caller
        unsafe {
            (self.drop)(ptr);
        }
    }

    /// Clones the [`triomphe::Arc<BlockData<S>>`] pointed to by this pointer.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The pointer comes from a [`triomphe::Arc<BlockData<S>>`] turned into
    ///    a pointer via [`triomphe::Arc::into_raw`]
    /// 2. This [`BlockVtable`] must be a vtable for the storage type of the
    ///    [`BlockData`].
    /// 3. All other references to this block are compatible with shared
    ///    ownership. Specifically none of them assume that the strong_count is
    ///    `1`.
    #[inline]
    pub(super) unsafe fn clone_arc(&self, ptr: NonNull<BlockData<Erased>>) -> RawBlock {
        // SAFETY: We know that `self.clone_arc` points to the function `clone_arc::<S>`
        // below. That function's safety requirements are upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        // 3. Guaranteed by the caller
        unsafe { (self.clone_arc)(ptr) }
    }

    /// Gets the strong count of the [`triomphe::Arc<BlockData<S>>`] pointed to
    /// by this pointer.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. The pointer comes from [`triomphe::Arc<BlockData<S>>`] via
    ///    [`triomphe::Arc::into_raw`]
    /// 2. This [`BlockVtable`] must be a vtable for the storage type of the
    ///    [`BlockData`].
    #[inline]
    pub(super) unsafe fn strong_count(&self, ptr: NonNull<BlockData<Erased>>) -> usize {
        // SAFETY: We know that `self.strong_count` points to the function
        // `strong_count::<S>` below. That function's safety requirements are
        // upheld:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        unsafe { (self.strong_count)(ptr) }
    }
}

/// Drops the [`triomphe::Arc<BlockData<S>>`] instance pointed to by this
/// pointer.
///
/// Neither storage kind drops the value itself; an inline slot is a
/// `MaybeUninit`.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. The pointer comes from [`triomphe::Arc<BlockData<S>>`] via
///    [`triomphe::Arc::into_raw`]
/// 2. The storage type `S` matches the actual storage of the [`BlockData`]
/// 3. The pointer is not used after calling this method. Storing the
///    pointer in structures that claim ownership of it, such as another
///    `Arc` counts as using after calling this method.
unsafe fn drop<S: Storage>(ptr: NonNull<BlockData<Erased>>) {
    let ptr: NonNull<BlockData<S>> = ptr.cast();
    let ptr = ptr.as_ptr();
    // SAFETY:
    // 1. The pointer has the correct type and came from `Arc::into_raw` (guaranteed
    //    by caller)
    // 2. After `from_raw`, the pointer is consumed and not accessed again
    let arc = unsafe { triomphe::Arc::from_raw(ptr) };
    core::mem::drop(arc);
}

/// Clones the [`triomphe::Arc<BlockData<S>>`] pointed to by this pointer.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. The pointer comes from a [`triomphe::Arc<BlockData<S>>`] turned into a
///    pointer via [`triomphe::Arc::into_raw`]
/// 2. The storage type `S` matches the actual storage of the [`BlockData`]
/// 3. All other references to this block are compatible with shared ownership.
///    Specifically none of them assume that the strong_count is `1`.
unsafe fn clone_arc<S: Storage>(ptr: NonNull<BlockData<Erased>>) -> RawBlock {
    let ptr: *const BlockData<S> = ptr.cast::<BlockData<S>>().as_ptr();

    // SAFETY: The pointer is valid and came from `Arc::into_raw` with the correct
    // type (guaranteed by the caller), which fulfills the requirements for
    // `ArcBorrow::from_ptr`.
    let arc_borrow = unsafe { triomphe::ArcBorrow::from_ptr(ptr) };

    let arc = arc_borrow.clone_arc();
    RawBlock::from_arc(arc)
}

/// Gets the strong count of the [`triomphe::Arc<BlockData<S>>`] pointed to by
/// this pointer.
///
/// # Safety
///
/// The caller must ensure:
///
/// 1. The pointer comes from [`triomphe::Arc<BlockData<S>>`] via
///    [`triomphe::Arc::into_raw`]
/// 2. The storage type `S` matches the actual storage of the [`BlockData`]
unsafe fn strong_count<S: Storage>(ptr: NonNull<BlockData<Erased>>) -> usize {
    let ptr: *const BlockData<S> = ptr.cast::<BlockData<S>>().as_ptr();

    // SAFETY: The pointer is valid and came from `Arc::into_raw` with the correct
    // type (guaranteed by the caller), which fulfills the requirements for
    // `ArcBorrow::from_ptr`.
    let arc_borrow = unsafe { triomphe::ArcBorrow::from_ptr(ptr) };

    triomphe::ArcBorrow::strong_count(&arc_borrow)
}
