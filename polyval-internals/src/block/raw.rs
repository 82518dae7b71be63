//! Type-erased block pointer types.
//!
//! This module encapsulates the `ptr` field of [`RawBlock`] and
//! [`RawBlockRef`], ensuring it is only visible within this module. This
//! visibility restriction guarantees the safety invariant: **the pointer always
//! comes from `Arc<BlockData<S>>`**.
//!
//! # Safety Invariant
//!
//! Since the `ptr` field can only be set via [`RawBlock::from_arc`] (which
//! creates it from `Arc::into_raw`), and cannot be modified afterward, the
//! pointer provenance remains valid throughout the value's lifetime.
//!
//! The [`RawBlock::drop`] implementation and reference counting operations
//! rely on this invariant to safely reconstruct the `Arc` and manage memory.
//!
//! # Counting
//!
//! Every [`RawBlock`] is exactly one strong count on the underlying
//! [`triomphe::Arc`]. Cloning a [`RawBlock`] increments the count, dropping it
//! decrements the count, and the decrement to zero frees the block allocation.
//! The stored value is not touched by any of this.

use alloc::boxed::Box;
use core::{ptr::NonNull, sync::atomic::Ordering};

use crate::{
    block::data::{BlockData, Detached, Slot, Storage},
    handlers::ValueHandler,
    util::Erased,
};

/// A pointer to a [`BlockData`] that is guaranteed to point to an initialized
/// instance of a [`BlockData<S>`] for some specific storage `S`, though we do
/// not know which actual `S` it is.
///
/// The pointer is guaranteed to have been created using
/// [`triomphe::Arc::into_raw`].
#[repr(transparent)]
pub struct RawBlock {
    /// Pointer to the inner block data
    ///
    /// # Safety
    ///
    /// The following safety invariants are guaranteed to be upheld as long as
    /// this struct exists:
    ///
    /// 1. The pointer must have been created from a
    ///    `triomphe::Arc<BlockData<S>>` for some `S` using
    ///    `triomphe::Arc::into_raw`.
    /// 2. The pointer retains full provenance over the `Arc` for the entire
    ///    lifetime of this object (i.e., it was not derived from a `&T`)
    /// 3. The pointer will point to the same `BlockData<S>` for the entire
    ///    lifetime of this object.
    ptr: NonNull<BlockData<Erased>>,
}

impl RawBlock {
    /// Creates a new [`RawBlock`] from a [`triomphe::Arc<BlockData<S>>`].
    #[inline]
    pub(super) fn from_arc<S: Storage>(data: triomphe::Arc<BlockData<S>>) -> Self {
        let ptr: *const BlockData<S> = triomphe::Arc::into_raw(data);
        let ptr: *mut BlockData<Erased> = ptr.cast::<BlockData<Erased>>().cast_mut();

        // SAFETY:
        // 1. Triomphe guarantees that `Arc::into_raw` returns a non-null pointer.
        let ptr: NonNull<BlockData<Erased>> = unsafe { NonNull::new_unchecked(ptr) };

        Self {
            // SAFETY:
            // 1. We just created the pointer using `triomphe::Arc::into_raw`.
            // 2. We have provenance and we are not locally changing that here
            // 3. We are creating the object here and we are not changing the pointer.
            ptr,
        }
    }

    /// Creates a new [`RawBlock`] that stores `value` inline, inside the
    /// block's own allocation.
    ///
    /// The created block will have a strong count of 1.
    #[inline]
    pub fn new_inline<U, H>(value: U) -> Self
    where
        U: 'static,
        H: ValueHandler<U>,
    {
        Self::from_arc(BlockData::<Slot<U>>::new_inline::<H>(value))
    }

    /// Creates a new [`RawBlock`] that takes ownership of the boxed `value`.
    ///
    /// The created block will have a strong count of 1.
    #[inline]
    pub fn new_detached<U, H>(value: Box<U>) -> Self
    where
        U: 'static,
        H: ValueHandler<U>,
    {
        Self::from_arc(BlockData::<Detached>::new_detached::<U, H>(value))
    }

    /// Creates a new detached [`RawBlock`] bound to a value that already lives
    /// at `ptr`.
    ///
    /// Returns `None` if `ptr` is null. A block always backs a real value.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. If `ptr` is not null, it was obtained from [`Box::into_raw`] for a
    ///    `Box<U>`.
    /// 2. Ownership of the pointed-to value is transferred to the block: the
    ///    caller does not use or free `ptr` afterwards.
    #[inline]
    pub unsafe fn from_raw_parts<U, H>(ptr: *mut U) -> Option<Self>
    where
        U: 'static,
        H: ValueHandler<U>,
    {
        let ptr = NonNull::new(ptr)?;
        // SAFETY:
        // 1. Guaranteed by the caller
        // 2. Guaranteed by the caller
        let value: Box<U> = unsafe { Box::from_raw(ptr.as_ptr()) };
        Some(Self::new_detached::<U, H>(value))
    }

    /// Returns a reference to the [`BlockData`] instance.
    #[inline]
    pub fn as_ref(&self) -> RawBlockRef<'_> {
        RawBlockRef {
            // SAFETY:
            // 1. Guaranteed by the invariants on `RawBlock`
            // 2. Guaranteed by the invariants on `RawBlock`
            // 3. We are creating the `RawBlockRef` here, and we are
            //    not changing the pointer
            ptr: self.ptr,
            _marker: core::marker::PhantomData,
        }
    }

    /// Atomically replaces the data address with null and returns the
    /// previous address.
    ///
    /// After this call every attempt to read the value through this block
    /// observes that it is gone. The caller becomes responsible for releasing
    /// the value, normally through [`RawBlockRef::dispose`].
    #[inline]
    pub fn detach(&self) -> Option<NonNull<Erased>> {
        let previous = self
            .as_ref()
            .data_cell()
            .swap(core::ptr::null_mut(), Ordering::AcqRel);
        NonNull::new(previous)
    }
}

impl Clone for RawBlock {
    #[inline]
    fn clone(&self) -> Self {
        self.as_ref().clone_arc()
    }
}

impl core::ops::Drop for RawBlock {
    #[inline]
    fn drop(&mut self) {
        let vtable = self.as_ref().vtable();

        // SAFETY:
        // 1. The pointer comes from `Arc::into_raw` (guaranteed by `RawBlock::from_arc`)
        // 2. The vtable returned by `self.as_ref().vtable()` is guaranteed to match the
        //    storage in the `BlockData`.
        // 3. The pointer is not used after this call (we're in the drop function)
        unsafe {
            vtable.drop(self.ptr);
        }
    }
}

impl core::fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.as_ref(), f)
    }
}

/// A lifetime-bound pointer to a [`BlockData`] that is guaranteed to point
/// to an initialized instance of a [`BlockData<S>`] for some specific `S`,
/// though we do not know which actual `S` it is.
///
/// # Safety invariants
///
/// This reference behaves like a `&'a BlockData<S>` for some unknown `S`:
///
/// 1. The pointee is properly initialized for the entire lifetime `'a`.
/// 2. The pointee is only mutated through its atomic `data` field for the
///    entire lifetime `'a`.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct RawBlockRef<'a> {
    /// Pointer to the inner block data
    ///
    /// # Safety
    ///
    /// The following safety invariants are guaranteed to be upheld as long as
    /// this struct exists:
    ///
    /// 1. The pointer must have been created from a
    ///    `triomphe::Arc<BlockData<S>>` for some `S` using
    ///    `triomphe::Arc::into_raw`.
    /// 2. The pointer retains full provenance over the `Arc` for the entire
    ///    lifetime of this object (i.e., it was not derived from a `&T`)
    /// 3. The pointer will point to the same `BlockData<S>` for the entire
    ///    lifetime of this object.
    ptr: NonNull<BlockData<Erased>>,

    /// Marker to tell the compiler that we should
    /// behave the same as a `&'a BlockData<Erased>`
    _marker: core::marker::PhantomData<&'a BlockData<Erased>>,
}

impl<'a> RawBlockRef<'a> {
    /// Returns a pointer to the [`BlockData`] instance.
    #[inline]
    pub(super) fn as_ptr(self) -> *const BlockData<Erased> {
        self.ptr.as_ptr()
    }

    /// Clones the inner [`triomphe::Arc`] and returns a new [`RawBlock`]
    /// pointing to the same block.
    #[inline]
    pub fn clone_arc(self) -> RawBlock {
        let vtable = self.vtable();
        // SAFETY:
        // 1. Guaranteed by the invariants on `RawBlockRef`
        // 2. The vtable returned by `self.vtable()` is guaranteed to match the
        //    storage in the `BlockData`.
        // 3. Blocks are always shared; nothing assumes a count of `1`.
        unsafe { vtable.clone_arc(self.ptr) }
    }

    /// Gets the strong count of the inner [`triomphe::Arc`].
    #[inline]
    pub fn strong_count(self) -> usize {
        let vtable = self.vtable();
        // SAFETY:
        // 1. Guaranteed by the invariants on `RawBlockRef`
        // 2. The vtable returned by `self.vtable()` is guaranteed to match the
        //    storage in the `BlockData`.
        unsafe { vtable.strong_count(self.ptr) }
    }

    /// Whether the value is co-allocated inside the block.
    #[inline]
    pub fn is_inline(self) -> bool {
        self.vtable().is_inline()
    }

    /// Whether both references point to the same block.
    #[inline]
    pub fn ptr_eq(self, other: RawBlockRef<'_>) -> bool {
        core::ptr::eq(self.as_ptr(), other.as_ptr())
    }

    /// Releases a value that was previously detached from this block.
    ///
    /// Inline values are destructed in place, detached values are deleted
    /// together with their box.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `data` was returned by [`RawBlock::detach`] on this block.
    /// 2. The value is not accessed afterwards, and `dispose` is called at
    ///    most once for it.
    pub unsafe fn dispose(self, data: NonNull<Erased>) {
        let dispatcher = self.dispatcher();
        if self.is_inline() {
            // SAFETY:
            // 1. The dispatcher belongs to the value stored in this block, and `data`
            //    is that value's address (guaranteed by the caller).
            // 2. The value lives in the block's inline slot and is never used again
            //    (guaranteed by the caller).
            unsafe { dispatcher.destruct(data) }
        } else {
            // SAFETY:
            // 1. The dispatcher belongs to the value stored in this block, and `data`
            //    is that value's address (guaranteed by the caller).
            // 2. Detached values always come from `Box::into_raw` and are never used
            //    again (guaranteed by the caller).
            unsafe { dispatcher.delete(data) }
        }
    }
}

impl core::fmt::Debug for RawBlockRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawBlock")
            .field("type_name", &self.dispatcher().type_name())
            .field("inline", &self.is_inline())
            .field("strong_count", &self.strong_count())
            .field("data", &self.data())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::String, vec, vec::Vec};

    use super::*;

    struct Cloneable;

    impl<U: Clone + 'static> ValueHandler<U> for Cloneable {
        fn try_clone(value: &U) -> Option<U> {
            Some(value.clone())
        }
    }

    /// Releases the value the way the owning container does.
    fn release(block: RawBlock) {
        let data = block.detach().unwrap();
        // SAFETY: `data` was just detached from this block and is not used again.
        unsafe { block.as_ref().dispose(data) }
    }

    #[test]
    fn test_raw_block_size() {
        assert_eq!(
            core::mem::size_of::<RawBlock>(),
            core::mem::size_of::<usize>()
        );
        assert_eq!(
            core::mem::size_of::<Option<RawBlock>>(),
            core::mem::size_of::<usize>()
        );
        assert_eq!(
            core::mem::size_of::<RawBlockRef<'_>>(),
            core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_raw_block_not_send_or_sync() {
        static_assertions::assert_not_impl_any!(RawBlock: Send, Sync);
        static_assertions::assert_not_impl_any!(RawBlockRef<'static>: Send, Sync);
    }

    #[test]
    fn test_inline_block() {
        let block = RawBlock::new_inline::<u32, Cloneable>(42);
        let block_ref = block.as_ref();

        assert!(block_ref.is_inline());
        assert_eq!(block_ref.strong_count(), 1);
        assert_eq!(block_ref.dispatcher().type_id(), core::any::TypeId::of::<u32>());

        let data = block_ref.data().unwrap();
        // SAFETY: The block stores a `u32` and it has not been detached.
        let value = unsafe { *data.cast::<u32>().as_ref() };
        assert_eq!(value, 42);

        release(block);
    }

    #[test]
    fn test_inline_data_points_into_block() {
        let block = RawBlock::new_inline::<u64, Cloneable>(7);
        let block_addr = block.as_ref().as_ptr() as usize;
        let data_addr = block.as_ref().data().unwrap().as_ptr() as usize;

        // The slot is part of the block allocation, after the header fields.
        assert!(data_addr > block_addr);
        assert!(data_addr - block_addr <= 4 * core::mem::size_of::<usize>());

        release(block);
    }

    #[test]
    fn test_detached_block() {
        let block = RawBlock::new_detached::<String, Cloneable>(Box::new(String::from("hello")));
        let block_ref = block.as_ref();

        assert!(!block_ref.is_inline());
        assert_eq!(block_ref.dispatcher().type_name(), core::any::type_name::<String>());

        let data = block_ref.data().unwrap();
        // SAFETY: The block stores a `String` and it has not been detached.
        let value = unsafe { data.cast::<String>().as_ref() };
        assert_eq!(value, "hello");

        release(block);
    }

    #[test]
    fn test_from_raw_parts() {
        // SAFETY: A null pointer is always accepted.
        let block = unsafe { RawBlock::from_raw_parts::<u8, Cloneable>(core::ptr::null_mut()) };
        assert!(block.is_none());

        let ptr = Box::into_raw(Box::new(vec![1, 2, 3]));
        // SAFETY: The pointer comes from `Box::into_raw` and is not used again.
        let block = unsafe { RawBlock::from_raw_parts::<Vec<i32>, Cloneable>(ptr) }.unwrap();
        assert!(!block.as_ref().is_inline());
        assert_eq!(block.as_ref().data().map(NonNull::as_ptr), Some(ptr.cast::<Erased>()));

        release(block);
    }

    #[test]
    fn test_clone_and_drop_counts() {
        let block = RawBlock::new_inline::<i32, Cloneable>(1);
        let second = block.clone();
        let third = second.clone();

        assert_eq!(block.as_ref().strong_count(), 3);
        assert!(block.as_ref().ptr_eq(third.as_ref()));

        drop(second);
        assert_eq!(block.as_ref().strong_count(), 2);
        drop(third);
        assert_eq!(block.as_ref().strong_count(), 1);

        release(block);
    }

    #[test]
    fn test_detach() {
        let block = RawBlock::new_inline::<i32, Cloneable>(5);
        let observer = block.clone();

        let data = block.detach();
        assert!(data.is_some());
        assert!(observer.as_ref().data().is_none());
        assert!(block.detach().is_none());

        drop(observer);
        // SAFETY: `data` was detached from this block and is not used again.
        unsafe { block.as_ref().dispose(data.unwrap()) };
    }

    #[test]
    fn test_debug() {
        let block = RawBlock::new_inline::<u16, Cloneable>(3);
        let debug = alloc::format!("{block:?}");
        assert!(debug.contains("u16"));
        assert!(debug.contains("inline: true"));
        release(block);
    }
}
