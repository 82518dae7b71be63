//! This module encapsulates the fields of the [`BlockData`]. Since this is the
//! only place they are visible, this means that the [`BlockVtable`] is
//! guaranteed to always be in sync with the storage type of the block, and the
//! [`Dispatcher`] is guaranteed to always be in sync with the type of the value
//! that `data` points to. Both follow from the fact that they are in sync when
//! created and that the API offers no way to change them afterwards.

use alloc::boxed::Box;
use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::{
    block::{raw::RawBlockRef, vtable::BlockVtable},
    handlers::ValueHandler,
    util::Erased,
    value::Dispatcher,
};

/// Type-erased block data structure with vtable-based dispatch.
///
/// This struct uses `#[repr(C)]` to enable safe field access in type-erased
/// contexts, allowing access to the vtable, the dispatcher and the data
/// address even when the storage type `S` is unknown.
#[repr(C)]
pub(crate) struct BlockData<S: 'static> {
    /// Reference to the vtable of this block
    vtable: &'static BlockVtable,
    /// Reference to the dispatcher of the stored value
    dispatcher: &'static Dispatcher,
    /// Address of the stored value, or null once the value has been detached
    data: AtomicPtr<Erased>,
    /// Either the inline slot holding the value, or nothing
    storage: S,
}

/// The kinds of storage a block can have.
pub(crate) trait Storage: 'static {
    /// Whether the value is co-allocated with the block
    const INLINE: bool;
}

/// Inline storage for a value of type `U`.
///
/// The slot never drops its content on its own; the value is destructed in
/// place through the [`Dispatcher`] before the block goes away.
pub(crate) struct Slot<U>(
    /// The value, initialized for as long as the block's data address is set
    UnsafeCell<MaybeUninit<U>>,
);

/// Storage for blocks whose value lives in its own heap allocation.
pub(crate) struct Detached;

impl<U: 'static> Storage for Slot<U> {
    const INLINE: bool = true;
}

impl Storage for Detached {
    const INLINE: bool = false;
}

impl<U: 'static> BlockData<Slot<U>> {
    /// Creates a new [`triomphe::Arc`] holding `value` in its inline slot.
    ///
    /// The data address is bound after the allocation has been made, since
    /// the slot only has a stable address once it lives inside the `Arc`.
    pub(super) fn new_inline<H: ValueHandler<U>>(value: U) -> triomphe::Arc<Self> {
        let arc = triomphe::Arc::new(Self {
            vtable: BlockVtable::new::<Slot<U>>(),
            dispatcher: Dispatcher::new::<U, H>(),
            data: AtomicPtr::new(core::ptr::null_mut()),
            storage: Slot(UnsafeCell::new(MaybeUninit::new(value))),
        });
        let slot: *mut Erased = arc.storage.0.get().cast::<Erased>();
        arc.data.store(slot, Ordering::Release);
        arc
    }
}

impl BlockData<Detached> {
    /// Creates a new [`triomphe::Arc`] that takes ownership of the boxed
    /// `value`.
    pub(super) fn new_detached<U: 'static, H: ValueHandler<U>>(
        value: Box<U>,
    ) -> triomphe::Arc<Self> {
        let data: *mut Erased = Box::into_raw(value).cast::<Erased>();
        triomphe::Arc::new(Self {
            vtable: BlockVtable::new::<Detached>(),
            dispatcher: Dispatcher::new::<U, H>(),
            data: AtomicPtr::new(data),
            storage: Detached,
        })
    }
}

impl<'a> RawBlockRef<'a> {
    /// Returns a reference to the [`BlockVtable`] of the [`BlockData`]
    /// instance.
    pub(super) fn vtable(self) -> &'static BlockVtable {
        let ptr = self.as_ptr();
        // SAFETY: We don't know the actual storage type, but we do know
        // that it points to an instance of `BlockData<S>` for some specific `S`.
        // Since `BlockData<S>` is `#[repr(C)]`, that means we can access
        // the fields before the actual storage.
        //
        // We need to take care to avoid creating an actual reference to
        // the `BlockData` itself though, as that would still be undefined behavior
        // since we don't have the right type.
        let vtable_ptr: *const &'static BlockVtable = unsafe { &raw const (*ptr).vtable };

        // SAFETY: Deferencing the pointer and getting out the `&'static BlockVtable` is valid
        // for the same reasons
        unsafe { *vtable_ptr }
    }

    /// Returns the [`Dispatcher`] for the value stored in this block.
    pub fn dispatcher(self) -> &'static Dispatcher {
        let ptr = self.as_ptr();
        // SAFETY: We only project to a field in front of the storage, see
        // `vtable` above.
        let dispatcher_ptr: *const &'static Dispatcher = unsafe { &raw const (*ptr).dispatcher };

        // SAFETY: The field is initialized and never written after creation.
        unsafe { *dispatcher_ptr }
    }

    /// Returns the atomic cell holding the address of the stored value.
    pub(super) fn data_cell(self) -> &'a AtomicPtr<Erased> {
        let ptr = self.as_ptr();
        // SAFETY: We only project to a field in front of the storage, see
        // `vtable` above.
        let data_ptr: *const AtomicPtr<Erased> = unsafe { &raw const (*ptr).data };

        // SAFETY: We turn the `*const` pointer into a `&'a` reference. This is valid
        // because the existence of the `RawBlockRef<'a>` implies that the block is
        // alive for `'a`, and the field is only ever accessed atomically.
        unsafe { &*data_ptr }
    }

    /// Returns the address of the stored value, or `None` if it has already
    /// been detached.
    #[inline]
    pub fn data(self) -> Option<NonNull<Erased>> {
        NonNull::new(self.data_cell().load(Ordering::Acquire))
    }
}
