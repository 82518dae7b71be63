use core::{any::TypeId, ptr::NonNull};

use polyval_internals::{Dispatcher, Erased, RawBlock};

use crate::{Base, error::CastError};

/// One count on a block, together with a view of its value as a `T`.
///
/// # Safety invariants
///
/// 1. `view` has the address of the value stored in `block` (or had it,
///    before the value was detached), with metadata valid for the concrete
///    type of that value.
/// 2. `dispatcher` is the dispatcher of `block`.
pub(crate) struct Descriptor<T: ?Sized + 'static> {
    block: RawBlock,
    view: NonNull<T>,
    dispatcher: &'static Dispatcher,
}

impl<T: ?Sized + 'static> Descriptor<T> {
    /// Creates a descriptor for a freshly created block.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    ///
    /// 1. `view` has the address of the value stored in `block`, with
    ///    metadata valid for its concrete type.
    pub(crate) unsafe fn new(block: RawBlock, view: NonNull<T>) -> Self {
        let dispatcher = block.as_ref().dispatcher();
        Self {
            block,
            view,
            dispatcher,
        }
    }

    #[inline]
    pub(crate) fn block(&self) -> &RawBlock {
        &self.block
    }

    #[inline]
    pub(crate) fn view(&self) -> NonNull<T> {
        self.view
    }

    #[inline]
    pub(crate) fn dispatcher(&self) -> &'static Dispatcher {
        self.dispatcher
    }

    /// The address of the stored value, or `None` once it has been detached.
    #[inline]
    pub(crate) fn data(&self) -> Option<NonNull<Erased>> {
        self.block.as_ref().data()
    }

    /// Number of counts on the block, this one included.
    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.block.as_ref().strong_count()
    }

    #[inline]
    pub(crate) fn is<U: 'static>(&self) -> bool {
        self.dispatcher.type_id() == TypeId::of::<U>()
    }

    /// Widens the view into a base of `T`.
    #[inline]
    pub(crate) fn upcast<S: ?Sized + Base<T>>(self) -> Descriptor<S> {
        Descriptor {
            view: S::upcast(self.view),
            block: self.block,
            dispatcher: self.dispatcher,
        }
    }

    /// Narrows the view to the concrete type `U`, if that is what the block
    /// stores.
    pub(crate) fn downcast<U: 'static>(self) -> Result<Descriptor<U>, Self> {
        if self.is::<U>() {
            Ok(Descriptor {
                view: self.view.cast::<U>(),
                block: self.block,
                dispatcher: self.dispatcher,
            })
        } else {
            Err(self)
        }
    }

    pub(crate) fn cast_error<U: ?Sized>(&self) -> CastError {
        CastError::new::<U>(self.dispatcher.type_name())
    }
}

impl<T: ?Sized + 'static> Clone for Descriptor<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
            view: self.view,
            dispatcher: self.dispatcher,
        }
    }
}
