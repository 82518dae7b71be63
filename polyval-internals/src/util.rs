//! Internal utility types.

/// Marker type used when type-erasing stored values.
///
/// This zero-sized type serves as a placeholder in generic type parameters
/// and pointer types when the actual concrete type has been erased. For
/// example, `BlockData<Erased>` represents a block whose storage type is
/// unknown at the current scope, and `NonNull<Erased>` is the address of a
/// value whose type is only known to its [`Dispatcher`].
///
/// The type cannot be constructed outside this crate; it only ever appears
/// behind pointers.
///
/// [`Dispatcher`]: crate::Dispatcher
#[derive(Clone, Copy)]
pub struct Erased {
    /// Prevents construction outside this crate
    _private: (),
}
