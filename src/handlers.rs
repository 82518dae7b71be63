//! Built-in handlers deciding how stored values are cloned.
//!
//! Every value is stored together with a handler type implementing
//! [`ValueHandler`]. [`Value::new`](crate::Value::new) uses [`Cloneable`];
//! [`Value::new_custom`](crate::Value::new_custom) accepts any handler, which
//! makes it possible to store types that cannot be cloned at all.
//!
//! # Examples
//!
//! ```
//! use polyval::{Value, handlers::Uncloneable, impl_base};
//!
//! trait Resource {}
//!
//! struct FileLock;
//! impl Resource for FileLock {}
//!
//! impl_base!(dyn Resource);
//!
//! let lock: Value<dyn Resource> = Value::new_custom::<FileLock, Uncloneable>(FileLock);
//! assert!(lock.try_clone().is_err());
//! ```

pub use polyval_internals::handlers::ValueHandler;

/// Clones values through their [`Clone`] implementation.
#[derive(Copy, Clone, Debug)]
pub struct Cloneable;

impl<U: Clone> ValueHandler<U> for Cloneable {
    #[inline]
    fn try_clone(value: &U) -> Option<U> {
        Some(value.clone())
    }
}

/// Refuses every clone.
///
/// Values stored with this handler construct fine; every attempt to copy them
/// fails with a [`CloneError`](crate::CloneError).
#[derive(Copy, Clone, Debug)]
pub struct Uncloneable;

impl<U> ValueHandler<U> for Uncloneable {
    #[inline]
    fn try_clone(_value: &U) -> Option<U> {
        None
    }
}
