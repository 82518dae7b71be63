//! Commonly used items for convenient importing.
//!
//! ```
//! use polyval::prelude::*;
//!
//! trait Greeter {
//!     fn greet(&self) -> &'static str;
//! }
//! impl_base!(dyn Greeter);
//!
//! #[derive(Clone)]
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self) -> &'static str {
//!         "hello"
//!     }
//! }
//!
//! let greeter: Value<dyn Greeter> = Value::new(English);
//! let handle: Handle<dyn Greeter> = greeter.handle();
//! assert_eq!(handle.get().greet(), "hello");
//! ```

pub use core::any::Any;

pub use crate::{Base, Handle, Value, handlers, impl_base, impl_upcast};
