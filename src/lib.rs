#![cfg_attr(not(doc), no_std)]
#![deny(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Extra checks on nightly
#![cfg_attr(nightly_extra_checks, feature(rustdoc_missing_doc_code_examples))]
#![cfg_attr(nightly_extra_checks, forbid(rustdoc::missing_doc_code_examples))]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Polymorphic objects with value semantics.
//!
//! ## Overview
//!
//! Trait objects in Rust are usually held through a `Box<dyn Trait>` or an
//! `Arc<dyn Trait>`. The first cannot be cloned without extra machinery and
//! the second shares one object between all of its clones. This crate
//! provides [`Value<T>`], a container that holds one object of any concrete
//! type implementing `T` and behaves like a plain value of it:
//!
//! - cloning a value produces a deep, independent copy of the concrete object;
//! - dropping a value destroys the object deterministically;
//! - a value can be widened to a more general interface, and narrowed back to
//!   a more specific one or to the concrete type, with the check done at
//!   runtime.
//!
//! Alongside values there are [`Handle<T>`]s: non-owning observers of a
//! value. A handle can be copied freely, reassigned to observe a different
//! value and shared between threads, but it never keeps the object alive. A
//! value must outlive every handle that observes it. Destroying a value that
//! is still observed is a lifetime violation and terminates the process after
//! running the [hooks](crate::hooks) registered for it.
//!
//! ## Quick Example
//!
//! ```
//! use polyval::{Value, impl_base};
//!
//! trait Shape {
//!     fn area(&self) -> f64;
//! }
//! impl_base!(dyn Shape);
//!
//! #[derive(Clone)]
//! struct Circle {
//!     radius: f64,
//! }
//!
//! impl Shape for Circle {
//!     fn area(&self) -> f64 {
//!         3.0 * self.radius * self.radius
//!     }
//! }
//!
//! let circle: Value<dyn Shape> = Value::new(Circle { radius: 1.0 });
//! let handle = circle.handle();
//! assert_eq!(handle.get().area(), 3.0);
//!
//! let copy = circle.try_clone()?;
//! drop(handle);
//! let Ok(mut circle) = circle.downcast::<Circle>() else {
//!     unreachable!()
//! };
//! circle.radius = 2.0;
//! assert_eq!(copy.area(), 3.0);
//! assert_eq!(circle.area(), 12.0);
//! # Ok::<(), polyval::CloneError>(())
//! ```
//!
//! ## Core Concepts
//!
//! - **Storage blocks**: every value owns a reference counted block that
//!   records where the object lives. Values keep one reference, handles keep
//!   the others. When the value is destroyed it clears the block, so a handle
//!   can detect that its value is gone instead of reading freed memory.
//! - **Inline storage**: objects of at most `INLINE` bytes (the second
//!   parameter of [`Value`], [`DEFAULT_INLINE_SIZE`] by default) are stored
//!   inside the block. Larger objects get an allocation of their own.
//! - **Bases**: [`Base<U>`] states that a `U` can be viewed as a `T`. It is
//!   implemented with [`impl_base!`] for trait objects and with
//!   [`impl_upcast!`] between trait objects.
//! - **Handlers**: a [`ValueHandler`](handlers::ValueHandler) decides how a
//!   concrete type is cloned. See the [`handlers`] module.
//!
//! For implementation details, see the [`polyval-internals`] crate.
//!
//! [`polyval-internals`]: polyval_internals
//!
//! ## Features
//!
//! - `std` (enabled by default): uses the operating system's locks and
//!   terminates through [`std::process::abort`]. Without it the crate is
//!   `no_std` and uses spin locks.

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod base;
mod descriptor;
pub mod error;
mod handle;
pub mod handlers;
pub mod hooks;
mod projection;
mod sync;
mod value;

pub mod prelude;

pub use self::{
    base::Base,
    error::{CastError, CloneError, Error},
    handle::{Handle, HandleRef},
    value::{DEFAULT_INLINE_SIZE, Value},
};
