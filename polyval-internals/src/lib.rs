#![no_std]
#![forbid(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::missing_docs_in_private_items,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
#![allow(rustdoc::private_intra_doc_links)]
//! Internal implementation crate for [`polyval`].
//!
//! # Overview
//!
//! This crate contains the low-level, type-erased data structures and unsafe
//! operations that power the [`polyval`] value-semantics library. It knows
//! nothing about declared base types or views; it only stores a value of some
//! concrete type `U` and knows how to clone, drop and describe it.
//!
//! **This crate is an implementation detail.** No semantic versioning guarantees
//! are provided. Users should depend on the [`polyval`] crate, not this one.
//!
//! # Architecture
//!
//! - **[`block`]**: The reference-counted storage cell
//!   - [`RawBlock`]: Owned count on a block with [`Arc`]-based allocation
//!   - [`RawBlockRef`]: Borrowed reference to a block
//!   - [`BlockData`]: `#[repr(C)]` wrapper enabling field access on erased
//!     storage
//!   - [`BlockVtable`]: Function pointers for releasing and counting the
//!     allocation
//!
//! - **[`value`]**: Operations on the erased value itself
//!   - [`Dispatcher`]: One `'static` table of clone/delete/destruct/describe
//!     operations per concrete type and handler
//!   - [`Placement`]: Where a freshly cloned value should live
//!
//! - **[`handlers`]**: The [`ValueHandler`] trait deciding how values are
//!   cloned
//!
//! # Ownership model
//!
//! A block owns its allocation but not the value inside it. The value is
//! released explicitly through [`RawBlock::detach`] followed by
//! [`RawBlockRef::dispose`], which is what the owning container does when it
//! is dropped. Dropping the last [`RawBlock`] only frees the block itself.
//!
//! # Safety Strategy
//!
//! Type erasure requires that the function pointers always match the concrete
//! type stored in memory. This crate maintains that through:
//!
//! - **Module-based encapsulation**: Safety-critical types keep fields
//!   module-private, making invariants locally verifiable within a single file
//! - **`#[repr(C)]` layout**: Enables field projection on type-erased pointers
//!   without constructing invalid references
//! - **`'static` tables built in `const` blocks**: A table is created
//!   together with the data it describes and can never be swapped afterwards
//!
//! [`polyval`]: https://docs.rs/polyval/latest/polyval/
//! [`BlockData`]: block::data::BlockData
//! [`BlockVtable`]: block::vtable::BlockVtable
//! [`ValueHandler`]: handlers::ValueHandler
//! [`Arc`]: triomphe::Arc

extern crate alloc;

mod block;
pub mod handlers;
mod util;
mod value;

pub use block::{RawBlock, RawBlockRef};
pub use util::Erased;
pub use value::{Dispatcher, Placement};
