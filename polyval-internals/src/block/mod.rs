//! Module containing the reference-counted block that stores a value

pub(crate) mod data;
mod raw;
pub(crate) mod vtable;

pub use raw::{RawBlock, RawBlockRef};
