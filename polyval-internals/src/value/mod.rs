//! Operations on type-erased values.

mod dispatcher;

pub use dispatcher::{Dispatcher, Placement};
