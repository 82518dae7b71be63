//! Hooks that run when a value is destroyed while still observed.
//!
//! Destroying a [`Value`](crate::Value) while [`Handle`](crate::Handle)s still
//! refer to it would leave those handles dangling. This is never allowed to
//! happen silently: the value reports a [`LifetimeViolation`], emits a
//! `tracing` error event and terminates the process. Hooks registered here run
//! just before the process terminates. Typical uses are flushing logs or
//! writing a crash report.
//!
//! Hooks can be registered for a specific type, in which case they run for
//! values whose declared or concrete type is that type, or globally, in which
//! case they run for every violation.
//!
//! ```
//! use polyval::hooks::{self, LifetimeViolation};
//!
//! trait Widget {}
//!
//! hooks::register_lifetime_violation_hook::<dyn Widget, _>(|violation: &LifetimeViolation| {
//!     eprintln!("widget destroyed too early: {violation}");
//! });
//!
//! hooks::register_global_lifetime_violation_hook(|violation: &LifetimeViolation| {
//!     eprintln!("{} handle(s) left dangling", violation.observers());
//! });
//!
//! let mut registered = 0;
//! hooks::debug_lifetime_violation_hooks(|_| registered += 1);
//! assert_eq!(registered, 2);
//! ```

mod lifetime_violation;

pub use lifetime_violation::{
    LifetimeViolation, LifetimeViolationHook, debug_lifetime_violation_hooks,
    register_global_lifetime_violation_hook, register_lifetime_violation_hook,
};
pub(crate) use lifetime_violation::lifetime_violation;
