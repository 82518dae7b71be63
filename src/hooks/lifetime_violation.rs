use alloc::vec::Vec;
use core::{any::TypeId, fmt, panic::Location};

use hashbrown::HashMap;
use triomphe::Arc;
use unsize::CoerceUnsize;

use crate::sync::HookLock;

type HookMap = HashMap<TypeId, Arc<dyn StoredHook>, rustc_hash::FxBuildHasher>;

static HOOKS: HookLock<HookMap> = HookLock::new();
static GLOBAL_HOOKS: HookLock<Vec<Arc<dyn StoredHook>>> = HookLock::new();

/// Describes a value that was destroyed while handles still observed it.
#[derive(Debug, Clone, Copy)]
pub struct LifetimeViolation {
    declared_type: &'static str,
    declared_type_id: TypeId,
    stored_type: &'static str,
    stored_type_id: TypeId,
    observers: usize,
}

impl LifetimeViolation {
    pub(crate) fn new<T: ?Sized + 'static>(
        stored_type: &'static str,
        stored_type_id: TypeId,
        observers: usize,
    ) -> Self {
        Self {
            declared_type: core::any::type_name::<T>(),
            declared_type_id: TypeId::of::<T>(),
            stored_type,
            stored_type_id,
            observers,
        }
    }

    /// The name of the type the value was declared as, the `T` in
    /// `Value<T>`.
    #[must_use]
    pub fn declared_type(&self) -> &'static str {
        self.declared_type
    }

    /// The [`TypeId`] of the declared type.
    #[must_use]
    pub fn declared_type_id(&self) -> TypeId {
        self.declared_type_id
    }

    /// The name of the concrete type of the destroyed object.
    #[must_use]
    pub fn stored_type(&self) -> &'static str {
        self.stored_type
    }

    /// The [`TypeId`] of the concrete type of the destroyed object.
    #[must_use]
    pub fn stored_type_id(&self) -> TypeId {
        self.stored_type_id
    }

    /// The number of handles and handle guards that still observed the value.
    #[must_use]
    pub fn observers(&self) -> usize {
        self.observers
    }
}

impl fmt::Display for LifetimeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "value of type `{}` held as `{}` was destroyed while {} handle(s) still observed it",
            self.stored_type, self.declared_type, self.observers
        )
    }
}

/// A hook that runs before the process is terminated due to a
/// [`LifetimeViolation`].
///
/// Implemented for every `Fn(&LifetimeViolation)` closure that is
/// `Send + Sync + 'static`.
pub trait LifetimeViolationHook: 'static + Send + Sync {
    /// Runs the hook. The process terminates once all hooks have run.
    fn on_violation(&self, violation: &LifetimeViolation);
}

impl<F> LifetimeViolationHook for F
where
    F: Fn(&LifetimeViolation) + Send + Sync + 'static,
{
    fn on_violation(&self, violation: &LifetimeViolation) {
        self(violation);
    }
}

struct Hook<H> {
    hook: H,
    hooked_type: Option<&'static str>,
    added_at: &'static Location<'static>,
}

impl<H> fmt::Display for Hook<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lifetime violation hook {}", core::any::type_name::<H>())?;
        if let Some(hooked_type) = self.hooked_type {
            write!(f, " for type {hooked_type}")?;
        }
        write!(
            f,
            " registered at {}:{}",
            self.added_at.file(),
            self.added_at.line()
        )
    }
}

trait StoredHook: 'static + Send + Sync + fmt::Display {
    fn call(&self, violation: &LifetimeViolation);
}

impl<H: LifetimeViolationHook> StoredHook for Hook<H> {
    fn call(&self, violation: &LifetimeViolation) {
        self.hook.on_violation(violation);
    }
}

#[track_caller]
fn store<H: LifetimeViolationHook>(
    hook: H,
    hooked_type: Option<&'static str>,
) -> Arc<dyn StoredHook> {
    let hook: Hook<H> = Hook {
        hook,
        hooked_type,
        added_at: Location::caller(),
    };
    Arc::new(hook).unsize(unsize::Coercion!(to dyn StoredHook))
}

/// Registers a hook for values whose declared or concrete type is `T`.
///
/// Replaces any hook previously registered for `T`.
#[track_caller]
pub fn register_lifetime_violation_hook<T, H>(hook: H)
where
    T: ?Sized + 'static,
    H: LifetimeViolationHook,
{
    let hook = store(hook, Some(core::any::type_name::<T>()));
    HOOKS
        .write()
        .get_or_insert_default()
        .insert(TypeId::of::<T>(), hook);
}

/// Registers a hook that runs for every lifetime violation, after the hooks
/// for specific types.
#[track_caller]
pub fn register_global_lifetime_violation_hook<H: LifetimeViolationHook>(hook: H) {
    let hook = store(hook, None);
    GLOBAL_HOOKS.write().get_or_insert_default().push(hook);
}

/// Calls `f` with a description of every registered hook.
pub fn debug_lifetime_violation_hooks(mut f: impl FnMut(&dyn fmt::Display)) {
    if let Some(hooks) = &*HOOKS.read() {
        for hook in hooks.values() {
            f(hook);
        }
    }
    if let Some(hooks) = &*GLOBAL_HOOKS.read() {
        for hook in hooks {
            f(hook);
        }
    }
}

/// Collects the hooks that apply to `violation`, in the order they run.
fn applicable_hooks(violation: &LifetimeViolation) -> Vec<Arc<dyn StoredHook>> {
    let mut applicable = Vec::new();
    if let Some(hooks) = &*HOOKS.read() {
        applicable.extend(hooks.get(&violation.stored_type_id).cloned());
        if violation.declared_type_id != violation.stored_type_id {
            applicable.extend(hooks.get(&violation.declared_type_id).cloned());
        }
    }
    if let Some(hooks) = &*GLOBAL_HOOKS.read() {
        applicable.extend(hooks.iter().cloned());
    }
    applicable
}

/// Reports `violation` and terminates the process.
#[cold]
#[inline(never)]
pub(crate) fn lifetime_violation(violation: LifetimeViolation) -> ! {
    // Terminates even if a subscriber or hook unwinds.
    let _abort = AbortOnUnwind;
    tracing::error!(
        declared_type = violation.declared_type,
        stored_type = violation.stored_type,
        observers = violation.observers,
        "value destroyed while still observed, aborting"
    );
    for hook in applicable_hooks(&violation) {
        hook.call(&violation);
    }
    abort()
}

struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        abort()
    }
}

#[cfg(feature = "std")]
fn abort() -> ! {
    std::process::abort()
}

#[cfg(not(feature = "std"))]
fn abort() -> ! {
    // A panic while panicking aborts.
    struct PanicOnDrop;

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("aborting after a lifetime violation");
        }
    }

    let _guard = PanicOnDrop;
    panic!("value destroyed while still observed");
}

#[cfg(test)]
mod tests {
    use alloc::{format, string::ToString};

    use super::*;

    struct Marker;

    #[test]
    fn test_display() {
        let violation =
            LifetimeViolation::new::<dyn fmt::Debug>("my::Type", TypeId::of::<u8>(), 2);
        let message = violation.to_string();
        assert!(message.starts_with("value of type `my::Type` held as `dyn "));
        assert!(message.ends_with("` was destroyed while 2 handle(s) still observed it"));
        assert_eq!(violation.observers(), 2);
        assert_eq!(violation.stored_type_id(), TypeId::of::<u8>());
        assert_eq!(violation.declared_type_id(), TypeId::of::<dyn fmt::Debug>());
    }

    #[test]
    fn test_registration_and_lookup() {
        register_lifetime_violation_hook::<Marker, _>(|_: &LifetimeViolation| {});

        let mut descriptions = Vec::new();
        debug_lifetime_violation_hooks(|hook| descriptions.push(format!("{hook}")));
        assert!(descriptions.iter().any(|d| d.contains("for type")
            && d.contains("Marker")
            && d.contains("lifetime_violation.rs")));

        let stored =
            LifetimeViolation::new::<dyn fmt::Debug>("Marker", TypeId::of::<Marker>(), 1);
        assert!(!applicable_hooks(&stored).is_empty());
        let declared = LifetimeViolation::new::<Marker>("u8", TypeId::of::<u8>(), 1);
        assert!(!applicable_hooks(&declared).is_empty());
    }
}
