//! The fatal path: destroying a value that is still observed.
//!
//! The violation terminates the process, so each case re-runs this test
//! binary as a child process, filtered down to a single test, and inspects
//! how the child died. A hook that panics must not keep the child alive.

use std::{
    env,
    process::{Command, Output},
};

use polyval::{
    Value,
    hooks::{self, LifetimeViolation},
    impl_base,
};

const CHILD_ENV: &str = "POLYVAL_LIFETIME_VIOLATION_CHILD";
const HOOK_MARKER: &str = "lifetime violation hook ran";

trait Resource {
    fn id(&self) -> u32;
}

impl_base!(dyn Resource);

#[derive(Clone)]
struct Connection(u32);

impl Resource for Connection {
    fn id(&self) -> u32 {
        self.0
    }
}

fn install_hooks() {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    hooks::register_lifetime_violation_hook::<dyn Resource, _>(
        |violation: &LifetimeViolation| {
            eprintln!("{HOOK_MARKER}: {violation}");
        },
    );
    hooks::register_global_lifetime_violation_hook(|violation: &LifetimeViolation| {
        eprintln!("global hook saw {} observer(s)", violation.observers());
    });
}

/// Runs `test` in a child process and returns its output.
fn run_child(test: &str) -> Output {
    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(error) => panic!("cannot locate the test binary: {error}"),
    };
    match Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, test)
        .output()
    {
        Ok(output) => output,
        Err(error) => panic!("cannot run the test binary: {error}"),
    }
}

fn is_child(test: &str) -> bool {
    env::var(CHILD_ENV).is_ok_and(|name| name == test)
}

#[test]
fn test_drop_while_observed_aborts() {
    const NAME: &str = "test_drop_while_observed_aborts";
    if is_child(NAME) {
        install_hooks();
        let value: Value<dyn Resource> = Value::new(Connection(7));
        let handle = value.handle();
        let _copy = handle.clone();
        drop(value);
        unreachable!("the process survived a lifetime violation");
    }

    let output = run_child(NAME);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited cleanly:\n{stderr}");
    assert!(stderr.contains(HOOK_MARKER), "hook did not run:\n{stderr}");
    assert!(stderr.contains("2 handle(s)"), "{stderr}");
    assert!(stderr.contains("global hook saw 2 observer(s)"), "{stderr}");
    assert!(
        stderr.contains("value destroyed while still observed"),
        "no error event:\n{stderr}"
    );
    assert!(!stderr.contains("the process survived"), "{stderr}");
}

#[test]
fn test_into_box_while_observed_aborts() {
    const NAME: &str = "test_into_box_while_observed_aborts";
    if is_child(NAME) {
        install_hooks();
        let value: Value<dyn Resource> = Value::new(Connection(7));
        let handle = value.handle();
        let boxed = value.into_box();
        unreachable!("moved out {} while {} observed it", boxed.id(), handle.get().id());
    }

    let output = run_child(NAME);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited cleanly:\n{stderr}");
    assert!(stderr.contains(HOOK_MARKER), "hook did not run:\n{stderr}");
    assert!(stderr.contains("1 handle(s)"), "{stderr}");
}

#[test]
fn test_panicking_hook_still_aborts() {
    const NAME: &str = "test_panicking_hook_still_aborts";
    if is_child(NAME) {
        install_hooks();
        hooks::register_global_lifetime_violation_hook(|_: &LifetimeViolation| {
            panic!("hook gave up");
        });
        let value: Value<dyn Resource> = Value::new(Connection(9));
        let handle = value.handle();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| drop(value)));
        eprintln!(
            "the process survived: caught = {}, destroyed = {}",
            caught.is_err(),
            handle.try_get().is_none()
        );
        return;
    }

    let output = run_child(NAME);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited cleanly:\n{stderr}");
    assert!(stderr.contains(HOOK_MARKER), "hook did not run:\n{stderr}");
    assert!(stderr.contains("hook gave up"), "panicking hook did not run:\n{stderr}");
    assert!(!stderr.contains("the process survived"), "{stderr}");
}

#[test]
fn test_drop_after_handles_released() {
    let value: Value<dyn Resource> = Value::new(Connection(3));
    let handles: Vec<_> = (0..3).map(|_| value.handle()).collect();
    assert_eq!(handles[2].get().id(), 3);
    drop(handles);
    drop(value);
}
