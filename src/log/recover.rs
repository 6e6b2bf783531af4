//! Panic Recovery
//!
//! Wrap a unit of work so a panic inside it becomes a log entry with the
//! payload and a backtrace instead of unwinding further. The backtrace is
//! taken by a panic hook while the panicking frames are still on the stack;
//! panics inside a guarded scope skip the default stderr report.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use super::Logger;

thread_local! {
    static GUARDED: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chains a hook in front of the existing one. Outside guarded scopes the
/// previous hook runs unchanged.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARDED.with(Cell::get) > 0 {
                let trace = Backtrace::force_capture();
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Runs `f` under the capturing hook, returning the panic description on unwind
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    install_hook();
    GUARDED.with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|depth| depth.set(depth.get() - 1));
    result.map_err(|payload| {
        let trace = CAPTURED.with(|slot| slot.borrow_mut().take());
        describe(payload.as_ref(), trace)
    })
}

/// Runs `f`, logging a panic at ERROR on the current logger and returning `None`
pub fn error_on_panic<T>(f: impl FnOnce() -> T) -> Option<T> {
    guarded(f).map_err(|msg| super::current().error(msg)).ok()
}

/// Runs `f`, logging a panic at FATAL on the current logger and exiting
pub fn fatal_on_panic<T>(f: impl FnOnce() -> T) -> T {
    match guarded(f) {
        Ok(value) => value,
        Err(msg) => super::current().fatal(msg),
    }
}

/// Like [`error_on_panic`] but logs on `logger`
pub fn error_on_panic_with<T>(logger: &Logger, f: impl FnOnce() -> T) -> Option<T> {
    guarded(f).map_err(|msg| logger.error(msg)).ok()
}

/// Like [`fatal_on_panic`] but logs on `logger`
pub fn fatal_on_panic_with<T>(logger: &Logger, f: impl FnOnce() -> T) -> T {
    match guarded(f) {
        Ok(value) => value,
        Err(msg) => logger.fatal(msg),
    }
}

fn describe(payload: &(dyn Any + Send), trace: Option<Backtrace>) -> String {
    let reason = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    let trace = trace.unwrap_or_else(Backtrace::force_capture);
    format!("panic: {}\n\n{}", reason, trace)
}
