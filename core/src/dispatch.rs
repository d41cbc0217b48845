//! Cross-context dispatch.
//!
//! [`dispatch`] routes a callable into a target [`Context`], choosing between running it inline,
//! queueing it, or queueing it and waiting for it, according to a [`DispatchMode`]. Arguments are
//! whatever the callable captured by value, so neither side can observe the other's later mutations.

use crate::context::Context;

use std::fmt;
use std::str::FromStr;

use crossbeam::channel::bounded;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a dispatched callable is executed relative to the caller.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Run on the caller's stack, whatever the target context.
    Direct,
    /// Append to the target's queue and return immediately.
    Queued,
    /// Append to the target's queue and block until the target has run it.
    BlockingQueued,
    /// `Direct` when called from the target's own thread, `Queued` otherwise.
    #[default]
    Auto,
}

impl DispatchMode {
    /// Resolves `Auto` against the calling thread.
    pub fn resolve(self, target: &Context) -> DispatchMode {
        match self {
            DispatchMode::Auto if target.is_current() => DispatchMode::Direct,
            DispatchMode::Auto => DispatchMode::Queued,
            mode => mode,
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DispatchMode::Direct => "direct",
            DispatchMode::Queued => "queued",
            DispatchMode::BlockingQueued => "blocking_queued",
            DispatchMode::Auto => "auto",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for DispatchMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" => Ok(DispatchMode::Direct),
            "queued" => Ok(DispatchMode::Queued),
            "blocking_queued" | "blocking" => Ok(DispatchMode::BlockingQueued),
            "auto" => Ok(DispatchMode::Auto),
            _ => Err(ParseModeError(s.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown dispatch mode: {0}")]
pub struct ParseModeError(String);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum DispatchError {
    /// The target context has stopped, or stopped before running the callable.
    #[error("target context is not running")]
    Disconnected,

    /// A blocking dispatch targeted the calling thread's own context.
    #[error("blocking dispatch onto the calling context would deadlock")]
    WouldDeadlock,
}

/// Runs `callable` in `target` according to `mode`.
///
/// `BlockingQueued` waits indefinitely: a target that never drains its queue blocks the caller
/// forever. A blocking dispatch from the target's own thread fails with
/// [`DispatchError::WouldDeadlock`] without running the callable.
pub fn dispatch<F>(target: &Context, mode: DispatchMode, callable: F) -> Result<(), DispatchError>
where
    F: FnOnce() + Send + 'static,
{
    match mode.resolve(target) {
        DispatchMode::Direct => {
            callable();
            Ok(())
        }
        DispatchMode::Queued => target.post(Box::new(callable)),
        DispatchMode::BlockingQueued => {
            if target.is_current() {
                return Err(DispatchError::WouldDeadlock);
            }
            blocking(target, callable)
        }
        DispatchMode::Auto => unreachable!("resolved above"),
    }
}

/// Runs `callable` in `target` and returns its value, blocking the caller until it has run.
///
/// Unlike a `BlockingQueued` dispatch, a call from the target's own thread runs inline.
pub fn call<F, R>(target: &Context, callable: F) -> Result<R, DispatchError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if target.is_current() {
        return Ok(callable());
    }
    blocking(target, callable)
}

fn blocking<F, R>(target: &Context, callable: F) -> Result<R, DispatchError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = bounded(1);
    target.post(Box::new(move || {
        let _ = tx.send(callable());
    }))?;
    // The sender is dropped unrun if the target stops first.
    rx.recv().map_err(|_| DispatchError::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crossbeam::channel::unbounded;

    #[test]
    fn core_dispatch_direct_runs_on_caller() {
        let thread = ContextBuilder::new("direct").spawn().unwrap();
        let caller = thread::current().id();
        let (tx, rx) = unbounded();
        dispatch(thread.context(), DispatchMode::Direct, move || {
            tx.send(thread::current().id()).unwrap();
        })
        .unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn core_dispatch_auto_from_outside_is_queued() {
        let thread = ContextBuilder::new("auto").spawn().unwrap();
        let (tx, rx) = unbounded();
        dispatch(thread.context(), DispatchMode::Auto, move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("auto"));
    }

    #[test]
    fn core_dispatch_auto_from_inside_is_direct() {
        let thread = ContextBuilder::new("auto-inner").spawn().unwrap();
        let ctx = thread.context().clone();
        let order = call(thread.context(), move || {
            let log = Arc::new(std::sync::Mutex::new(Vec::new()));
            let inner = Arc::clone(&log);
            dispatch(&ctx, DispatchMode::Auto, move || inner.lock().unwrap().push("inner")).unwrap();
            log.lock().unwrap().push("after");
            let order = log.lock().unwrap().clone();
            order
        })
        .unwrap();
        assert_eq!(order, vec!["inner", "after"]);
    }

    #[test]
    fn core_dispatch_blocking_waits_for_completion() {
        let thread = ContextBuilder::new("blocking").spawn().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        dispatch(thread.context(), DispatchMode::BlockingQueued, move || {
            thread::sleep(Duration::from_millis(50));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn core_dispatch_blocking_onto_self_would_deadlock() {
        let thread = ContextBuilder::new("self").spawn().unwrap();
        let ctx = thread.context().clone();
        let result = call(thread.context(), move || {
            dispatch(&ctx, DispatchMode::BlockingQueued, || {})
        })
        .unwrap();
        assert_eq!(result, Err(DispatchError::WouldDeadlock));
    }

    #[test]
    fn core_dispatch_to_stopped_context_is_disconnected() {
        let thread = ContextBuilder::new("stopped").spawn().unwrap();
        let ctx = thread.context().clone();
        thread.shutdown().unwrap();
        assert_eq!(
            dispatch(&ctx, DispatchMode::Queued, || {}),
            Err(DispatchError::Disconnected)
        );
        assert_eq!(call(&ctx, || 1), Err(DispatchError::Disconnected));
        // Direct never touches the target's queue.
        assert_eq!(dispatch(&ctx, DispatchMode::Direct, || {}), Ok(()));
    }

    #[test]
    fn core_dispatch_captures_arguments_by_value() {
        let thread = ContextBuilder::new("by-value").spawn().unwrap();
        let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
        let (tx, rx) = unbounded();
        dispatch(thread.context(), DispatchMode::Queued, move || {
            let _ = gate_rx.recv();
        })
        .unwrap();

        let mut value = vec![1, 2, 3];
        let copy = value.clone();
        dispatch(thread.context(), DispatchMode::Queued, move || tx.send(copy).unwrap()).unwrap();
        value.push(4);
        drop(gate_tx);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), vec![1, 2, 3]);
        assert_eq!(value, vec![1, 2, 3, 4]);
    }

    #[test]
    fn core_dispatch_mode_parses_config_names() {
        assert_eq!("blocking-queued".parse::<DispatchMode>().unwrap(), DispatchMode::BlockingQueued);
        assert_eq!("Auto".parse::<DispatchMode>().unwrap(), DispatchMode::Auto);
        assert_eq!(DispatchMode::Queued.to_string(), "queued");
        assert!("sometimes".parse::<DispatchMode>().is_err());
    }
}
