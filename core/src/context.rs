//! Execution contexts.
//!
//! A context is a named OS thread that drains a FIFO event queue. Callables posted to a context run
//! one at a time on that thread, in the order a given sender posted them. Objects that "live" in a
//! context (subscribers, worker hosts, the scheduler) are only ever mutated by callables running on
//! it, which is what lets the rest of the crate avoid fine-grained locking.
//!
//! Stopping a context mirrors an event loop `quit`: the callable that is currently running finishes,
//! every callable still queued behind it is discarded, and the thread exits. Blocking callers whose
//! callable is discarded are released with [`DispatchError::Disconnected`](crate::DispatchError).

use crate::dispatch::DispatchError;
use crate::lcore::{pin_thread_to_core, CoreId};

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use thiserror::Error;

pub(crate) type Callable = Box<dyn FnOnce() + Send + 'static>;

enum Event {
    Call(Callable),
    /// Wakes a context blocked on an empty queue so it can observe a stop request.
    Wake,
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Process-unique identifier of a context.
#[derive(Debug, Copy, Clone, Hash, Ord, Eq, PartialEq, PartialOrd)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ContextShared {
    id: ContextId,
    name: String,
    tx: Sender<Event>,
    running: AtomicBool,
}

/// A cloneable handle to an execution context, used as the target of
/// [`dispatch`](crate::dispatch()).
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// Returns the context whose thread is executing the caller, if any.
    pub fn current() -> Option<Context> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns `true` if the calling thread is this context's thread.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map_or(false, |ctx| ctx.id() == self.id())
        })
    }

    /// Returns `false` once the context has been asked to stop or its thread has exited.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Appends `callable` to the event queue.
    pub(crate) fn post(&self, callable: Callable) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Disconnected);
        }
        self.shared
            .tx
            .send(Event::Call(callable))
            .map_err(|_| DispatchError::Disconnected)
    }

    fn request_stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            log::debug!("Stopping context {}", self);
            // The receiver is gone if the thread already exited.
            let _ = self.shared.tx.send(Event::Wake);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.shared.name, self.shared.id)
    }
}

/* --------------------------------------------------------------------------------- */

/// Errors raised by the thread primitives backing a context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to spawn thread for context {name}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("context {name} panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Configures and spawns an execution context.
pub struct ContextBuilder {
    name: String,
    core: Option<CoreId>,
    stack_size: Option<usize>,
}

impl ContextBuilder {
    /// Creates a builder for a context whose thread will be named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        ContextBuilder {
            name: name.into(),
            core: None,
            stack_size: None,
        }
    }

    /// Sets the CPU core the context thread will be pinned to.
    pub fn set_core(mut self, core: CoreId) -> Self {
        self.core = Some(core);
        self
    }

    /// Sets the stack size of the context thread, in bytes.
    pub fn set_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Spawns the context thread. The returned handle owns the thread; queued callables start
    /// running immediately.
    pub fn spawn(self) -> Result<ContextThread, ContextError> {
        let (tx, rx) = unbounded();
        let context = Context {
            shared: Arc::new(ContextShared {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                name: self.name.clone(),
                tx,
                running: AtomicBool::new(true),
            }),
        };

        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_context = context.clone();
        let core = self.core;
        let handle = builder
            .spawn(move || {
                if let Some(core) = core {
                    if let Err(e) = pin_thread_to_core(core) {
                        log::warn!("Failed to pin context {} to core {}: {}", thread_context, core, e);
                    }
                }
                run_event_loop(thread_context, rx);
            })
            .map_err(|source| ContextError::Spawn {
                name: self.name,
                source,
            })?;

        log::debug!("Spawned context {}", context);
        Ok(ContextThread {
            context,
            handle: Some(handle),
        })
    }
}

/// Clears the running flag and the thread-local context when the event loop exits, including by
/// unwinding out of a panicking callable.
struct LoopGuard(Context);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.shared.running.store(false, Ordering::Release);
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

fn run_event_loop(context: Context, rx: Receiver<Event>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(context.clone()));
    let guard = LoopGuard(context);

    while let Ok(event) = rx.recv() {
        if !guard.0.is_running() {
            break;
        }
        match event {
            Event::Call(callable) => callable(),
            Event::Wake => continue,
        }
    }

    let discarded = rx
        .try_iter()
        .filter(|event| matches!(event, Event::Call(_)))
        .count();
    if discarded > 0 {
        log::debug!("Context {} discarded {} queued callables", guard.0, discarded);
    }
    log::debug!("Context {} exited", guard.0);
}

/* --------------------------------------------------------------------------------- */

/// Owning handle of a context thread.
///
/// Dropping the handle stops the context and joins its thread.
pub struct ContextThread {
    context: Context,
    handle: Option<JoinHandle<()>>,
}

impl ContextThread {
    /// Returns a handle to the context run by this thread.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Asks the event loop to exit once the callable currently running returns. Callables still
    /// queued are discarded.
    pub fn stop(&self) {
        self.context.request_stop();
    }

    /// Waits for the thread to exit. Does not stop it; see [`ContextThread::stop`].
    ///
    /// Joining from the context's own thread is skipped, since it could never complete.
    pub fn join(&mut self) -> Result<(), ContextError> {
        if self.context.is_current() {
            log::warn!("Context {} cannot join itself", self.context);
            return Ok(());
        }
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|payload| ContextError::Panicked {
                name: self.context.name().to_owned(),
                message: panic_message(payload.as_ref()),
            }),
            None => Ok(()),
        }
    }

    /// Stops the context and joins its thread.
    pub fn shutdown(mut self) -> Result<(), ContextError> {
        self.stop();
        self.join()
    }
}

impl Drop for ContextThread {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            log::error!("{}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::time::Duration;

    #[test]
    fn core_context_runs_callables_in_post_order() {
        let thread = ContextBuilder::new("fifo").spawn().unwrap();
        let (tx, rx) = unbounded();
        for i in 0..100 {
            let tx = tx.clone();
            thread.context().post(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let received: Vec<i32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn core_context_current_inside_and_outside() {
        let thread = ContextBuilder::new("current").spawn().unwrap();
        assert!(Context::current().is_none());
        assert!(!thread.context().is_current());

        let (tx, rx) = bounded(1);
        let ctx = thread.context().clone();
        thread
            .context()
            .post(Box::new(move || {
                let current = Context::current().map(|c| c.id());
                tx.send((current, ctx.is_current())).unwrap();
            }))
            .unwrap();
        let (current, is_current) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(current, Some(thread.context().id()));
        assert!(is_current);
    }

    #[test]
    fn core_context_stop_discards_queued_callables() {
        let thread = ContextBuilder::new("discard").spawn().unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded(1);
        let (ran_tx, ran_rx) = unbounded();

        thread
            .context()
            .post(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = gate_rx.recv();
            }))
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for i in 0..10 {
            let ran_tx = ran_tx.clone();
            thread
                .context()
                .post(Box::new(move || ran_tx.send(i).unwrap()))
                .unwrap();
        }

        let ctx = thread.context().clone();
        thread.stop();
        assert!(!ctx.is_running());
        drop(gate_tx);
        thread.shutdown().unwrap();

        drop(ran_tx);
        assert!(ran_rx.try_recv().is_err());
        assert_eq!(
            ctx.post(Box::new(|| {})).unwrap_err(),
            DispatchError::Disconnected
        );
    }

    #[test]
    fn core_context_join_reports_panic() {
        let mut thread = ContextBuilder::new("panics").spawn().unwrap();
        thread
            .context()
            .post(Box::new(|| panic!("worker exploded")))
            .unwrap();
        match thread.join() {
            Err(ContextError::Panicked { name, message }) => {
                assert_eq!(name, "panics");
                assert_eq!(message, "worker exploded");
            }
            other => panic!("unexpected join result: {:?}", other),
        }
        assert!(!thread.context().is_running());
    }
}
