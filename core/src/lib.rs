//! Execution contexts and a typed messaging bus for moving work between threads.
//!
//! Taskloom programs are built from long-lived [contexts](context): named threads that each drain
//! a FIFO queue of callables. Code running in one context reaches another only through
//! [`dispatch`] or through a [`Signal`](bus::Signal) connected to a subscriber living there, so
//! state owned by a context is only ever touched from its own thread.
//!
//! The `taskloom-pool` crate builds a resizable worker pool on top of these primitives.

#[macro_use]
extern crate lazy_static;

pub mod bus;
pub mod context;
pub mod dispatch;
pub mod lcore;

pub use self::bus::{disconnect, Endpoint, PublisherId, Signal, Subscriber, SubscriberId};
pub use self::context::{Context, ContextBuilder, ContextError, ContextId, ContextThread};
pub use self::dispatch::{call, dispatch, DispatchError, DispatchMode};
pub use self::lcore::CoreId;
