//! Typed publish/subscribe between execution contexts.
//!
//! A [`Signal`] publishes values of one type. Subscribers embed an [`Endpoint`] that fixes the
//! context their slots run in; a slot is a plain function `fn(&S, A)`. Connections carry a
//! [`DispatchMode`](crate::DispatchMode), so invoking a signal can run a slot inline, queue it on
//! the subscriber's context, or queue it and wait.
//!
//! ```rust
//! use std::sync::Arc;
//! use taskloom_core::bus::{Endpoint, Signal, Subscriber};
//! use taskloom_core::{ContextBuilder, DispatchMode};
//!
//! struct Printer {
//!     endpoint: Endpoint,
//! }
//!
//! impl Subscriber for Printer {
//!     fn endpoint(&self) -> &Endpoint {
//!         &self.endpoint
//!     }
//! }
//!
//! fn print(_printer: &Printer, line: String) {
//!     println!("{}", line);
//! }
//!
//! let thread = ContextBuilder::new("printer").spawn().unwrap();
//! let printer = Arc::new(Printer {
//!     endpoint: Endpoint::new(thread.context()),
//! });
//! let lines = Signal::<String>::new(thread.context());
//! lines.connect(&printer, print, DispatchMode::BlockingQueued);
//! assert_eq!(lines.invoke("hello".to_owned()), 1);
//! ```

mod endpoint;
mod registry;
mod sender;
mod signal;

pub use self::endpoint::{Endpoint, Subscriber};
pub use self::registry::{disconnect, Publisher, PublisherId, SlotKey, SubscriberId};
pub use self::signal::Signal;

#[doc(hidden)]
pub use self::endpoint::EndpointShared;
#[doc(hidden)]
pub use self::registry::PublisherLink;
