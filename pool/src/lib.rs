//! A dynamically resizable worker pool built on taskloom contexts.
//!
//! Applications provide a [`Worker`], which turns a task into a result, and a [`Processor`],
//! which consumes results. The [`Pool`] clones the worker once per slot, runs every clone on its
//! own thread, and routes results to the processor on a thread of its own. The queue, the pool
//! size and the pool's lifecycle are driven through a [`PoolControl`], including from inside the
//! processor.
//!
//! ```rust
//! use taskloom_pool::{FnWorker, Pool, PoolControl, Processor};
//!
//! #[derive(Default)]
//! struct Sum(u64);
//!
//! impl Processor<u64, u64> for Sum {
//!     fn on_result(&mut self, result: u64, _pool: &PoolControl<u64>) {
//!         self.0 += result;
//!     }
//! }
//!
//! let pool = Pool::new(FnWorker::new(|x: u64| x * x), Sum::default(), 2).unwrap();
//! pool.control().extend(1..=4).unwrap();
//! pool.wait_for_idle().unwrap();
//! assert_eq!(pool.processor().with(|sum, _| sum.0), 30);
//! pool.shutdown().unwrap();
//! ```

pub mod config;
mod control;
mod error;
mod processor;
mod runtime;
mod scheduler;
mod stats;
mod worker;

pub use self::config::{default_config, load_config, PoolConfig};
pub use self::control::{PoolControl, PoolSnapshot};
pub use self::error::PoolError;
pub use self::processor::{Processor, ProcessorHost};
pub use self::runtime::Pool;
pub use self::stats::PoolStats;
pub use self::worker::{FnWorker, InstanceToken, SlotId, WorkDone, Worker, WorkerHost};
