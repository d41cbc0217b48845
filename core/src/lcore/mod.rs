//! CPU core identifiers and thread pinning.

mod pin;

pub use self::pin::pin_thread_to_core;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical CPU core that a context thread can be pinned to.
#[derive(Debug, Copy, Clone, Hash, Ord, Eq, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct CoreId(pub u32);

impl CoreId {
    /// For `sched_setaffinity`
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CoreId {
    fn from(core: u32) -> Self {
        CoreId(core)
    }
}
