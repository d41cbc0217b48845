//! Configuration options.
//!
//! A pool can be built directly from a size with [`Pool::new`](crate::Pool::new), or from a
//! [`PoolConfig`] that also controls thread naming, core pinning and stack sizes. Configurations are
//! typically loaded from a TOML file whose path is passed on the command line:
//!
//! ```toml
//! pool_size = 4
//! name_prefix = "collatz"
//! worker_cores = [2, 3, 4, 5]
//! scheduler_core = 1
//! ```

use crate::worker::SlotId;

use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use taskloom_core::CoreId;

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PoolConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: PoolConfig = toml::from_str(&config_str)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Loads a default configuration: one worker per available core, no pinning.
pub fn default_config() -> PoolConfig {
    PoolConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Pool configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers started with the pool. Defaults to the available parallelism.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Prefix of every thread name spawned by the pool. Workers are named
    /// `<prefix>-worker-<slot>`. Defaults to `"taskloom"`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Cores to pin worker threads to, assigned round-robin by slot id. Workers are not pinned
    /// when unset.
    #[serde(default = "default_cores")]
    pub worker_cores: Option<Vec<u32>>,

    /// Core to pin the scheduler thread to.
    #[serde(default = "default_core")]
    pub scheduler_core: Option<u32>,

    /// Core to pin the processor thread to.
    #[serde(default = "default_core")]
    pub processor_core: Option<u32>,

    /// Stack size of worker threads, in bytes. Uses the platform default when unset.
    #[serde(default = "default_stack_size")]
    pub stack_size: Option<usize>,
}

impl PoolConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(cores) = &self.worker_cores {
            if cores.is_empty() {
                bail!("worker_cores must list at least one core when set");
            }
        }
        if self.name_prefix.is_empty() {
            bail!("name_prefix must not be empty");
        }
        Ok(())
    }

    /// Core assigned to the worker in `slot`, if worker pinning is configured.
    pub(crate) fn worker_core(&self, slot: SlotId) -> Option<CoreId> {
        match &self.worker_cores {
            Some(cores) if !cores.is_empty() => Some(CoreId(cores[slot.0 % cores.len()])),
            _ => None,
        }
    }

    pub(crate) fn thread_name(&self, role: &str) -> String {
        format!("{}-{}", self.name_prefix, role)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_size: default_pool_size(),
            name_prefix: default_name_prefix(),
            worker_cores: default_cores(),
            scheduler_core: default_core(),
            processor_core: default_core(),
            stack_size: default_stack_size(),
        }
    }
}

fn default_pool_size() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_name_prefix() -> String {
    "taskloom".to_owned()
}

fn default_cores() -> Option<Vec<u32>> {
    None
}

fn default_core() -> Option<u32> {
    None
}

fn default_stack_size() -> Option<usize> {
    None
}
