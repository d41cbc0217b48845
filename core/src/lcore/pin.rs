use super::CoreId;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use nix::Error;

/// Pins the calling thread to `core`.
pub fn pin_thread_to_core(core: CoreId) -> Result<(), Error> {
    let mut cpu_set = CpuSet::new();
    cpu_set.set(core.raw() as usize)?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set)?;
    Ok(())
}
