//! Scheduling hints for the receive thread. Both are best effort: a
//! failure is logged and the receiver keeps running.

use std::io;
use tracing::{info, warn};

/// Switch the calling thread to `SCHED_FIFO` at `priority`.
pub fn go_realtime(priority: i32) -> io::Result<()> {
    // SAFETY: sched_param is plain data, all zero is a valid value.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;
    // SAFETY: pid 0 targets the calling thread and `param` outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Apply the optional realtime priority and CPU pinning.
pub fn apply(priority: Option<i32>, core: Option<usize>) {
    if let Some(priority) = priority {
        match go_realtime(priority) {
            Ok(()) => info!("Running with SCHED_FIFO priority {}", priority),
            Err(e) => warn!("Failed to set realtime priority {}: {}", priority, e),
        }
    }

    if let Some(core) = core {
        pin_to_core(core);
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("CPU affinity not supported, not pinning to core {}", core);
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!("Receive thread pinned to CPU core {}", core);
        }
        Some(_) => warn!("Failed to pin receive thread to CPU core {}", core),
        None => warn!("CPU core {} not available", core),
    }
}
