//! Best-effort OS scheduling hooks.
//!
//! Scheduling classes and thread priorities are applied where the platform
//! supports them. Permission failures (the usual outcome for real-time
//! classes without privileges) are tolerated.

use crate::attr::SchedPolicy;
use crate::error::Result;
use crate::job::Priority;

#[cfg(target_os = "linux")]
pub(crate) fn set_process_policy(policy: SchedPolicy) -> Result<()> {
    use crate::error::PoolError;

    let native = match policy {
        SchedPolicy::Other => libc::SCHED_OTHER,
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::RoundRobin => libc::SCHED_RR,
    };
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        libc::sched_getparam(0, &mut param);
        param.sched_priority = libc::sched_get_priority_min(native);
        if libc::sched_setscheduler(0, native, &param) == -1 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            if errno != libc::EPERM {
                return Err(PoolError::InvalidPolicy);
            }
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_process_policy(_policy: SchedPolicy) -> Result<()> {
    Ok(())
}

/// Map a job priority onto the current policy's priority range and apply it
/// to the calling thread. Low maps to the minimum, Med to the midpoint and
/// High to the maximum.
#[cfg(target_os = "linux")]
pub(crate) fn apply_thread_priority(priority: Priority) {
    unsafe {
        let thread = libc::pthread_self();
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();
        if libc::pthread_getschedparam(thread, &mut policy, &mut param) != 0 {
            return;
        }
        let min = libc::sched_get_priority_min(policy);
        let max = libc::sched_get_priority_max(policy);
        if min < 0 || max < 0 {
            return;
        }
        param.sched_priority = match priority {
            Priority::Low => min,
            Priority::Med => min + (max - min) / 2,
            Priority::High => max,
        };
        // EPERM is expected for unprivileged processes
        let _ = libc::pthread_setschedparam(thread, policy, &param);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn apply_thread_priority(_priority: Priority) {}
