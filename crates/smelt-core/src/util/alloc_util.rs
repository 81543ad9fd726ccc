use log::{debug, info};
use std::process::Command;

/// Compacts system memory.
///
/// Writes to `/proc/sys/vm/compact_memory` so that huge page reservations
/// are more likely to succeed.
///
/// # Errors
///
/// Returns error if system commands fail
pub fn compact_mem() -> Result<(), std::io::Error> {
    let output = Command::new("sh")
        .arg("-c")
        .arg("echo 1 | tee /proc/sys/vm/compact_memory")
        .output()?;
    if !output.status.success() {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Pins the calling thread to a single logical core.
///
/// Timing-sensitive work must not migrate between cores, otherwise cycle
/// counts and performance counters of different cores get mixed.
///
/// # Errors
///
/// Returns the OS error if `sched_setaffinity` fails.
pub fn pin_to_core(cpu: usize) -> Result<(), std::io::Error> {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
    }
    let r = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
    if r != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let mut current: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let r =
        unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut current) };
    if r == 0 {
        for i in 0..libc::CPU_SETSIZE as usize {
            if unsafe { libc::CPU_ISSET(i, &current) } {
                info!("running on CPU {}", i);
            }
        }
    }
    Ok(())
}

/// Gives up the remainder of the current time slice.
///
/// Called right before measurements so they start with a fresh slice.
pub fn yield_now() {
    let r = unsafe { libc::sched_yield() };
    if r != 0 {
        debug!("sched_yield: {}", std::io::Error::last_os_error());
    }
}
