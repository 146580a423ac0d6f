//! Production hardening: memory pinning and core dump prevention.
//!
//! On Unix systems, this module provides two measures:
//!
//! 1. **`disable_core_dumps`** — sets `RLIMIT_CORE` to 0, so a crash never
//!    writes a core file that could contain `hmac_secret` or a plaintext
//!    token mid-request.
//! 2. **`lock_memory`** — calls `mlockall(MCL_CURRENT | MCL_FUTURE)` to pin
//!    all current and future memory pages, preventing the OS from swapping
//!    secret material to disk.
//!
//! Both are no-ops on non-Unix platforms.

/// Disable core dumps by setting `RLIMIT_CORE` to 0.
///
/// Call this early in `main()`, before the HMAC secret or any token is
/// loaded into memory.
///
/// # Errors
///
/// Returns an error string if the `setrlimit` syscall fails.
#[cfg(unix)]
pub fn disable_core_dumps() -> Result<(), String> {
    // SAFETY: setrlimit is a POSIX syscall setting resource limits for the
    // current process; the rlimit struct is fully initialized and valid.
    #[allow(unsafe_code)]
    let result = unsafe {
        let rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        libc::setrlimit(libc::RLIMIT_CORE, &rlim)
    };

    if result == 0 {
        Ok(())
    } else {
        Err(format!(
            "setrlimit(RLIMIT_CORE, 0) failed with errno {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn disable_core_dumps() -> Result<(), String> {
    Ok(())
}

/// Pin all current and future memory pages with `mlockall`.
///
/// Requires `CAP_IPC_LOCK` on Linux or running as root. Set
/// `FABRIC_DISABLE_MLOCK=true` to skip this in development.
///
/// # Errors
///
/// Returns an error string if the `mlockall` syscall fails.
#[cfg(unix)]
pub fn lock_memory() -> Result<(), String> {
    // SAFETY: mlockall takes well-defined flag bits and only instructs the
    // kernel to keep mapped pages resident; it has no memory safety
    // implications of its own.
    #[allow(unsafe_code)]
    let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };

    if result == 0 {
        Ok(())
    } else {
        Err(format!(
            "mlockall(MCL_CURRENT | MCL_FUTURE) failed with errno {}",
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn lock_memory() -> Result<(), String> {
    Ok(())
}

/// Apply hardening before logging is initialized, using `eprintln` since
/// `tracing` is not yet available at this point in startup.
#[allow(clippy::print_stderr)]
pub fn apply(disable_mlock: bool) {
    if let Err(e) = disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }

    if disable_mlock {
        eprintln!("WARNING: mlock disabled via FABRIC_DISABLE_MLOCK — secrets may be swapped to disk");
    } else if let Err(e) = lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e} (set FABRIC_DISABLE_MLOCK=true for dev)");
    }
}
