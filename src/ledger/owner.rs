//! Claim ownership identity

use std::fmt;
use uuid::Uuid;

/// Identity of the invocation holding (or attempting) a claim
///
/// The token is fresh per invocation. The pid is recorded so a later
/// invocation on the same host can tell whether a `claimed` entry's owner
/// is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub token: String,
    pub pid: u32,
    pub actor: String,
}

impl Owner {
    /// Owner for the current process
    pub fn current(actor: impl Into<String>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            actor: actor.into(),
        }
    }

    /// Owner with an explicit pid, for simulating other processes
    pub fn with_pid(actor: impl Into<String>, pid: u32) -> Self {
        Self {
            pid,
            ..Self::current(actor)
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {}, {})", self.actor, self.pid, self.token)
    }
}

/// Whether a process with `pid` exists on this host
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }

    // EPERM: the process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a liveness check every owner is treated as alive
#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    true
}
