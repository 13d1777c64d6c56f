//! Process-group helpers.
//!
//! Every collector subprocess joins the scheduler's own process group, so a
//! single `killpg` reaches the scheduler and everything it started.

use std::io;

use tracing::warn;

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: i32,
}

impl ProcessGroup {
    /// Process group of the calling process.
    pub fn current() -> Result<Self, SchedulerError> {
        // SAFETY: getpgid(0) only reads the caller's process group.
        let pgid = unsafe { libc::getpgid(0) };
        if pgid < 0 {
            return Err(SchedulerError::ProcessGroup(io::Error::last_os_error()));
        }
        Ok(Self { pgid })
    }

    pub fn id(&self) -> i32 {
        self.pgid
    }

    /// SIGKILL the whole group, the calling process included.
    pub fn kill_all(&self) -> io::Result<()> {
        warn!(pgid = self.pgid, "killing process group");
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(self.pgid, libc::SIGKILL) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
