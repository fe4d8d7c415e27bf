//! Process-group ownership for spawned subprocesses.
//!
//! `kill_on_drop` only reaches the direct child. Wrappers such as `sh -c` or
//! the `az` launcher script fork their own children, so every subprocess is
//! spawned as the leader of a fresh process group and the whole group is
//! killed when a call is abandoned.

use tokio::process::{Child, Command};
use tracing::debug;

/// Configures `command` to run as the leader of a new process group.
pub fn isolate_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    command.process_group(0);
    command.kill_on_drop(true)
}

/// Kills the child's process group when dropped unless [`disarm`] was called.
///
/// [`disarm`]: ProcessGroupGuard::disarm
#[derive(Debug)]
pub struct ProcessGroupGuard {
    leader: Option<u32>,
}

impl ProcessGroupGuard {
    /// Tracks the group led by `child`. The child must have been spawned from
    /// a command passed through [`isolate_process_group`].
    pub fn new(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    /// Leaves the group alone on drop. Call once the child ran to completion.
    pub fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(leader) = self.leader.take() {
            kill_process_group(leader);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(leader: u32) {
    use nix::{
        errno::Errno,
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };

    let Ok(raw) = i32::try_from(leader) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = leader, "killed subprocess group"),
        Err(Errno::ESRCH) => {}
        Err(error) => debug!(pgid = leader, %error, "failed to kill subprocess group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) {}
