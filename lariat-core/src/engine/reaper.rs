//! Child-process reaping.
//!
//! The binder must collect the exit status of traced child processes when
//! their handle is destroyed, so they never linger as zombies. The syscall
//! is isolated behind [`ProcessReaper`] so tests can script terminal
//! statuses without forking.

use std::io;

/// How a reaped child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
}

/// Waits on a child process and reports how it terminated.
pub trait ProcessReaper {
    /// Block until `pid` terminates and return its disposition.
    ///
    /// Errors surface the underlying wait failure, e.g. the child was
    /// already reaped by other code (`ECHILD`).
    fn reap(&self, pid: i32) -> io::Result<ExitDisposition>;
}

/// Production reaper backed by `waitpid(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysReaper;

#[cfg(unix)]
impl ProcessReaper for SysReaper {
    fn reap(&self, pid: i32) -> io::Result<ExitDisposition> {
        let mut status: libc::c_int = 0;
        loop {
            let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, 0) };
            if rc == pid as libc::pid_t {
                break;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if libc::WIFEXITED(status) {
            Ok(ExitDisposition::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Ok(ExitDisposition::Signaled(libc::WTERMSIG(status)))
        } else {
            // Stopped/continued never reach here without WUNTRACED.
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wait status {status} for pid {pid}"),
            ))
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn reaps_exit_code_of_a_real_child() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("exit 33")
            .spawn()
            .expect("spawn sh");
        let pid = child.id() as i32;

        let disposition = SysReaper.reap(pid).expect("waitpid");
        assert_eq!(disposition, ExitDisposition::Exited(33));
    }

    #[test]
    fn reaping_twice_reports_the_wait_failure() {
        let child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id() as i32;

        assert!(SysReaper.reap(pid).is_ok());
        // Second wait has no child left to collect.
        assert!(SysReaper.reap(pid).is_err());
    }
}
