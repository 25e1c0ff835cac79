//! OS process plumbing behind the supervisor.
//!
//! [`Launcher`] and [`ProcessHandle`] are the seams the supervisor talks to;
//! [`CommandLauncher`] is the real implementation on top of
//! `std::process::Command`.

use std::{
    collections::BTreeMap,
    io,
    process::{Child, Command, Stdio},
};

/// A running (or finished) child process.
pub trait ProcessHandle: Send {
    fn id(&self) -> u32;

    /// `false` once the process has exited.
    fn is_alive(&mut self) -> bool;

    /// Ask the process to exit. Does not wait.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Spawns child processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, argv: &[String], env: &BTreeMap<String, String>) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Spawns real OS processes. The child's stdout is inherited and its stderr
/// is pointed at the same stream, so both land in the orchestrator's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(&self, argv: &[String], env: &BTreeMap<String, String>) -> io::Result<Box<dyn ProcessHandle>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(merged_stderr()?);

        let child = cmd.spawn()?;
        Ok(Box::new(child))
    }
}

#[cfg(unix)]
fn merged_stderr() -> io::Result<Stdio> {
    use std::os::fd::AsFd;
    let stdout = io::stdout().as_fd().try_clone_to_owned()?;
    Ok(Stdio::from(stdout))
}

#[cfg(not(unix))]
fn merged_stderr() -> io::Result<Stdio> {
    Ok(Stdio::inherit())
}

impl ProcessHandle for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        terminate_pid(Child::id(self))
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }
}

/// Send SIGTERM to `pid`.
#[cfg(unix)]
pub fn terminate_pid(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid out of range: {pid}")))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "graceful termination by pid is unix-only"))
}
