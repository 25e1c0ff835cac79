//! Primary application entry point.
//!
//! The primary application is a black box: it receives the startup options
//! exactly as given on the command line after `--` and owns the rest of the
//! process lifetime.

use std::{
    process::{Command, ExitStatus},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use tracing::{info, warn};

use crate::{error::AppError, shutdown::ShutdownHook, supervisor::process::terminate_pid};

/// Pre-parsed options forwarded untouched to the primary application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupOptions {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
}

impl StartupOptions {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

/// Hands control to the primary application. Does not return while the
/// application is running.
pub trait PrimaryEntry {
    fn run(&mut self, options: StartupOptions) -> Result<(), AppError>;
}

/// Runs the primary application as a child with inherited stdio and blocks
/// until it exits.
#[derive(Debug, Default)]
pub struct CommandEntry {
    /// Pid of the running primary, 0 when none.
    pid: Arc<AtomicU32>,
}

impl CommandEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook that asks a running primary to terminate. Safe to call at any
    /// time, including before the primary has started.
    pub fn shutdown_hook(&self) -> ShutdownHook {
        let pid = Arc::clone(&self.pid);
        Box::new(move || {
            let pid = pid.swap(0, Ordering::SeqCst);
            if pid == 0 {
                return;
            }
            if let Err(e) = terminate_pid(pid) {
                warn!(pid, "cannot terminate primary application: {e}");
            }
        })
    }
}

impl PrimaryEntry for CommandEntry {
    fn run(&mut self, options: StartupOptions) -> Result<(), AppError> {
        let (program, args) = options
            .argv
            .split_first()
            .ok_or_else(|| AppError::Delegation("no primary application given (pass it after `--`)".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| AppError::Delegation(format!("cannot start {program}: {e}")))?;

        self.pid.store(child.id(), Ordering::SeqCst);
        info!(program = %program, pid = child.id(), "primary application started");

        let status = child.wait();
        self.pid.store(0, Ordering::SeqCst);
        check_exit(program, status?)
    }
}

fn check_exit(program: &str, status: ExitStatus) -> Result<(), AppError> {
    if status.success() {
        info!(program = %program, "primary application exited");
        Ok(())
    } else {
        Err(AppError::Delegation(format!("{program} exited with {status}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn opts(items: &[&str]) -> StartupOptions {
        StartupOptions::new(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn empty_options_fail_delegation() {
        let err = CommandEntry::new().run(StartupOptions::default()).unwrap_err();
        assert!(matches!(err, AppError::Delegation(_)));
    }

    #[test]
    fn successful_exit_is_ok() {
        CommandEntry::new().run(opts(&["true"])).unwrap();
    }

    #[test]
    fn non_zero_exit_is_delegation_failure() {
        let err = CommandEntry::new().run(opts(&["sh", "-c", "exit 3"])).unwrap_err();
        assert!(err.to_string().contains("exit"));
        assert!(matches!(err, AppError::Delegation(_)));
    }

    #[test]
    fn arguments_pass_through_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("args.txt");
        let script = format!("printf '%s|' \"$@\" > '{}'", out.display());
        CommandEntry::new()
            .run(opts(&["sh", "-c", &script, "sh", "--nogui", "--port", "25565"]))
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "--nogui|--port|25565|");
    }

    #[test]
    fn hook_before_start_is_noop() {
        let entry = CommandEntry::new();
        let hook = entry.shutdown_hook();
        hook();
        hook();
    }
}
