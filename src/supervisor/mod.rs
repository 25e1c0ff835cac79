//! Process supervisor: starts named auxiliary services and stops them again.
//!
//! There is no restart policy: a child that crashes stays down. Output is
//! never captured; children write straight to the orchestrator's stdout.

pub mod process;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{error::AppError, status};
use process::{Launcher, ProcessHandle};

/// A child process tracked under its logical service name.
pub struct SupervisedProcess {
    name: String,
    handle: Option<Box<dyn ProcessHandle>>,
    alive: bool,
}

impl SupervisedProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.id())
    }

    /// Liveness as last observed; refreshes from the OS when still believed alive.
    pub fn is_alive(&mut self) -> bool {
        if self.alive {
            self.alive = self.handle.as_mut().is_some_and(|h| h.is_alive());
        }
        self.alive
    }

    /// Request graceful termination without waiting for exit.
    ///
    /// Returns `true` only when a termination request was actually sent;
    /// absent handles and already exited processes are a no-op.
    pub fn stop(&mut self) -> bool {
        if !self.is_alive() {
            return false;
        }
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        match handle.terminate() {
            Ok(()) => {
                self.alive = false;
                debug!(service = %self.name, pid = handle.id(), "termination requested");
                true
            }
            Err(e) => {
                // Still running as far as we know; a later stop retries.
                warn!(service = %self.name, pid = handle.id(), "terminate failed: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid())
            .field("alive", &self.alive)
            .finish()
    }
}

pub struct ProcessSupervisor {
    launcher: Box<dyn Launcher>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Box<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Launch `argv` with `env_overlay` added on top of the inherited
    /// environment. Returns as soon as the process is spawned.
    pub fn start(
        &self,
        name: &str,
        argv: &[String],
        env_overlay: &BTreeMap<String, String>,
    ) -> Result<SupervisedProcess, AppError> {
        let handle = self
            .launcher
            .launch(argv, env_overlay)
            .map_err(|source| AppError::Spawn { name: name.to_string(), source })?;

        info!(service = %name, pid = handle.id(), "{name} started");

        Ok(SupervisedProcess { name: name.to_string(), handle: Some(handle), alive: true })
    }

    /// Stop `process` if it is still running and announce it on stdout.
    pub fn stop(process: &mut SupervisedProcess) {
        if process.stop() {
            status::stopped(&process.name);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLauncher;
    use super::*;
    use std::sync::atomic::Ordering;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn start_passes_argv_and_overlay() {
        let launcher = FakeLauncher::default();
        let sup = ProcessSupervisor::new(Box::new(launcher.clone()));
        let env = BTreeMap::from([("NAME".to_string(), "node-1".to_string())]);

        let mut p = sup.start("HY2", &argv(&["/tmp/sbx"]), &env).unwrap();

        assert_eq!(p.name(), "HY2");
        assert!(p.is_alive());
        let launches = launcher.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].argv, ["/tmp/sbx"]);
        assert_eq!(launches[0].env, env);
    }

    #[test]
    fn stop_is_idempotent() {
        let launcher = FakeLauncher::default();
        let sup = ProcessSupervisor::new(Box::new(launcher.clone()));
        let mut p = sup.start("HY2", &argv(&["/tmp/sbx"]), &BTreeMap::new()).unwrap();

        ProcessSupervisor::stop(&mut p);
        ProcessSupervisor::stop(&mut p);

        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 1);
        assert!(!p.is_alive());
    }

    #[test]
    fn stop_skips_already_exited_process() {
        let launcher = FakeLauncher::default();
        let sup = ProcessSupervisor::new(Box::new(launcher.clone()));
        let mut p = sup.start("Nezha Agent", &argv(&["/tmp/nezha-agent"]), &BTreeMap::new()).unwrap();

        // Child exits on its own.
        launcher.alive.lock().unwrap()[0].store(false, Ordering::SeqCst);

        assert!(!p.stop());
        assert_eq!(launcher.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_without_handle_is_noop() {
        let mut p = SupervisedProcess { name: "HY2".into(), handle: None, alive: true };
        assert!(!p.stop());
        assert_eq!(p.pid(), None);
    }

    #[test]
    fn spawn_failure_names_the_service() {
        let sup = ProcessSupervisor::new(Box::new(process::CommandLauncher));
        let err = sup.start("HY2", &[], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, AppError::Spawn { ref name, .. } if name == "HY2"));
    }

    #[test]
    fn failed_terminate_is_retried_by_next_stop() {
        struct StubbornHandle {
            refusals: usize,
            signals: usize,
        }

        impl ProcessHandle for StubbornHandle {
            fn id(&self) -> u32 {
                4242
            }

            fn is_alive(&mut self) -> bool {
                true
            }

            fn terminate(&mut self) -> std::io::Result<()> {
                self.signals += 1;
                if self.refusals > 0 {
                    self.refusals -= 1;
                    return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
                }
                Ok(())
            }
        }

        let handle = StubbornHandle { refusals: 1, signals: 0 };
        let mut p = SupervisedProcess { name: "HY2".into(), handle: Some(Box::new(handle)), alive: true };

        assert!(!p.stop());
        assert!(p.is_alive(), "a refused SIGTERM must not mark the child dead");
        assert!(p.stop());
        assert!(!p.stop());
    }
}
