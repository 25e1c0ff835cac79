//! State shared between the bootstrap sequence and the shutdown hook.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use crate::supervisor::{ProcessSupervisor, SupervisedProcess};

/// The processes actually started plus the running flag.
///
/// One lock guards the tracked handles, so a shutdown hook racing the main
/// sequence (or itself) sees a consistent list and never stops a process
/// twice.
#[derive(Debug)]
pub struct BootstrapState {
    running: AtomicBool,
    processes: Mutex<Vec<SupervisedProcess>>,
}

impl Default for BootstrapState {
    fn default() -> Self {
        Self { running: AtomicBool::new(true), processes: Mutex::new(Vec::new()) }
    }
}

impl BootstrapState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start tracking `process`. Replaces nothing: callers start each
    /// service at most once.
    pub fn track(&self, process: SupervisedProcess) {
        self.lock().push(process);
    }

    /// Names of tracked services, in start order.
    pub fn tracked(&self) -> Vec<String> {
        self.lock().iter().map(|p| p.name().to_string()).collect()
    }

    /// Shutdown hook body: clear the running flag and stop everything tracked.
    pub fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let mut processes = self.lock();
        debug!(was_running, tracked = processes.len(), "stopping supervised services");
        for process in processes.iter_mut() {
            ProcessSupervisor::stop(process);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SupervisedProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
