//! Host runtime shutdown hooks.
//!
//! Hooks registered with a [`HostRuntime`] run when the process is asked to
//! terminate. [`SignalRuntime`] runs them on SIGINT/SIGTERM from a dedicated
//! signal thread, and on the normal exit path when `main` calls
//! [`SignalRuntime::run_exit_hooks`]. Whichever fires first runs the hooks;
//! the other finds nothing left to do.

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use tracing::{debug, info, warn};

use crate::error::AppError;

pub type ShutdownHook = Box<dyn Fn() + Send + Sync + 'static>;

/// Something that can run cleanup when the process terminates.
pub trait HostRuntime {
    fn register(&self, hook: ShutdownHook) -> Result<(), AppError>;
}

/// Registered hooks, drained exactly once.
#[derive(Clone, Default)]
struct HookList {
    hooks: Arc<Mutex<Vec<ShutdownHook>>>,
}

impl HookList {
    fn push(&self, hook: ShutdownHook) {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).push(hook);
    }

    /// Take every pending hook and run it in registration order.
    ///
    /// The lock is held until the hooks have returned, so a concurrent
    /// drainer blocks until cleanup is complete instead of returning early.
    fn drain_and_run(&self) -> usize {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = std::mem::take(&mut *hooks);
        let count = pending.len();
        for hook in pending {
            hook();
        }
        count
    }
}

/// Production runtime: OS signals plus the normal exit path.
pub struct SignalRuntime {
    hooks: HookList,
}

impl SignalRuntime {
    /// Spawn the signal watcher thread. After a signal the hooks run and the
    /// process exits with `128 + signo`.
    pub fn install() -> Result<Self, AppError> {
        let hooks = HookList::default();
        let watcher_hooks = hooks.clone();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(AppError::Io)?;

        thread::Builder::new()
            .name("shutdown-signals".into())
            .spawn(move || {
                let code = match rt.block_on(wait_for_signal()) {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("signal handling unavailable: {e}");
                        return;
                    }
                };
                info!(exit_code = code, "termination signal received, running shutdown hooks");
                watcher_hooks.drain_and_run();
                std::process::exit(code);
            })?;

        Ok(Self { hooks })
    }

    /// Run hooks that have not run yet. Call on the normal exit path.
    pub fn run_exit_hooks(&self) {
        let ran = self.hooks.drain_and_run();
        debug!(hooks = ran, "exit hooks finished");
    }
}

impl HostRuntime for SignalRuntime {
    fn register(&self, hook: ShutdownHook) -> Result<(), AppError> {
        self.hooks.push(hook);
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<i32> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let code = tokio::select! {
        _ = term.recv() => 128 + libc::SIGTERM,
        _ = int.recv() => 128 + libc::SIGINT,
    };
    Ok(code)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(130)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_run_once_in_order() {
        let list = HookList::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            list.push(Box::new(move || order.lock().unwrap().push(i)));
        }

        assert_eq!(list.drain_and_run(), 3);
        assert_eq!(list.drain_and_run(), 0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn concurrent_drains_run_each_hook_once() {
        let list = HookList::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let calls = calls.clone();
            list.push(Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let list = list.clone();
                thread::spawn(move || list.drain_and_run())
            })
            .collect();
        let total: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();

        assert_eq!(total, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn second_drain_waits_for_running_hooks() {
        use std::sync::atomic::AtomicBool;
        use std::time::Duration;

        let list = HookList::default();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        list.push(Box::new(move || {
            thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
        }));

        let first = {
            let list = list.clone();
            thread::spawn(move || list.drain_and_run())
        };
        thread::sleep(Duration::from_millis(50));

        // Mirrors the signal path: nothing left to run, but it must not
        // return (and exit the process) while cleanup is still in flight.
        assert_eq!(list.drain_and_run(), 0);
        assert!(done.load(Ordering::SeqCst), "returned before cleanup finished");
        assert_eq!(first.join().unwrap(), 1);
    }
}
