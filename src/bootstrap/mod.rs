//! Bootstrap sequencer.
//!
//! ```text
//! Init → EnvResolved → AuxStarting → AuxStarted → ShutdownArmed
//!      → ReadinessWait → Delegated
//! ```
//!
//! Any error moves the sequence to `Failed`, which is absorbing. The
//! primary application is never invoked after a failure, but a shutdown
//! hook that was already armed still fires on process exit.

pub mod services;
pub mod state;

use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    artifact::ArtifactCache,
    config::{ArtifactUrls, Settings},
    env::{self, EffectiveConfig},
    error::AppError,
    primary::{PrimaryEntry, StartupOptions},
    shutdown::HostRuntime,
    status,
    supervisor::ProcessSupervisor,
};
use services::{HY2_SERVICE, NEZHA_SERVICE, NezhaArgs};
pub use state::BootstrapState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    EnvResolved,
    AuxStarting,
    AuxStarted,
    ShutdownArmed,
    ReadinessWait,
    Delegated,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminal result of one bootstrap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The primary entry point was invoked and returned normally.
    Delegated,
    /// The sequence stopped; the string is the human-readable cause.
    Failed(String),
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct Sequencer {
    cache: ArtifactCache,
    supervisor: ProcessSupervisor,
    state: Arc<BootstrapState>,
    cache_dir: PathBuf,
    artifact_urls: ArtifactUrls,
    env_defaults: BTreeMap<String, String>,
    env_lookup: EnvLookup,
    readiness_grace: Duration,
    phase: Phase,
    history: Vec<Phase>,
}

impl Sequencer {
    pub fn new(settings: &Settings, cache: ArtifactCache, supervisor: ProcessSupervisor) -> Self {
        Self {
            cache,
            supervisor,
            state: Arc::new(BootstrapState::new()),
            cache_dir: settings.cache_dir.clone(),
            artifact_urls: settings.artifacts.clone(),
            env_defaults: settings.env_defaults.clone(),
            env_lookup: Box::new(env::process_env),
            readiness_grace: settings.readiness_grace,
            phase: Phase::Init,
            history: vec![Phase::Init],
        }
    }

    /// Replace the process environment as the source of overrides.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Box::new(lookup);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn state(&self) -> &Arc<BootstrapState> {
        &self.state
    }

    /// Run the whole sequence. On success the primary entry point has been
    /// invoked and has returned.
    pub fn run(
        &mut self,
        host: &dyn HostRuntime,
        primary: &mut dyn PrimaryEntry,
        options: StartupOptions,
    ) -> BootstrapOutcome {
        match self.try_run(host, primary, options) {
            Ok(()) => BootstrapOutcome::Delegated,
            Err(e) => {
                let failed_in = self.phase;
                // A service that did start must still be cleaned up on exit.
                if !self.history.contains(&Phase::ShutdownArmed) && !self.state.tracked().is_empty() {
                    if let Err(arm_err) = self.arm_shutdown(host) {
                        warn!("cannot arm shutdown hook: {arm_err}");
                    }
                }
                self.advance(Phase::Failed);
                error!(phase = %failed_in, "bootstrap failed: {e}");
                status::failure(&e);
                BootstrapOutcome::Failed(e.to_string())
            }
        }
    }

    fn try_run(
        &mut self,
        host: &dyn HostRuntime,
        primary: &mut dyn PrimaryEntry,
        options: StartupOptions,
    ) -> Result<(), AppError> {
        let config = env::resolve_layered(&self.env_defaults, &self.env_lookup);
        self.advance(Phase::EnvResolved);

        self.advance(Phase::AuxStarting);
        self.start_hy2(&config)?;
        self.start_nezha(&config)?;
        self.advance(Phase::AuxStarted);

        self.arm_shutdown(host)?;
        self.advance(Phase::ShutdownArmed);

        self.advance(Phase::ReadinessWait);
        debug!(grace_ms = self.readiness_grace.as_millis() as u64, "waiting for auxiliary services");
        std::thread::sleep(self.readiness_grace);

        let running = self.state.tracked();
        if !running.is_empty() {
            status::ok(&format!("{} running", running.join(" + ")));
        }
        status::ok("Starting primary application...");

        self.advance(Phase::Delegated);
        primary.run(options)
    }

    fn arm_shutdown(&self, host: &dyn HostRuntime) -> Result<(), AppError> {
        let state = Arc::clone(&self.state);
        host.register(Box::new(move || state.shutdown()))
    }

    fn start_hy2(&self, config: &EffectiveConfig) -> Result<(), AppError> {
        let descriptor = services::sbx_descriptor(&self.artifact_urls.sbx, &self.cache_dir);
        let binary = self.cache.ensure_local(&descriptor)?;
        let argv = [binary.to_string_lossy().into_owned()];
        let process = self.supervisor.start(HY2_SERVICE, &argv, config.as_map())?;
        self.state.track(process);
        Ok(())
    }

    fn start_nezha(&self, config: &EffectiveConfig) -> Result<(), AppError> {
        let args = match NezhaArgs::from_config(config) {
            Ok(args) => args,
            Err(missing) => {
                warn!("{missing}; skipping {NEZHA_SERVICE}");
                return Ok(());
            }
        };

        let descriptor = services::nezha_descriptor(&self.artifact_urls.nezha_agent, &self.cache_dir);
        let binary = self.cache.ensure_local(&descriptor)?;
        let process = self.supervisor.start(NEZHA_SERVICE, &args.argv(&binary), &BTreeMap::new())?;
        self.state.track(process);
        Ok(())
    }

    fn advance(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "bootstrap phase");
        self.phase = next;
        self.history.push(next);
        if next == Phase::Delegated {
            info!(services = ?self.state.tracked(), "delegating to primary application");
        }
    }
}
