//! Test orchestrator.
//!
//! One [`Orchestrator`] drives one run:
//! Locate → Lock → Load → Observe(load marker) → Unload → Observe(unload marker).
//! Each step either advances the [`Phase`] or ends the run in `Failed` with
//! that step's error attached. Nothing is retried. If the run fails or is
//! cancelled while the module is loaded, a single best-effort unload is made
//! before the module lock is released, so no loaded state leaks into the next
//! run.

use crate::artifact::ModuleArtifact;
use crate::common::{CancelToken, HarnessError, Result};
use crate::config::Config;
use crate::loader::{self, ModuleLoader};
use crate::lock::ModuleLock;
use crate::observer::{LogObserver, ObservationResult};
use crate::registry::{ModuleEntry, ModuleRegistry, ProcModules};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle phases and failure steps.
pub mod state;

/// Verdicts and exit codes.
pub mod verdict;

pub use self::state::{Phase, Step};
pub use self::verdict::{Failure, Verdict};

/// Inputs of a single run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestRequest {
    pub artifact_path: PathBuf,
    pub load_marker: String,
    pub unload_marker: String,
    /// Wait applied to each marker independently.
    pub timeout: Duration,
}

impl TestRequest {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        load_marker: impl Into<String>,
        unload_marker: impl Into<String>,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            load_marker: load_marker.into(),
            unload_marker: unload_marker.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything a finished run produced.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub verdict: Verdict,
    pub module: Option<String>,
    pub backend: &'static str,
    /// Phases entered, in order, starting after `Init`.
    pub trail: Vec<Phase>,
    pub load_observation: Option<ObservationResult>,
    pub unload_observation: Option<ObservationResult>,
    /// Registry entry captured once the load was verified.
    pub entry: Option<ModuleEntry>,
}

pub struct Orchestrator {
    request: TestRequest,
    loader: Box<dyn ModuleLoader>,
    observer: LogObserver,
    registry: Option<Box<dyn ModuleRegistry>>,
    lock_dir: PathBuf,
    cancel: CancelToken,

    phase: Phase,
    trail: Vec<Phase>,
    module: Option<String>,
    load_observation: Option<ObservationResult>,
    unload_observation: Option<ObservationResult>,
    entry: Option<ModuleEntry>,
}

impl Orchestrator {
    pub fn new(
        request: TestRequest,
        loader: Box<dyn ModuleLoader>,
        observer: LogObserver,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            request,
            loader,
            observer,
            registry: None,
            lock_dir: lock_dir.into(),
            cancel: CancelToken::new(),
            phase: Phase::Init,
            trail: Vec::new(),
            module: None,
            load_observation: None,
            unload_observation: None,
            entry: None,
        }
    }

    /// Wires up the loader, log source, registry and lock directory named by
    /// `config`.
    pub fn from_config(request: TestRequest, config: &Config) -> Result<Self> {
        config.validate()?;
        let registry = || ProcModules::new(config.registry.path.clone());
        let loader = loader::from_config(&config.loader, config.registry.enabled.then(registry))?;
        let observer = LogObserver::from_config(&config.log);
        let mut orchestrator = Self::new(request, loader, observer, config.lock.dir.clone());
        if config.registry.enabled {
            orchestrator = orchestrator.with_registry(Box::new(registry()));
        }
        Ok(orchestrator)
    }

    /// Attaches a registry used to check membership before load and after
    /// unload.
    pub fn with_registry(mut self, registry: Box<dyn ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Executes the run to completion and returns its report.
    pub fn run(mut self) -> RunReport {
        log::info!(
            "testing {} with the {} loader",
            self.request.artifact_path.display(),
            self.loader.backend()
        );

        let verdict = match self.execute() {
            Ok(()) => {
                self.advance(Phase::Done);
                log::info!("run passed");
                Verdict::pass()
            }
            Err(failure) => {
                self.advance(Phase::Failed);
                log::error!(
                    "run failed at {}: {} ({})",
                    failure.step,
                    failure.kind,
                    failure.message
                );
                Verdict::fail(failure)
            }
        };

        RunReport {
            verdict,
            module: self.module,
            backend: self.loader.backend(),
            trail: self.trail,
            load_observation: self.load_observation,
            unload_observation: self.unload_observation,
            entry: self.entry,
        }
    }

    fn execute(&mut self) -> std::result::Result<(), Failure> {
        let request = self.request.clone();

        let artifact = ModuleArtifact::locate(
            &request.artifact_path,
            &request.load_marker,
            &request.unload_marker,
        )
        .map_err(|e| Failure::new(Step::Locate, &e))?;
        self.module = Some(artifact.name.clone());
        self.advance(Phase::Located);

        self.check_cancelled(Step::Lock)?;
        let _lock = ModuleLock::acquire(&self.lock_dir, &artifact.name, &self.cancel)
            .map_err(|e| Failure::new(Step::Lock, &e))?;

        self.check_cancelled(Step::Load)?;
        self.ensure_absent(&artifact)?;
        self.observer
            .arm()
            .map_err(|e| Failure::new(Step::Load, &e))?;
        let loaded = self
            .loader
            .load(&artifact)
            .map_err(|e| Failure::new(Step::Load, &e))?;
        if !loaded.stderr_text.trim().is_empty() {
            log::warn!("load of `{}` reported: {}", artifact.name, loaded.stderr_text.trim());
        }
        self.advance(Phase::Loaded);

        let observation = self
            .observer
            .observe_cancellable(&artifact.load_marker, request.timeout, &self.cancel)
            .map_err(|e| self.cleanup(&artifact, Failure::new(Step::VerifyLoad, &e)))?;
        let found = observation.found;
        self.load_observation = Some(observation);
        if !found {
            let error = HarnessError::VerificationTimeout {
                marker: artifact.load_marker.clone(),
                waited: request.timeout,
            };
            return Err(self.cleanup(&artifact, Failure::new(Step::VerifyLoad, &error)));
        }
        self.advance(Phase::LoadVerified);
        self.record_entry(&artifact);

        if self.cancel.is_cancelled() {
            return Err(self.cleanup(&artifact, Failure::new(Step::Unload, &HarnessError::Cancelled)));
        }
        self.observer
            .arm()
            .map_err(|e| self.cleanup(&artifact, Failure::new(Step::Unload, &e)))?;
        self.loader
            .unload(&artifact)
            .map_err(|e| Failure::new(Step::Unload, &e))?;
        self.advance(Phase::Unloaded);
        self.ensure_removed(&artifact)?;

        let observation = self
            .observer
            .observe_cancellable(&artifact.unload_marker, request.timeout, &self.cancel)
            .map_err(|e| Failure::new(Step::VerifyUnload, &e))?;
        let found = observation.found;
        self.unload_observation = Some(observation);
        if !found {
            let error = HarnessError::VerificationTimeout {
                marker: artifact.unload_marker.clone(),
                waited: request.timeout,
            };
            return Err(Failure::new(Step::VerifyUnload, &error));
        }
        self.advance(Phase::UnloadVerified);
        Ok(())
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        log::debug!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
        self.trail.push(next);
    }

    fn check_cancelled(&self, step: Step) -> std::result::Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::new(step, &HarnessError::Cancelled));
        }
        Ok(())
    }

    /// Refuses to load a module the registry already lists.
    fn ensure_absent(&self, artifact: &ModuleArtifact) -> std::result::Result<(), Failure> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        match registry.is_loaded(&artifact.name) {
            Ok(false) => Ok(()),
            Ok(true) => Err(Failure::new(
                Step::Load,
                &HarnessError::AlreadyLoaded(artifact.name.clone()),
            )),
            Err(e) => Err(Failure::new(Step::Load, &e)),
        }
    }

    /// Fails the unload step if the registry still lists the module.
    fn ensure_removed(&self, artifact: &ModuleArtifact) -> std::result::Result<(), Failure> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        match registry.find(&artifact.name) {
            Ok(None) => Ok(()),
            Ok(Some(entry)) => Err(Failure::new(
                Step::Unload,
                &HarnessError::KernelRejected {
                    code: None,
                    diagnostic: format!(
                        "`{}` still registered after unload (state {:?}, refcount {})",
                        entry.name, entry.state, entry.refcount
                    ),
                },
            )),
            Err(e) => Err(Failure::new(Step::Unload, &e)),
        }
    }

    fn record_entry(&mut self, artifact: &ModuleArtifact) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.find(&artifact.name) {
            Ok(Some(entry)) => {
                if entry.is_tainted() {
                    log::warn!(
                        "module `{}` taints the kernel ({})",
                        entry.name,
                        entry.taint.as_deref().unwrap_or_default()
                    );
                }
                self.entry = Some(entry);
            }
            Ok(None) => log::warn!("module `{}` not listed after a verified load", artifact.name),
            Err(e) => log::warn!("could not read module registry: {}", e),
        }
    }

    /// Best-effort unload after a failure while the module is loaded.
    fn cleanup(&mut self, artifact: &ModuleArtifact, mut failure: Failure) -> Failure {
        log::warn!("unloading `{}` after {} failure", artifact.name, failure.step);
        failure.cleanup = Some(match self.loader.unload(artifact) {
            Ok(_) => "module unloaded".to_string(),
            Err(e) => {
                log::error!("cleanup unload of `{}` failed: {}", artifact.name, e);
                format!("cleanup unload failed: {e}")
            }
        });
        failure
    }
}
