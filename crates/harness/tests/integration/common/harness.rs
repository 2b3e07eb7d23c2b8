//! A fake kernel for privilege-free end-to-end runs.
//!
//! [`FakeKernel`] keeps the loaded-module set in memory and "prints" module
//! markers into a plain log file, which the orchestrator reads through the
//! ordinary [`FileLogSource`].

use kmodharness::common::{HarnessError, Result};
use kmodharness::observer::{FileLogSource, LogObserver};
use kmodharness::registry::{ModuleEntry, ModuleRegistry, ModuleState};
use kmodharness::{LoadResult, ModuleArtifact, ModuleLoader, Orchestrator, TestRequest};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const LOAD_MARKER: &str = "Hello world!";
pub const UNLOAD_MARKER: &str = "Cleaning up module.";

/// How the fake kernel misbehaves.
#[derive(Clone, Debug)]
pub struct Behaviour {
    pub emit_load_marker: bool,
    pub emit_unload_marker: bool,
    /// Emit the load marker from a background thread after this delay.
    pub load_delay: Option<Duration>,
    pub reject_unload: bool,
    /// Report unload success but keep the module registered.
    pub leave_registered: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            emit_load_marker: true,
            emit_unload_marker: true,
            load_delay: None,
            reject_unload: false,
            leave_registered: false,
        }
    }
}

#[derive(Default)]
struct KernelState {
    loaded: BTreeSet<String>,
    load_calls: usize,
    unload_calls: usize,
}

#[derive(Clone)]
pub struct FakeKernel {
    state: Rc<RefCell<KernelState>>,
    pub behaviour: Rc<RefCell<Behaviour>>,
    log: PathBuf,
}

impl FakeKernel {
    pub fn new(log: &Path) -> Self {
        Self {
            state: Rc::default(),
            behaviour: Rc::default(),
            log: log.to_path_buf(),
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.borrow().loaded.contains(name)
    }

    pub fn preload(&self, name: &str) {
        self.state.borrow_mut().loaded.insert(name.to_string());
    }

    pub fn load_calls(&self) -> usize {
        self.state.borrow().load_calls
    }

    pub fn unload_calls(&self) -> usize {
        self.state.borrow().unload_calls
    }

    pub fn membership(&self) -> BTreeSet<String> {
        self.state.borrow().loaded.clone()
    }

    fn printk(&self, message: &str) {
        append(&self.log, &format!("[  314.159265] {message}"));
    }
}

pub fn append(path: &Path, line: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    writeln!(file, "{line}").unwrap();
}

pub struct FakeLoader(pub FakeKernel);

impl ModuleLoader for FakeLoader {
    fn backend(&self) -> &'static str {
        "fake"
    }

    fn load(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        let kernel = &self.0;
        let behaviour = kernel.behaviour.borrow().clone();
        {
            let mut state = kernel.state.borrow_mut();
            state.load_calls += 1;
            if !state.loaded.insert(artifact.name.clone()) {
                return Err(HarnessError::AlreadyLoaded(artifact.name.clone()));
            }
        }
        if behaviour.emit_load_marker {
            match behaviour.load_delay {
                Some(delay) => {
                    let log = kernel.log.clone();
                    let marker = artifact.load_marker.clone();
                    thread::spawn(move || {
                        thread::sleep(delay);
                        // The run may have finished and removed the log by now.
                        if let Ok(mut file) = OpenOptions::new().append(true).open(&log) {
                            let _ = writeln!(file, "[  314.500000] {marker}");
                        }
                    });
                }
                None => kernel.printk(&artifact.load_marker),
            }
        }
        Ok(LoadResult::ok(""))
    }

    fn unload(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        let kernel = &self.0;
        let behaviour = kernel.behaviour.borrow().clone();
        {
            let mut state = kernel.state.borrow_mut();
            state.unload_calls += 1;
            if !state.loaded.contains(&artifact.name) {
                return Err(HarnessError::NotLoaded(artifact.name.clone()));
            }
            if behaviour.reject_unload {
                return Err(HarnessError::KernelRejected {
                    code: Some(libc::EBUSY),
                    diagnostic: "Device or resource busy".into(),
                });
            }
            if !behaviour.leave_registered {
                state.loaded.remove(&artifact.name);
            }
        }
        if behaviour.emit_unload_marker {
            kernel.printk(&artifact.unload_marker);
        }
        Ok(LoadResult::ok(""))
    }
}

pub struct FakeRegistry(pub FakeKernel);

impl ModuleRegistry for FakeRegistry {
    fn modules(&self) -> Result<Vec<ModuleEntry>> {
        Ok(self
            .0
            .membership()
            .into_iter()
            .map(|name| ModuleEntry {
                name,
                size: 16384,
                refcount: 0,
                dependencies: Vec::new(),
                state: ModuleState::Live,
                taint: Some("POE".to_string()),
            })
            .collect())
    }
}

/// A temp directory holding a module artifact, a kernel log and lock files,
/// plus the fake kernel that acts on them.
pub struct TestHarness {
    pub dir: TempDir,
    pub artifact: PathBuf,
    pub log: PathBuf,
    pub kernel: FakeKernel,
}

impl TestHarness {
    pub fn boot_default() -> Self {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("my_kmod.ko");
        fs::write(&artifact, b"\x7fELF\x02\x01\x01").unwrap();
        let log = dir.path().join("kern.log");
        fs::write(&log, "[    0.000000] Linux version 6.1.0\n").unwrap();
        let kernel = FakeKernel::new(&log);
        Self {
            dir,
            artifact,
            log,
            kernel,
        }
    }

    pub fn behave(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.kernel.behaviour.borrow_mut());
    }

    pub fn request(&self, timeout: Duration) -> TestRequest {
        TestRequest::new(&self.artifact, LOAD_MARKER, UNLOAD_MARKER).with_timeout(timeout)
    }

    pub fn orchestrator(&self, request: TestRequest) -> Orchestrator {
        let observer = LogObserver::new(
            Box::new(FileLogSource::new(&self.log)),
            Duration::from_millis(10),
        );
        Orchestrator::new(
            request,
            Box::new(FakeLoader(self.kernel.clone())),
            observer,
            self.dir.path(),
        )
        .with_registry(Box::new(FakeRegistry(self.kernel.clone())))
    }
}
