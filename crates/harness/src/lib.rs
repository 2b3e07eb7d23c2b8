//! Kernel module lifecycle test harness.
//!
//! This crate loads a prebuilt kernel module, watches the kernel log for the
//! marker lines its init and exit callbacks emit, unloads it again, and
//! reduces the whole run to a single pass/fail [`Verdict`]. It provides:
//! - **Artifact:** Locating a module file and deriving its kernel name.
//! - **Loader:** `finit_module`/`delete_module` and `insmod`/`rmmod` backends.
//! - **Observer:** Marker polling over `/dev/kmsg` or a plain log file.
//! - **Registry:** Parsing `/proc/modules` for membership and taint flags.
//! - **Lock:** Cross-process serialisation keyed by module name.
//! - **Orchestrator:** The per-run state machine and verdict.

/// Common error types and the cancellation token.
pub mod common;

/// Harness configuration structures.
pub mod config;

/// Module artifact location and naming.
pub mod artifact;

/// Privileged module insert/remove backends.
pub mod loader;

/// Kernel log sources and marker observation.
pub mod observer;

/// Loaded-module registry (`/proc/modules`) parsing.
pub mod registry;

/// Named per-module locks.
pub mod lock;

/// Test run state machine and verdicts.
pub mod orchestrator;

pub use crate::artifact::ModuleArtifact;
pub use crate::common::{CancelToken, ErrorKind, HarnessError, Result};
pub use crate::config::Config;
pub use crate::loader::{LoadResult, ModuleLoader};
pub use crate::observer::{LogObserver, LogSource, ObservationResult};
pub use crate::orchestrator::{Orchestrator, RunReport, TestRequest, Verdict};
pub use crate::registry::{ModuleEntry, ModuleRegistry};
