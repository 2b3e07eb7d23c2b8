//! Privileged module loader/unloader.
//!
//! A [`ModuleLoader`] inserts and removes a module through one of the host's
//! privileged primitives and classifies failures into the harness error
//! taxonomy. Loaders never retry: repeating a failed kernel mutation can leave
//! the module registry in a worse state than the first failure did.

use crate::artifact::ModuleArtifact;
use crate::common::{HarnessError, Result};
use crate::config::{LoaderBackend, LoaderConfig};
use crate::registry::ProcModules;
use serde::Serialize;
use std::fmt;

/// `insmod` / `rmmod` backend.
pub mod command;

/// `finit_module(2)` / `delete_module(2)` backend.
#[cfg(target_os = "linux")]
pub mod syscall;

pub use self::command::CommandLoader;
#[cfg(target_os = "linux")]
pub use self::syscall::SyscallLoader;

/// Outcome of a successful load or unload request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub success: bool,
    pub exit_code: i32,
    /// Diagnostic text the primitive emitted, possibly empty.
    pub stderr_text: String,
}

impl LoadResult {
    pub fn ok(stderr_text: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stderr_text: stderr_text.into(),
        }
    }
}

/// Direction of a loader request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Load,
    Unload,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Load => f.write_str("load"),
            Operation::Unload => f.write_str("unload"),
        }
    }
}

/// The interface every loader backend implements.
pub trait ModuleLoader {
    /// Short backend name for logs and reports.
    fn backend(&self) -> &'static str;

    /// Inserts the module.
    ///
    /// Fails with `AlreadyLoaded`, `PermissionDenied` or `KernelRejected`.
    fn load(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult>;

    /// Removes the module.
    ///
    /// Fails with `NotLoaded` when the module is absent, never succeeding
    /// silently, or with `PermissionDenied` / `KernelRejected`.
    fn unload(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult>;
}

/// Builds the loader selected by `config`. `registry` is only used by the
/// command backend, for its membership pre-checks.
pub fn from_config(
    config: &LoaderConfig,
    registry: Option<ProcModules>,
) -> Result<Box<dyn ModuleLoader>> {
    match config.backend {
        LoaderBackend::Command => Ok(Box::new(CommandLoader::new(config, registry))),
        #[cfg(target_os = "linux")]
        LoaderBackend::Syscall => Ok(Box::new(SyscallLoader::new(&config.params))),
        #[cfg(not(target_os = "linux"))]
        LoaderBackend::Syscall => Err(HarnessError::Config(
            "the syscall loader backend is only available on Linux".into(),
        )),
    }
}

/// Maps an errno from `finit_module` / `delete_module` to a harness error.
pub fn classify_errno(op: Operation, module: &str, errno: i32) -> HarnessError {
    let text = std::io::Error::from_raw_os_error(errno).to_string();
    match (op, errno) {
        (Operation::Load, libc::EEXIST) => HarnessError::AlreadyLoaded(module.to_string()),
        (Operation::Unload, libc::ENOENT) => HarnessError::NotLoaded(module.to_string()),
        (_, libc::EPERM) | (_, libc::EACCES) => {
            HarnessError::PermissionDenied(format!("{op} of `{module}`: {text}"))
        }
        _ => HarnessError::KernelRejected {
            code: Some(errno),
            diagnostic: text,
        },
    }
}

/// Classifies a failed `insmod` / `rmmod` invocation by its stderr text.
pub fn classify_output(op: Operation, module: &str, exit_code: i32, stderr: &str) -> HarnessError {
    let lowered = stderr.to_ascii_lowercase();
    if op == Operation::Load && lowered.contains("file exists") {
        return HarnessError::AlreadyLoaded(module.to_string());
    }
    if op == Operation::Unload
        && (lowered.contains("not currently loaded")
            || lowered.contains("does not exist in /proc/modules"))
    {
        return HarnessError::NotLoaded(module.to_string());
    }
    if lowered.contains("operation not permitted") || lowered.contains("permission denied") {
        return HarnessError::PermissionDenied(stderr.trim().to_string());
    }
    HarnessError::KernelRejected {
        code: Some(exit_code),
        diagnostic: stderr.trim().to_string(),
    }
}
