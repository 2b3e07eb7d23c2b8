//! `insmod` / `rmmod` loader.
//!
//! Shells out to the module tools and captures their exit status and stderr.
//! When a registry is attached it is consulted first, so that double loads
//! and double unloads are reported as `AlreadyLoaded` / `NotLoaded` regardless
//! of how a given tool version words its error message. Without one, only the
//! tool's stderr is classified.

use super::{LoadResult, ModuleLoader, Operation, classify_output};
use crate::artifact::ModuleArtifact;
use crate::common::{HarnessError, Result};
use crate::config::LoaderConfig;
use crate::registry::{ModuleRegistry, ProcModules};
use std::path::PathBuf;
use std::process::Command;

pub struct CommandLoader {
    insmod: String,
    rmmod: String,
    params: Vec<String>,
    registry: Option<ProcModules>,
}

impl CommandLoader {
    pub fn new(config: &LoaderConfig, registry: Option<ProcModules>) -> Self {
        Self {
            insmod: config.insmod.clone(),
            rmmod: config.rmmod.clone(),
            params: config.params.split_whitespace().map(str::to_string).collect(),
            registry,
        }
    }

    /// Registry membership, or `None` when no registry is attached.
    fn is_loaded(&self, name: &str) -> Result<Option<bool>> {
        self.registry
            .as_ref()
            .map(|registry| registry.is_loaded(name))
            .transpose()
    }

    fn run(&self, op: Operation, module: &str, program: &str, args: &[String]) -> Result<LoadResult> {
        let resolved = resolve(program)?;
        log::debug!("running {} {}", resolved.display(), args.join(" "));

        let output = Command::new(&resolved)
            .args(args)
            .output()
            .map_err(|e| HarnessError::io(format!("spawning {}", resolved.display()), e))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal: no exit code, report as -1.
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(classify_output(op, module, exit_code, &stderr));
        }
        Ok(LoadResult {
            success: true,
            exit_code,
            stderr_text: stderr,
        })
    }
}

impl ModuleLoader for CommandLoader {
    fn backend(&self) -> &'static str {
        "command"
    }

    fn load(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        if self.is_loaded(&artifact.name)? == Some(true) {
            return Err(HarnessError::AlreadyLoaded(artifact.name.clone()));
        }
        let mut args = vec![artifact.path.to_string_lossy().into_owned()];
        args.extend(self.params.iter().cloned());
        self.run(Operation::Load, &artifact.name, &self.insmod, &args)
    }

    fn unload(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        if self.is_loaded(&artifact.name)? == Some(false) {
            return Err(HarnessError::NotLoaded(artifact.name.clone()));
        }
        self.run(
            Operation::Unload,
            &artifact.name,
            &self.rmmod,
            &[artifact.name.clone()],
        )
    }
}

fn resolve(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| HarnessError::KernelRejected {
        code: None,
        diagnostic: format!("cannot locate `{program}`: {e}"),
    })
}
