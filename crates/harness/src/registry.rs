//! Loaded-module registry.
//!
//! The kernel exposes its module list through `/proc/modules`, one module per
//! line:
//!
//! ```text
//! my_kmod 16384 0 - Live 0xffffffffc0a5e000 (POE)
//! bonding 200704 0 tls, Live 0x0000000000000000
//! ```
//!
//! Fields are name, size, reference count, comma-terminated dependency list
//! (`-` when empty), state, load address and optional taint flags.

use crate::artifact::normalize_name;
use crate::common::{HarnessError, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Lifecycle state column of `/proc/modules`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ModuleState {
    Live,
    Loading,
    Unloading,
}

impl ModuleState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Live" => Some(ModuleState::Live),
            "Loading" => Some(ModuleState::Loading),
            "Unloading" => Some(ModuleState::Unloading),
            _ => None,
        }
    }
}

/// One parsed `/proc/modules` line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleEntry {
    pub name: String,
    pub size: u64,
    pub refcount: u32,
    pub dependencies: Vec<String>,
    pub state: ModuleState,
    /// Taint letters without parentheses, e.g. `"POE"`.
    pub taint: Option<String>,
}

impl ModuleEntry {
    /// True when the module carries any taint flag (proprietary, out-of-tree,
    /// unsigned, forced, ...).
    pub fn is_tainted(&self) -> bool {
        self.taint.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Read access to the kernel's loaded-module list.
pub trait ModuleRegistry {
    /// Returns every module currently registered.
    fn modules(&self) -> Result<Vec<ModuleEntry>>;

    /// Looks up a module by name, treating `-` and `_` as equivalent.
    fn find(&self, name: &str) -> Result<Option<ModuleEntry>> {
        let wanted = normalize_name(name);
        Ok(self.modules()?.into_iter().find(|m| m.name == wanted))
    }

    fn is_loaded(&self, name: &str) -> Result<bool> {
        Ok(self.find(name)?.is_some())
    }
}

/// Registry backed by a `/proc/modules`-format file.
pub struct ProcModules {
    path: PathBuf,
}

impl ProcModules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcModules {
    fn default() -> Self {
        Self::new("/proc/modules")
    }
}

impl ModuleRegistry for ProcModules {
    fn modules(&self) -> Result<Vec<ModuleEntry>> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| HarnessError::io(format!("reading {}", self.path.display()), e))?;
        Ok(parse_proc_modules(&text))
    }
}

/// Parses the full contents of `/proc/modules`, skipping malformed lines.
pub fn parse_proc_modules(text: &str) -> Vec<ModuleEntry> {
    text.lines().filter_map(parse_line).collect()
}

/// Parses a single `/proc/modules` line.
pub fn parse_line(line: &str) -> Option<ModuleEntry> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let size = fields.next()?.parse().ok()?;
    let refcount = fields.next()?.parse().ok()?;
    let deps = fields.next()?;
    let state = ModuleState::parse(fields.next()?)?;
    let _address = fields.next();

    let dependencies = if deps == "-" {
        Vec::new()
    } else {
        deps.split(',')
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    };

    let taint = fields
        .next()
        .and_then(|t| t.strip_prefix('('))
        .and_then(|t| t.strip_suffix(')'))
        .map(str::to_string);

    Some(ModuleEntry {
        name: name.to_string(),
        size,
        refcount,
        dependencies,
        state,
        taint,
    })
}
