//! Module artifact locator.
//!
//! Resolves a prebuilt loadable module on disk and derives the name the
//! kernel will register it under. Location is a read-only check: the file
//! must exist, be a regular file, be non-empty and be openable for reading.

use crate::common::{HarnessError, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Compression applied to a module file, as implied by its suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Compression {
    None,
    Xz,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

const SUFFIXES: [(&str, Compression); 4] = [
    (".ko.xz", Compression::Xz),
    (".ko.gz", Compression::Gzip),
    (".ko.zst", Compression::Zstd),
    (".ko", Compression::None),
];

/// A located module artifact together with the markers expected from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleArtifact {
    pub path: PathBuf,
    /// Kernel-side module name, with `-` normalised to `_`.
    pub name: String,
    pub compression: Compression,
    pub load_marker: String,
    pub unload_marker: String,
}

impl ModuleArtifact {
    /// Locates the artifact at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Filesystem path to the `.ko` (optionally compressed) file.
    /// * `load_marker` - Literal expected in the kernel log after init.
    /// * `unload_marker` - Literal expected in the kernel log after exit.
    ///
    /// # Errors
    ///
    /// `NotFound` if the path is absent or not a regular file, `NotReadable`
    /// if it cannot be opened or is empty.
    pub fn locate(
        path: impl AsRef<Path>,
        load_marker: impl Into<String>,
        unload_marker: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => HarnessError::NotFound {
                path: path.to_path_buf(),
            },
            _ => HarnessError::NotReadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        if !meta.is_file() {
            return Err(HarnessError::NotFound {
                path: path.to_path_buf(),
            });
        }

        File::open(path).map_err(|e| HarnessError::NotReadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if meta.len() == 0 {
            return Err(HarnessError::NotReadable {
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }

        let (name, compression) = module_name(path);
        log::debug!(
            "located module `{}` at {} ({} bytes, {:?})",
            name,
            path.display(),
            meta.len(),
            compression
        );

        Ok(Self {
            path: path.to_path_buf(),
            name,
            compression,
            load_marker: load_marker.into(),
            unload_marker: unload_marker.into(),
        })
    }
}

/// Derives the kernel module name and compression from a file path.
///
/// `hello-world.ko.xz` becomes `hello_world`. Files without a recognised
/// module suffix fall back to their file stem.
pub fn module_name(path: &Path) -> (String, Compression) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for (suffix, compression) in SUFFIXES {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return (normalize_name(stem), compression);
            }
        }
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name);
    (normalize_name(&stem), Compression::None)
}

/// The kernel treats `-` and `_` in module names as equivalent and reports `_`.
pub fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}
