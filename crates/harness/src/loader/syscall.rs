//! Direct system-call loader.
//!
//! Inserts modules with `finit_module(2)` on an open file descriptor and
//! removes them with `delete_module(2)`. Requires `CAP_SYS_MODULE`.

use super::{LoadResult, ModuleLoader, Operation, classify_errno};
use crate::artifact::ModuleArtifact;
use crate::common::{HarnessError, Result};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;

/// `finit_module` flag asking the kernel to decompress the file itself.
pub const MODULE_INIT_COMPRESSED_FILE: libc::c_int = 4;

pub struct SyscallLoader {
    params: String,
}

impl SyscallLoader {
    pub fn new(params: &str) -> Self {
        Self {
            params: params.to_string(),
        }
    }
}

impl ModuleLoader for SyscallLoader {
    fn backend(&self) -> &'static str {
        "syscall"
    }

    fn load(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        let file = File::open(&artifact.path).map_err(|e| HarnessError::NotReadable {
            path: artifact.path.clone(),
            reason: e.to_string(),
        })?;
        let params = CString::new(self.params.as_str())
            .map_err(|_| HarnessError::Config("module params contain a NUL byte".into()))?;
        let flags = if artifact.compression.is_compressed() {
            MODULE_INIT_COMPRESSED_FILE
        } else {
            0
        };

        log::debug!(
            "finit_module({}, {:?}, {:#x})",
            artifact.path.display(),
            self.params,
            flags
        );
        // SAFETY: `file` outlives the call and `params` is a valid NUL-terminated string.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_finit_module,
                file.as_raw_fd(),
                params.as_ptr(),
                flags,
            )
        };
        if rc != 0 {
            let errno = last_errno();
            return Err(classify_errno(Operation::Load, &artifact.name, errno));
        }
        Ok(LoadResult::ok(""))
    }

    fn unload(&mut self, artifact: &ModuleArtifact) -> Result<LoadResult> {
        let name = CString::new(artifact.name.as_str())
            .map_err(|_| HarnessError::Config("module name contains a NUL byte".into()))?;

        log::debug!("delete_module({}, O_NONBLOCK)", artifact.name);
        // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
        let rc = unsafe { libc::syscall(libc::SYS_delete_module, name.as_ptr(), libc::O_NONBLOCK) };
        if rc != 0 {
            let errno = last_errno();
            return Err(classify_errno(Operation::Unload, &artifact.name, errno));
        }
        Ok(LoadResult::ok(""))
    }
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}
