use super::LogSource;
use crate::common::{HarnessError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads a plain text log by byte offset.
///
/// Only newline-terminated lines are returned; a trailing partial line is
/// held back until its newline arrives. A file that shrinks below the current
/// offset is assumed rotated and is read again from the start.
pub struct FileLogSource {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl FileLogSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            // Not created yet: behaves as an empty log.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(HarnessError::io(format!("stat {}", self.path.display()), e)),
        }
    }
}

impl LogSource for FileLogSource {
    fn mark_end(&mut self) -> Result<()> {
        self.offset = self.len()?;
        self.partial.clear();
        Ok(())
    }

    fn read_new(&mut self) -> Result<Vec<String>> {
        let len = self.len()?;
        if len < self.offset {
            log::warn!("{} shrank; assuming rotation", self.path.display());
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)
            .map_err(|e| HarnessError::io(format!("opening {}", self.path.display()), e))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| HarnessError::io(format!("seeking {}", self.path.display()), e))?;
        let mut buf = Vec::new();
        let read = file
            .read_to_end(&mut buf)
            .map_err(|e| HarnessError::io(format!("reading {}", self.path.display()), e))?;
        self.offset += read as u64;

        self.partial.extend_from_slice(&buf);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        Ok(String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect())
    }
}
