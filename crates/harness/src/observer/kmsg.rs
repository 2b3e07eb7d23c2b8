use super::LogSource;
use crate::common::{HarnessError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Largest record the kernel hands out through `/dev/kmsg`.
const RECORD_MAX: usize = 8192;

/// One structured record from `/dev/kmsg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmsgRecord {
    pub priority: u32,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub message: String,
}

/// Parses `prio,seq,timestamp,flags[,...];message` plus optional continuation
/// lines (` KEY=value`), which are dropped.
pub fn parse_record(raw: &str) -> Option<KmsgRecord> {
    let (header, rest) = raw.split_once(';')?;
    let mut fields = header.split(',');
    let priority = fields.next()?.trim().parse().ok()?;
    let sequence = fields.next()?.trim().parse().ok()?;
    let timestamp_us = fields.next()?.trim().parse().ok()?;
    let message = rest.lines().next().unwrap_or("").to_string();
    Some(KmsgRecord {
        priority,
        sequence,
        timestamp_us,
        message,
    })
}

/// Reads the kernel ring buffer through `/dev/kmsg`.
///
/// Each `read(2)` on the device returns exactly one record. The file is
/// opened non-blocking, so an empty buffer ends a scan instead of stalling
/// the poll loop.
pub struct KmsgLogSource {
    path: PathBuf,
    file: Option<File>,
    last_sequence: Option<u64>,
}

impl KmsgLogSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            last_sequence: None,
        }
    }

    fn open(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => HarnessError::PermissionDenied(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )),
                _ => HarnessError::io(format!("opening {}", self.path.display()), e),
            })
    }
}

impl LogSource for KmsgLogSource {
    fn mark_end(&mut self) -> Result<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        // SEEK_END on /dev/kmsg positions after the newest record.
        file.seek(SeekFrom::End(0))
            .map_err(|e| HarnessError::io(format!("seeking {}", self.path.display()), e))?;
        self.file = Some(file);
        Ok(())
    }

    fn read_new(&mut self) -> Result<Vec<String>> {
        if self.file.is_none() {
            self.mark_end()?;
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };
        drain_records(file, &mut self.last_sequence)
            .map_err(|e| HarnessError::io(format!("reading {}", self.path.display()), e))
    }
}

/// Reads records until `reader` reports `WouldBlock` or end of file, returning
/// the message of each record newer than `last_sequence`.
///
/// Every successful read is one record. Interrupted reads are retried and an
/// `EPIPE` (records overwritten before they were read) is skipped. Records
/// with a sequence number at or below `last_sequence` are dropped.
pub fn drain_records(
    reader: &mut impl Read,
    last_sequence: &mut Option<u64>,
) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = vec![0u8; RECORD_MAX];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let raw = String::from_utf8_lossy(&buf[..n]);
                let Some(record) = parse_record(&raw) else {
                    continue;
                };
                if last_sequence.is_some_and(|seq| record.sequence <= seq) {
                    continue;
                }
                *last_sequence = Some(record.sequence);
                lines.push(record.message);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
                log::debug!("kmsg records overwritten before they were read");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lines)
}
