//! # File Log Source Tests

use kmodharness::observer::{FileLogSource, LogSource};
use pretty_assertions::assert_eq;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[test]
fn test_mark_end_skips_existing_lines() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kern.log");
    append(&log, "old line 1\nold line 2\n");

    let mut source = FileLogSource::new(&log);
    source.mark_end().unwrap();
    assert_eq!(source.offset(), 22);
    assert!(source.read_new().unwrap().is_empty());

    append(&log, "new line\n");
    assert_eq!(source.read_new().unwrap(), vec!["new line".to_string()]);
    assert!(source.read_new().unwrap().is_empty());
}

#[test]
fn test_partial_line_is_held_back() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kern.log");
    let mut source = FileLogSource::new(&log);
    source.mark_end().unwrap();

    append(&log, "Hello ");
    assert!(source.read_new().unwrap().is_empty());

    append(&log, "world!\nnext");
    assert_eq!(source.read_new().unwrap(), vec!["Hello world!".to_string()]);

    append(&log, "\n");
    assert_eq!(source.read_new().unwrap(), vec!["next".to_string()]);
}

#[test]
fn test_missing_file_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("not-yet.log");
    let mut source = FileLogSource::new(&log);
    source.mark_end().unwrap();
    assert!(source.read_new().unwrap().is_empty());

    append(&log, "created\n");
    assert_eq!(source.read_new().unwrap(), vec!["created".to_string()]);
}

#[test]
fn test_rotation_restarts_from_beginning() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kern.log");
    append(&log, "a fairly long line that will disappear\n");

    let mut source = FileLogSource::new(&log);
    source.mark_end().unwrap();

    fs::write(&log, "rotated\n").unwrap();
    assert_eq!(source.read_new().unwrap(), vec!["rotated".to_string()]);
}
