//! # Error Tests

use kmodharness::common::{ErrorKind, HarnessError};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[rstest]
#[case(HarnessError::NotFound { path: PathBuf::from("/x.ko") }, ErrorKind::NotFound)]
#[case(HarnessError::NotReadable { path: PathBuf::from("/x.ko"), reason: "denied".into() }, ErrorKind::NotReadable)]
#[case(HarnessError::PermissionDenied("load".into()), ErrorKind::PermissionDenied)]
#[case(HarnessError::AlreadyLoaded("hello".into()), ErrorKind::AlreadyLoaded)]
#[case(HarnessError::NotLoaded("hello".into()), ErrorKind::NotLoaded)]
#[case(HarnessError::KernelRejected { code: Some(8), diagnostic: "Exec format error".into() }, ErrorKind::KernelRejected)]
#[case(HarnessError::VerificationTimeout { marker: "Hello world!".into(), waited: Duration::from_secs(2) }, ErrorKind::VerificationTimeout)]
#[case(HarnessError::Cancelled, ErrorKind::Cancelled)]
#[case(HarnessError::io("reading log", io::Error::other("boom")), ErrorKind::Io)]
#[case(HarnessError::Config("bad".into()), ErrorKind::Config)]
fn test_kind_mapping(#[case] error: HarnessError, #[case] kind: ErrorKind) {
    assert_eq!(error.kind(), kind);
}

#[test]
fn test_kind_names_match_reported_reasons() {
    assert_eq!(ErrorKind::NotFound.to_string(), "NotFound");
    assert_eq!(ErrorKind::VerificationTimeout.to_string(), "VerificationTimeout");
    assert_eq!(ErrorKind::KernelRejected.as_str(), "KernelRejected");
}

#[test]
fn test_kernel_rejected_message_includes_code() {
    let err = HarnessError::KernelRejected {
        code: Some(1),
        diagnostic: "insmod: ERROR: Invalid module format".into(),
    };
    assert_eq!(
        err.to_string(),
        "kernel rejected request (code 1): insmod: ERROR: Invalid module format"
    );
    assert_eq!(err.diagnostic(), Some("insmod: ERROR: Invalid module format"));
}

#[test]
fn test_kernel_rejected_without_code() {
    let err = HarnessError::KernelRejected {
        code: None,
        diagnostic: "still registered".into(),
    };
    assert_eq!(err.to_string(), "kernel rejected request: still registered");
}

#[test]
fn test_diagnostic_absent_for_plain_errors() {
    assert_eq!(HarnessError::NotLoaded("hello".into()).diagnostic(), None);
    assert_eq!(HarnessError::Cancelled.diagnostic(), None);
}

#[test]
fn test_io_error_keeps_source() {
    use std::error::Error;
    let err = HarnessError::io("opening /dev/kmsg", io::Error::from(io::ErrorKind::NotFound));
    assert!(err.source().is_some());
    assert!(err.to_string().starts_with("opening /dev/kmsg: "));
}
