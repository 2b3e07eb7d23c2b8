//! # Failure Classification Tests

use kmodharness::common::ErrorKind;
use kmodharness::loader::{Operation, classify_errno, classify_output};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case(Operation::Load, libc::EEXIST, ErrorKind::AlreadyLoaded)]
#[case(Operation::Load, libc::EPERM, ErrorKind::PermissionDenied)]
#[case(Operation::Load, libc::EACCES, ErrorKind::PermissionDenied)]
#[case(Operation::Load, libc::ENOEXEC, ErrorKind::KernelRejected)]
#[case(Operation::Load, libc::ENOENT, ErrorKind::KernelRejected)]
#[case(Operation::Unload, libc::ENOENT, ErrorKind::NotLoaded)]
#[case(Operation::Unload, libc::EPERM, ErrorKind::PermissionDenied)]
#[case(Operation::Unload, libc::EWOULDBLOCK, ErrorKind::KernelRejected)]
#[case(Operation::Unload, libc::EEXIST, ErrorKind::KernelRejected)]
fn test_classify_errno(#[case] op: Operation, #[case] errno: i32, #[case] kind: ErrorKind) {
    assert_eq!(classify_errno(op, "hello", errno).kind(), kind);
}

#[test]
fn test_rejected_errno_carries_code_and_text() {
    let err = classify_errno(Operation::Load, "hello", libc::ENOEXEC);
    match err {
        kmodharness::HarnessError::KernelRejected { code, diagnostic } => {
            assert_eq!(code, Some(libc::ENOEXEC));
            assert!(!diagnostic.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[rstest]
#[case(
    Operation::Load,
    "insmod: ERROR: could not insert module hello.ko: File exists",
    ErrorKind::AlreadyLoaded
)]
#[case(
    Operation::Load,
    "insmod: ERROR: could not insert module hello.ko: Operation not permitted",
    ErrorKind::PermissionDenied
)]
#[case(
    Operation::Load,
    "insmod: ERROR: could not insert module hello.ko: Invalid module format",
    ErrorKind::KernelRejected
)]
#[case(
    Operation::Unload,
    "rmmod: ERROR: Module hello is not currently loaded",
    ErrorKind::NotLoaded
)]
#[case(
    Operation::Unload,
    "ERROR: Module hello does not exist in /proc/modules",
    ErrorKind::NotLoaded
)]
#[case(
    Operation::Unload,
    "rmmod: ERROR: could not remove module hello: Permission denied",
    ErrorKind::PermissionDenied
)]
#[case(
    Operation::Unload,
    "rmmod: ERROR: Module hello is in use",
    ErrorKind::KernelRejected
)]
#[case(Operation::Unload, "File exists", ErrorKind::KernelRejected)]
fn test_classify_output(#[case] op: Operation, #[case] stderr: &str, #[case] kind: ErrorKind) {
    assert_eq!(classify_output(op, "hello", 1, stderr).kind(), kind);
}

#[test]
fn test_rejected_output_keeps_trimmed_stderr() {
    let err = classify_output(Operation::Load, "hello", 1, "  bad things\n");
    assert_eq!(err.diagnostic(), Some("bad things"));
}

#[test]
fn test_operation_display() {
    assert_eq!(Operation::Load.to_string(), "load");
    assert_eq!(Operation::Unload.to_string(), "unload");
}
