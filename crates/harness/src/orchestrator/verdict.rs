use super::state::Step;
use crate::common::{ErrorKind, HarnessError};
use serde::Serialize;

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_HARNESS_ERROR: i32 = 1;
pub const EXIT_LOCATE_FAILED: i32 = 2;
pub const EXIT_LOAD_FAILED: i32 = 3;
pub const EXIT_VERIFICATION_TIMEOUT: i32 = 4;
pub const EXIT_UNLOAD_FAILED: i32 = 5;
pub const EXIT_CANCELLED: i32 = 130;

/// Why a run failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
    /// Text captured from the kernel or module tool.
    pub diagnostic: Option<String>,
    /// Outcome of the best-effort unload made before reporting, if one was needed.
    pub cleanup: Option<String>,
}

impl Failure {
    pub fn new(step: Step, error: &HarnessError) -> Self {
        Self {
            step,
            kind: error.kind(),
            message: error.to_string(),
            diagnostic: error.diagnostic().map(str::to_string),
            cleanup: None,
        }
    }
}

/// Final pass/fail result of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub failure: Option<Failure>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failure: None,
        }
    }

    pub fn fail(failure: Failure) -> Self {
        Self {
            passed: false,
            failure: Some(failure),
        }
    }

    pub fn failure_reason(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> i32 {
        let Some(failure) = &self.failure else {
            return EXIT_PASSED;
        };
        match failure.kind {
            ErrorKind::Cancelled => return EXIT_CANCELLED,
            ErrorKind::VerificationTimeout => return EXIT_VERIFICATION_TIMEOUT,
            ErrorKind::Io | ErrorKind::Config => return EXIT_HARNESS_ERROR,
            _ => {}
        }
        match failure.step {
            Step::Locate => EXIT_LOCATE_FAILED,
            Step::Lock => EXIT_HARNESS_ERROR,
            Step::Load => EXIT_LOAD_FAILED,
            // Timeouts were mapped above; anything else here is the log source failing.
            Step::VerifyLoad | Step::VerifyUnload => EXIT_HARNESS_ERROR,
            Step::Unload => EXIT_UNLOAD_FAILED,
        }
    }
}
