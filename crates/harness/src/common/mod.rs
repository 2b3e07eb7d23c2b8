//! Common types shared by every harness component.

/// Harness error type and error kind tags.
pub mod error;

/// Cooperative cancellation flag.
pub mod cancel;

pub use self::cancel::CancelToken;
pub use self::error::{ErrorKind, HarnessError, Result};
