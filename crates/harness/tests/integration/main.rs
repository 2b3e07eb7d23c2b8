//! # Integration Tests
//!
//! End-to-end harness runs against an in-process fake kernel.
