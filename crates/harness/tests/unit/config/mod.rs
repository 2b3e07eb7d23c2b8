//! # Configuration Tests
