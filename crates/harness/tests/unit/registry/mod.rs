//! # Module Registry Tests
