//! Shared test utilities for agentstack
//!
//! Helpers for the opt-in integration tests that run against a real AWS
//! account. Kept in their own crate so every test target can use them.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and throwaway deployment versions

pub mod aws;

pub use aws::{get_test_region, test_version};
