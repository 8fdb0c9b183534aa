//! Live-test helpers
//!
//! Provides region detection and unique deployment versions for live tests.

use chrono::Utc;

/// Region the live tests run in: `AWS_REGION`, then `AWS_DEFAULT_REGION`,
/// else `us-east-1`.
///
/// ```
/// use agentstack_test_utils::aws::get_test_region;
///
/// let region = get_test_region();
/// assert!(!region.is_empty());
/// ```
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

/// Generate a deployment version no other test run uses.
///
/// Format: `t{unix_secs}{counter}`, a lowercase token short enough that
/// every derived bucket name stays within the S3 length limit.
///
/// # Example
///
/// ```
/// use agentstack_test_utils::aws::test_version;
///
/// let version = test_version();
/// assert!(version.starts_with('t'));
/// ```
pub fn test_version() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("t{ts}{counter}")
}
