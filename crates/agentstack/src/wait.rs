//! Bounded fixed-interval polling.
//!
//! Provides a generic "await terminal state" abstraction used for every
//! long-running control-plane operation (stack create, update and delete).
//! There is no cancellation path other than process termination.

use std::future::Future;
use std::time::Duration;

use agentstack_common::defaults::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};
use thiserror::Error;
use tracing::{debug, warn};

use crate::aws::AwsError;

/// Configuration for fixed-interval polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between consecutive checks
    pub interval: Duration,
    /// Maximum number of checks before giving up
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Why polling stopped without reaching a terminal state
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The attempt bound ran out while the resource was still changing
    #[error("{resource} did not reach a terminal state after {attempts} checks")]
    Exhausted { resource: String, attempts: u32 },

    /// A status check failed with a non-retryable error
    #[error("status check for {resource} failed")]
    Check {
        resource: String,
        #[source]
        source: AwsError,
    },
}

/// Poll `check` every `config.interval` until `is_terminal` accepts its
/// value or `config.max_attempts` checks have been made.
///
/// Retryable check failures (throttling, timeouts) consume an attempt and
/// polling continues; any other failure stops immediately.
///
/// # Example
/// ```ignore
/// let snapshot = await_terminal(
///     &poll,
///     "agentstack-v1",
///     || stacks.describe_stack("agentstack-v1"),
///     |s| !s.status.ends_with("_IN_PROGRESS"),
/// ).await?;
/// ```
pub async fn await_terminal<T, F, Fut, P>(
    config: &PollConfig,
    resource: &str,
    mut check: F,
    is_terminal: P,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AwsError>>,
    P: Fn(&T) -> bool,
{
    for attempt in 1..=config.max_attempts {
        match check().await {
            Ok(value) if is_terminal(&value) => {
                debug!(resource = %resource, attempt, "Reached terminal state");
                return Ok(value);
            }
            Ok(_) => {
                debug!(resource = %resource, attempt, "Not terminal yet");
            }
            Err(e) if e.is_retryable() => {
                warn!(resource = %resource, attempt, error = %e, "Status check failed, will retry");
            }
            Err(e) => {
                return Err(WaitError::Check {
                    resource: resource.to_string(),
                    source: e,
                });
            }
        }

        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    Err(WaitError::Exhausted {
        resource: resource.to_string(),
        attempts: config.max_attempts,
    })
}
