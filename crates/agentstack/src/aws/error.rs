//! Control-plane error taxonomy
//!
//! SDK failures are sorted by their service error code into the handful of
//! categories callers branch on. [`Outcome`] is the tri-state view of one
//! call and [`with_retry`] the bounded backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use tracing::warn;

/// Result alias used by every cloud client trait
pub type AwsResult<T> = Result<T, AwsError>;

/// What went wrong with a control-plane call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AwsError {
    /// The target is gone or never existed
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// A create found the target already in place
    #[error("resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Throttled by the service
    #[error("rate limit exceeded: {message}")]
    Throttled { message: String },

    /// Resource still has dependents or contents (retryable, clears with time)
    #[error("resource is in use ({code}): {message}")]
    Conflict { code: String, message: String },

    /// Request never completed (timeout, connection failure)
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// Anything else the service or SDK reported
    #[error("AWS error{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// An error raised locally, before any request was sent
    pub fn invalid_request(message: impl std::fmt::Display) -> Self {
        AwsError::Sdk {
            code: None,
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Worth repeating the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AwsError::Throttled { .. } | AwsError::Conflict { .. } | AwsError::Transient { .. }
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    /// The service error code, when the service returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Conflict { code, .. } => Some(code),
            AwsError::Sdk { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Codes meaning the target does not exist, across every service used here
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NotFound",
    "NoSuchEntity",
    "NoSuchKey",
    "ResourceNotFoundException",
    "IndexNotFound",
    "NotFoundException",
    "RepositoryNotFoundException",
    "ImageNotFoundException",
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "RepositoryAlreadyExistsException",
    "AlreadyExistsException",
];

/// Rate limiting codes
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
    "RequestThrottled",
    "ServiceUnavailable",
];

/// Dependency or non-empty conflicts
const CONFLICT_CODES: &[&str] = &[
    "DependencyViolation",
    "DeleteConflict",
    "BucketNotEmpty",
    "RepositoryNotEmptyException",
    "ConflictException",
    "OperationAbortedException",
];

/// Map a service error code (and message) onto [`AwsError`].
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("no error message").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled { message },
        Some(c) if CONFLICT_CODES.contains(&c) => AwsError::Conflict {
            code: c.to_string(),
            message,
        },
        // CloudFormation reports a missing stack as a validation error
        Some("ValidationError") if message.contains("does not exist") => {
            AwsError::NotFound { message }
        }
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

impl<E, R> From<SdkError<E, R>> for AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => AwsError::Transient {
                message: DisplayErrorContext(&err).to_string(),
            },
            _ => {
                let detail = DisplayErrorContext(&err).to_string();
                classify_aws_error(err.code(), Some(err.message().unwrap_or(&detail)))
            }
        }
    }
}

/// Tri-state result of one control-plane call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    /// The target does not exist (benign for deletes)
    NotFound,
    Failure(AwsError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl<T> From<AwsResult<T>> for Outcome<T> {
    fn from(result: AwsResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) if e.is_not_found() => Outcome::NotFound,
            Err(e) => Outcome::Failure(e),
        }
    }
}

/// `NotFound` becomes `Ok(None)`; every other error passes through.
pub fn ignore_not_found<T>(result: AwsResult<T>) -> AwsResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run an idempotent call, retrying throttling and other transient failures
/// with exponential backoff.
pub async fn with_retry<T, F, Fut>(operation: &str, max_times: usize, call: F) -> AwsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AwsResult<T>>,
{
    call.retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(max_times),
    )
    .when(AwsError::is_retryable)
    .notify(|e, dur| {
        warn!(
            operation = %operation,
            delay = ?dur,
            error = %e,
            "Transient failure, retrying..."
        );
    })
    .await
}
