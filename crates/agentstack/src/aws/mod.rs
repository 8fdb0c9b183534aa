//! AWS client modules
//!
//! One operations trait per control-plane service, each with a production
//! implementation over the AWS SDK:
//! - CloudFormation: stack lifecycle
//! - S3: versioned buckets
//! - S3 Vectors: vector buckets and indexes
//! - ECR: image repositories
//! - IAM: roles and managed policies
//! - Lambda: functions
//! - SQS: queues
//! - KMS: keys and aliases
//! - STS: account lookup
//!
//! On top of the clients sit the resource scanner, the per-resource cleanup
//! and the bucket purger.

pub mod account;
pub mod cleanup;
pub mod cloud;
pub mod cloudformation;
pub mod context;
pub mod ecr;
pub mod error;
pub mod iam;
pub mod kms;
pub mod lambda;
pub mod purge;
pub mod s3;
pub mod s3vectors;
pub mod scanner;
pub mod sqs;

pub use account::{AccountError, get_current_account_id, verify_account};
pub use cloud::Cloud;
pub use context::{AwsContext, FromAwsContext};

// Error handling
pub use error::{AwsError, AwsResult, Outcome, classify_aws_error, ignore_not_found, with_retry};

// Cleanup
pub use cleanup::{CleanupOutcome, CleanupResult, FailureKind, ResourceMutator};
pub use purge::{BucketPurger, PurgeReport};
pub use scanner::{DiscoverySource, Inventory, ResourceDescriptor, ResourceScanner};

/// Read an SDK string or enum accessor as an owned string.
///
/// Generated accessors return `&str` for required members and
/// `Option<&str>` for optional ones; both read the same here.
pub(crate) trait SdkText {
    fn text(self) -> String;
}

impl<T: AsRef<str> + ?Sized> SdkText for &T {
    fn text(self) -> String {
        self.as_ref().to_string()
    }
}

impl<T: AsRef<str> + ?Sized> SdkText for Option<&T> {
    fn text(self) -> String {
        self.map(|v| v.as_ref().to_string()).unwrap_or_default()
    }
}

/// Boolean counterpart of [`SdkText`]; missing flags read as `false`.
pub(crate) trait SdkFlag {
    fn flag(self) -> bool;
}

impl SdkFlag for bool {
    fn flag(self) -> bool {
        self
    }
}

impl SdkFlag for Option<bool> {
    fn flag(self) -> bool {
        self.unwrap_or(false)
    }
}
