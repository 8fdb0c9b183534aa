//! Default configuration values shared across agentstack components
//!
//! These constants keep the CLI defaults, the orchestrators and the tests in
//! agreement.

/// Default application prefix used to derive every resource name
pub const DEFAULT_APP_PREFIX: &str = "agentstack";

/// Default interval between stack status checks, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default number of stack status checks before giving up (one hour at 15s)
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 240;

/// Default number of retained-resource recovery cycles on stack deletion
pub const DEFAULT_MAX_RECOVERY_CYCLES: u32 = 3;

/// Default KMS key pending-deletion window (the minimum AWS accepts)
pub const DEFAULT_KMS_PENDING_WINDOW_DAYS: i32 = 7;

/// Default embedding model passed to the stack
pub const DEFAULT_MODEL_ID: &str = "amazon.titan-embed-text-v2:0";

/// Default image build contexts, as `name=directory` pairs
pub const DEFAULT_IMAGE_CONTEXTS: &str =
    "create-index=lambda/create_index,clean-index=lambda/clean_index,agent-runtime=agent";

/// Maximum keys per S3 `DeleteObjects` request
pub const S3_DELETE_BATCH_SIZE: usize = 1000;

/// Maximum image ids per ECR `BatchDeleteImage` request
pub const ECR_DELETE_BATCH_SIZE: usize = 100;

/// Maximum list-then-delete passes the bucket purger makes per bucket
pub const MAX_PURGE_PASSES: u32 = 5;

/// Maximum attempts for a single transient-failure retry loop
pub const DEFAULT_TRANSIENT_RETRIES: usize = 3;
