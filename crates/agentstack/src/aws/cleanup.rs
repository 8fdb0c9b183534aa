//! Idempotent per-resource deletion
//!
//! [`ResourceMutator::ensure_deleted`] is the single entry point: it
//! succeeds when the resource is already gone, unbinds whatever blocks the
//! delete (attached policies, stored images, indexes) and never aborts the
//! caller. Failures come back as a [`CleanupResult`] for the run report.

use std::fmt;

use agentstack_common::ResourceKind;
use agentstack_common::defaults::{DEFAULT_TRANSIENT_RETRIES, ECR_DELETE_BATCH_SIZE};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cloud::Cloud;
use super::error::{AwsError, AwsResult, with_retry};
use super::kms::{AWS_MANAGED, PENDING_DELETION};
use super::purge::BucketPurger;
use super::scanner::ResourceDescriptor;
use super::sqs::queue_name_from_url;

/// Whether a failed cleanup is worth re-running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Throttling, timeouts or dependents that clear with time
    Retryable,
    /// Access denied, invalid request and other errors a re-run will not fix
    Fatal,
}

/// Result of a single resource cleanup operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupResult {
    /// Resource was successfully deleted
    Deleted,
    /// Resource was already deleted (not found)
    AlreadyDeleted,
    /// Deletion accepted but completes later (encryption keys)
    DeletionScheduled,
    /// Cleanup failed with error
    Failed(FailureKind),
    /// Resource was skipped (not applicable)
    Skipped,
}

impl CleanupResult {
    /// Classify an error that ended a cleanup
    pub fn failed(error: &AwsError) -> Self {
        if error.is_retryable() {
            CleanupResult::Failed(FailureKind::Retryable)
        } else {
            CleanupResult::Failed(FailureKind::Fatal)
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, CleanupResult::Failed(_))
    }

    /// The resource is gone or on its way out
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            CleanupResult::Deleted
                | CleanupResult::AlreadyDeleted
                | CleanupResult::DeletionScheduled
        )
    }
}

impl fmt::Display for CleanupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CleanupResult::Deleted => "deleted",
            CleanupResult::AlreadyDeleted => "already deleted",
            CleanupResult::DeletionScheduled => "deletion scheduled",
            CleanupResult::Failed(FailureKind::Retryable) => "failed (retryable)",
            CleanupResult::Failed(FailureKind::Fatal) => "failed",
            CleanupResult::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

/// A cleanup result plus whatever explains it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub result: CleanupResult,
    pub detail: Option<String>,
}

impl CleanupOutcome {
    pub fn new(result: CleanupResult) -> Self {
        Self {
            result,
            detail: None,
        }
    }

    pub fn with_detail(result: CleanupResult, detail: impl Into<String>) -> Self {
        Self {
            result,
            detail: Some(detail.into()),
        }
    }

    fn from_error(error: &AwsError, step: &str) -> Self {
        Self::with_detail(CleanupResult::failed(error), format!("{step}: {error}"))
    }

    /// Read the final delete call of a resource
    fn settle(result: AwsResult<()>, step: &str) -> Self {
        match result {
            Ok(()) => Self::new(CleanupResult::Deleted),
            Err(e) if e.is_not_found() => Self::new(CleanupResult::AlreadyDeleted),
            Err(e) => Self::from_error(&e, step),
        }
    }

    /// Note preparatory steps that failed without blocking the delete
    fn noting(mut self, skipped_steps: &[String]) -> Self {
        if skipped_steps.is_empty() {
            return self;
        }
        let skipped = skipped_steps.join("; ");
        self.detail = Some(match self.detail.take() {
            Some(detail) => format!("{detail}; {skipped}"),
            None => skipped,
        });
        self
    }
}

/// Split a vector index or bucket ARN into its bucket and index names.
///
/// `arn:aws:s3vectors:<region>:<account>:bucket/<bucket>[/index/<index>]`
pub fn parse_vector_arn(id: &str) -> Option<(String, Option<String>)> {
    let resource = id.strip_prefix("arn:")?.splitn(6, ':').nth(4)?;
    let rest = resource.strip_prefix("bucket/")?;
    match rest.split_once("/index/") {
        Some((bucket, index)) => Some((bucket.to_string(), Some(index.to_string()))),
        None => Some((rest.to_string(), None)),
    }
}

/// Performs idempotent deletes, one entry point per resource kind.
#[derive(Clone)]
pub struct ResourceMutator {
    cloud: Cloud,
    purger: BucketPurger,
    key_pending_window_days: i32,
    retries: usize,
}

impl ResourceMutator {
    pub fn new(cloud: Cloud, key_pending_window_days: i32) -> Self {
        Self {
            purger: BucketPurger::new(cloud.objects.clone()),
            cloud,
            key_pending_window_days,
            retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }

    pub fn purger(&self) -> &BucketPurger {
        &self.purger
    }

    /// Delete the described resource if it still exists.
    pub async fn ensure_deleted(&self, descriptor: &ResourceDescriptor) -> CleanupOutcome {
        let name = descriptor.name.as_str();
        let outcome = match descriptor.kind {
            ResourceKind::Bucket => {
                let report = self.purger.purge(name).await;
                CleanupOutcome {
                    result: report.result,
                    detail: report.detail,
                }
            }
            ResourceKind::VectorIndex => {
                self.delete_vector_index(descriptor.parent.as_deref(), name)
                    .await
            }
            ResourceKind::VectorBucket => self.delete_vector_bucket(name).await,
            ResourceKind::Key => self.delete_key(name).await,
            ResourceKind::Function => self.delete_function(name).await,
            ResourceKind::Role => self.delete_role(name).await,
            ResourceKind::Policy => self.delete_policy(name).await,
            ResourceKind::Queue => self.delete_queue(name).await,
            ResourceKind::RegistryRepo => self.delete_repository(name).await,
            ResourceKind::Stack => CleanupOutcome::with_detail(
                CleanupResult::Skipped,
                "stacks are removed through the stack lifecycle",
            ),
        };

        match outcome.result {
            CleanupResult::Deleted | CleanupResult::DeletionScheduled => {
                info!(resource_type = %descriptor.kind, resource_id = %name, result = %outcome.result, "Cleaned up");
            }
            CleanupResult::AlreadyDeleted | CleanupResult::Skipped => {
                debug!(resource_type = %descriptor.kind, resource_id = %name, result = %outcome.result, "Nothing to delete");
            }
            CleanupResult::Failed(kind) => {
                warn!(
                    resource_type = %descriptor.kind,
                    resource_id = %name,
                    failure = ?kind,
                    detail = outcome.detail.as_deref().unwrap_or_default(),
                    "Cleanup failed"
                );
            }
        }

        outcome
    }

    async fn delete_vector_index(&self, parent: Option<&str>, name: &str) -> CleanupOutcome {
        let (bucket, index) = match (parent, parse_vector_arn(name)) {
            (_, Some((bucket, Some(index)))) => (bucket, index),
            (Some(bucket), _) => (bucket.to_string(), name.to_string()),
            _ => {
                return CleanupOutcome::with_detail(
                    CleanupResult::Failed(FailureKind::Fatal),
                    "vector index has no known bucket",
                );
            }
        };

        let result = with_retry("delete_index", self.retries, || {
            self.cloud.vectors.delete_index(&bucket, &index)
        })
        .await;
        CleanupOutcome::settle(result, "delete index")
    }

    async fn delete_vector_bucket(&self, name: &str) -> CleanupOutcome {
        let bucket = match parse_vector_arn(name) {
            Some((bucket, _)) => bucket,
            None => name.to_string(),
        };

        let indexes = match with_retry("list_indexes", self.retries, || {
            self.cloud.vectors.list_indexes(&bucket)
        })
        .await
        {
            Ok(indexes) => indexes,
            Err(e) if e.is_not_found() => return CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => {
                warn!(vector_bucket = %bucket, error = %e, "Failed to list indexes, trying bucket delete anyway");
                Vec::new()
            }
        };

        // Index before bucket
        let mut skipped = Vec::new();
        for index in &indexes {
            let outcome = self.delete_vector_index(Some(&bucket), index).await;
            if outcome.result.is_failure() {
                skipped.push(format!("index {index} not deleted"));
            }
        }

        let result = with_retry("delete_vector_bucket", self.retries, || {
            self.cloud.vectors.delete_vector_bucket(&bucket)
        })
        .await;
        CleanupOutcome::settle(result, "delete vector bucket").noting(&skipped)
    }

    async fn delete_key(&self, key_id: &str) -> CleanupOutcome {
        let keys = &self.cloud.keys;
        let described = with_retry("describe_key", self.retries, || keys.describe_key(key_id)).await;
        let key = match described {
            Ok(key) => key,
            Err(e) if e.is_not_found() => return CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => return CleanupOutcome::from_error(&e, "describe key"),
        };

        if key.manager == AWS_MANAGED {
            return CleanupOutcome::with_detail(CleanupResult::Skipped, "AWS-managed key");
        }
        if key.state == PENDING_DELETION {
            return CleanupOutcome::with_detail(
                CleanupResult::AlreadyDeleted,
                "already pending deletion",
            );
        }

        // Aliases outlive a scheduled key and would block a redeploy
        let mut skipped = Vec::new();
        match keys.list_aliases().await {
            Ok(aliases) => {
                for alias in aliases
                    .iter()
                    .filter(|a| a.target_key_id.as_deref() == Some(key.key_id.as_str()))
                {
                    if let Err(e) = keys.delete_alias(&alias.name).await {
                        warn!(alias = %alias.name, error = %e, "Failed to delete key alias");
                        skipped.push(format!("alias {} not deleted", alias.name));
                    }
                }
            }
            Err(e) => warn!(key_id = %key.key_id, error = %e, "Failed to list key aliases"),
        }

        let window = self.key_pending_window_days;
        match with_retry("schedule_key_deletion", self.retries, || {
            keys.schedule_key_deletion(&key.key_id, window)
        })
        .await
        {
            Ok(()) => CleanupOutcome::with_detail(
                CleanupResult::DeletionScheduled,
                format!("pending window {window} days"),
            )
            .noting(&skipped),
            Err(e) if e.is_not_found() => CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => CleanupOutcome::from_error(&e, "schedule key deletion"),
        }
    }

    async fn delete_function(&self, name: &str) -> CleanupOutcome {
        let result = with_retry("delete_function", self.retries, || {
            self.cloud.functions.delete_function(name)
        })
        .await;
        CleanupOutcome::settle(result, "delete function")
    }

    /// Detach managed policies, drop inline policies and leave instance
    /// profiles, then delete the role. A failed detach is logged and the
    /// delete is attempted regardless.
    async fn delete_role(&self, role: &str) -> CleanupOutcome {
        let iam = &self.cloud.identity;
        let mut skipped = Vec::new();

        match iam.list_attached_role_policies(role).await {
            Ok(arns) => {
                for arn in arns {
                    if let Err(e) = iam.detach_role_policy(role, &arn).await {
                        warn!(role = %role, policy_arn = %arn, error = %e, "Failed to detach policy");
                        skipped.push(format!("detach {arn}: {e}"));
                    }
                }
            }
            Err(e) if e.is_not_found() => return CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => {
                warn!(role = %role, error = %e, "Failed to list attached policies");
                skipped.push(format!("list attached policies: {e}"));
            }
        }

        match iam.list_role_policies(role).await {
            Ok(names) => {
                for policy in names {
                    if let Err(e) = iam.delete_role_policy(role, &policy).await {
                        warn!(role = %role, policy = %policy, error = %e, "Failed to delete inline policy");
                        skipped.push(format!("delete inline {policy}: {e}"));
                    }
                }
            }
            Err(e) => {
                warn!(role = %role, error = %e, "Failed to list inline policies");
                skipped.push(format!("list inline policies: {e}"));
            }
        }

        match iam.list_instance_profiles_for_role(role).await {
            Ok(profiles) => {
                for profile in profiles {
                    if let Err(e) = iam.remove_role_from_instance_profile(&profile, role).await {
                        debug!(role = %role, profile = %profile, error = %e, "Failed to remove role from instance profile");
                        skipped.push(format!("leave profile {profile}: {e}"));
                    }
                }
            }
            Err(e) => debug!(role = %role, error = %e, "Failed to list instance profiles"),
        }

        let result = with_retry("delete_role", self.retries, || iam.delete_role(role)).await;
        CleanupOutcome::settle(result, "delete role").noting(&skipped)
    }

    /// Detach a managed policy from every principal, drop its non-default
    /// versions, then delete it.
    async fn delete_policy(&self, arn: &str) -> CleanupOutcome {
        let iam = &self.cloud.identity;
        let mut skipped = Vec::new();

        match iam.list_policy_entities(arn).await {
            Ok(entities) => {
                for entity in entities {
                    if let Err(e) = iam.detach_policy(arn, &entity).await {
                        warn!(policy_arn = %arn, entity = ?entity, error = %e, "Failed to detach policy");
                        skipped.push(format!("detach from {entity:?}: {e}"));
                    }
                }
            }
            Err(e) if e.is_not_found() => return CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => {
                warn!(policy_arn = %arn, error = %e, "Failed to list policy attachments");
                skipped.push(format!("list attachments: {e}"));
            }
        }

        match iam.list_policy_versions(arn).await {
            Ok(versions) => {
                for version in versions.iter().filter(|v| !v.is_default) {
                    if let Err(e) = iam.delete_policy_version(arn, &version.id).await {
                        warn!(policy_arn = %arn, version = %version.id, error = %e, "Failed to delete policy version");
                        skipped.push(format!("delete version {}: {e}", version.id));
                    }
                }
            }
            Err(e) => debug!(policy_arn = %arn, error = %e, "Failed to list policy versions"),
        }

        let result = with_retry("delete_policy", self.retries, || iam.delete_policy(arn)).await;
        CleanupOutcome::settle(result, "delete policy").noting(&skipped)
    }

    async fn delete_queue(&self, name_or_url: &str) -> CleanupOutcome {
        let url = if name_or_url.starts_with("https://") {
            name_or_url.to_string()
        } else {
            match self.cloud.queues.get_queue_url(name_or_url).await {
                Ok(url) => url,
                Err(e) if e.is_not_found() => {
                    return CleanupOutcome::new(CleanupResult::AlreadyDeleted);
                }
                Err(e) => return CleanupOutcome::from_error(&e, "resolve queue url"),
            }
        };

        debug!(queue = %queue_name_from_url(&url), "Deleting queue");
        let result = with_retry("delete_queue", self.retries, || {
            self.cloud.queues.delete_queue(&url)
        })
        .await;
        CleanupOutcome::settle(result, "delete queue")
    }

    /// Delete every image, then the repository.
    async fn delete_repository(&self, name: &str) -> CleanupOutcome {
        let registry = &self.cloud.registry;

        let images = match registry.list_images(name).await {
            Ok(images) => images,
            Err(e) if e.is_not_found() => return CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Err(e) => return CleanupOutcome::from_error(&e, "list images"),
        };

        let mut skipped = Vec::new();
        for batch in images.chunks(ECR_DELETE_BATCH_SIZE) {
            match with_retry("batch_delete_images", self.retries, || {
                registry.batch_delete_images(name, batch)
            })
            .await
            {
                Ok(0) => {}
                Ok(failures) => {
                    warn!(repository = %name, failures, "Some images were not deleted");
                    skipped.push(format!("{failures} images not deleted"));
                }
                Err(e) => {
                    warn!(repository = %name, error = %e, "Image batch delete failed");
                    skipped.push(format!("image batch: {e}"));
                }
            }
        }

        let result = with_retry("delete_repository", self.retries, || {
            registry.delete_repository(name)
        })
        .await;
        CleanupOutcome::settle(result, "delete repository").noting(&skipped)
    }
}
