//! Versioned bucket purging
//!
//! A versioned bucket can only be deleted once every object version and
//! every delete marker is gone. A plain `DeleteObject` only adds another
//! marker, so the purger lists versions explicitly, deletes them in bulk
//! and re-lists until the listing comes back empty.

use std::sync::Arc;

use agentstack_common::defaults::{
    DEFAULT_TRANSIENT_RETRIES, MAX_PURGE_PASSES, S3_DELETE_BATCH_SIZE,
};
use tracing::{debug, info, warn};

use super::cleanup::{CleanupResult, FailureKind};
use super::error::{AwsError, AwsResult, with_retry};
use super::s3::{ObjectStoreOperations, ObjectVersionRef, VersionCursor};

/// Point-in-time listing of everything stored in a bucket.
///
/// Stale as soon as it is taken; only used to drive one deletion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub versions: Vec<ObjectVersionRef>,
    pub delete_markers: Vec<ObjectVersionRef>,
}

impl BucketSnapshot {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.delete_markers.is_empty()
    }
}

/// What one `purge` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub bucket: String,
    pub versions_deleted: usize,
    pub markers_deleted: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Listing passes made, including the final empty one
    pub passes: u32,
    pub result: CleanupResult,
    pub detail: Option<String>,
}

impl PurgeReport {
    fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            versions_deleted: 0,
            markers_deleted: 0,
            batches: 0,
            failed_batches: 0,
            passes: 0,
            result: CleanupResult::Skipped,
            detail: None,
        }
    }

    fn fail(mut self, error: &AwsError, context: &str) -> Self {
        self.result = CleanupResult::failed(error);
        self.detail = Some(format!("{context}: {error}"));
        self
    }
}

/// Empties and deletes versioned buckets.
#[derive(Clone)]
pub struct BucketPurger {
    objects: Arc<dyn ObjectStoreOperations>,
    max_passes: u32,
    retries: usize,
}

impl BucketPurger {
    pub fn new(objects: Arc<dyn ObjectStoreOperations>) -> Self {
        Self {
            objects,
            max_passes: MAX_PURGE_PASSES,
            retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }

    /// Remove every version and delete marker from `bucket`, then the bucket.
    ///
    /// A missing bucket is success. Batch failures are logged and the
    /// remaining batches still run. If the bucket itself cannot be deleted
    /// the report says so and the caller leaves it for the final sweep.
    pub async fn purge(&self, bucket: &str) -> PurgeReport {
        let mut report = PurgeReport::new(bucket);

        match with_retry("head_bucket", self.retries, || self.objects.head_bucket(bucket)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(bucket = %bucket, "Bucket already deleted");
                report.result = CleanupResult::AlreadyDeleted;
                return report;
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Failed to check bucket");
                return report.fail(&e, "head bucket");
            }
        }

        info!(bucket = %bucket, "Purging bucket");

        loop {
            report.passes += 1;
            let snapshot = match self.snapshot(bucket).await {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_not_found() => {
                    debug!(bucket = %bucket, "Bucket disappeared while purging");
                    report.result = CleanupResult::AlreadyDeleted;
                    return report;
                }
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to list object versions");
                    return report.fail(&e, "list object versions");
                }
            };

            if snapshot.is_empty() {
                break;
            }
            if report.passes > self.max_passes {
                warn!(
                    bucket = %bucket,
                    passes = self.max_passes,
                    remaining = snapshot.versions.len() + snapshot.delete_markers.len(),
                    "Bucket still not empty, leaving it for the final sweep"
                );
                report.result = CleanupResult::Failed(FailureKind::Retryable);
                report.detail = Some(format!(
                    "{} versions and {} delete markers remain after {} passes",
                    snapshot.versions.len(),
                    snapshot.delete_markers.len(),
                    self.max_passes
                ));
                return report;
            }

            debug!(
                bucket = %bucket,
                pass = report.passes,
                versions = snapshot.versions.len(),
                delete_markers = snapshot.delete_markers.len(),
                "Deleting bucket contents"
            );
            let versions = self
                .delete_in_batches(bucket, &snapshot.versions, &mut report)
                .await;
            let markers = self
                .delete_in_batches(bucket, &snapshot.delete_markers, &mut report)
                .await;
            report.versions_deleted += versions;
            report.markers_deleted += markers;
        }

        match with_retry("delete_bucket", self.retries, || self.objects.delete_bucket(bucket)).await {
            Ok(()) => {
                info!(
                    bucket = %bucket,
                    versions = report.versions_deleted,
                    delete_markers = report.markers_deleted,
                    "Bucket purged and deleted"
                );
                report.result = CleanupResult::Deleted;
            }
            Err(e) if e.is_not_found() => {
                report.result = CleanupResult::AlreadyDeleted;
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Failed to delete empty bucket, leaving it for the final sweep");
                report = report.fail(&e, "delete bucket");
            }
        }

        report
    }

    /// List every version and delete marker, following pagination to the end.
    pub async fn snapshot(&self, bucket: &str) -> AwsResult<BucketSnapshot> {
        let mut snapshot = BucketSnapshot::default();
        let mut cursor: Option<VersionCursor> = None;

        loop {
            let page = with_retry("list_object_versions", self.retries, || {
                self.objects.list_object_versions(bucket, cursor.clone())
            })
            .await?;

            snapshot.versions.extend(page.versions);
            snapshot.delete_markers.extend(page.delete_markers);

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(snapshot)
    }

    /// Delete `objects` in bulk requests; returns how many were deleted.
    async fn delete_in_batches(
        &self,
        bucket: &str,
        objects: &[ObjectVersionRef],
        report: &mut PurgeReport,
    ) -> usize {
        let mut deleted = 0;

        for batch in objects.chunks(S3_DELETE_BATCH_SIZE) {
            report.batches += 1;
            match with_retry("delete_objects", self.retries, || {
                self.objects.delete_objects(bucket, batch)
            })
            .await
            {
                Ok(result) => {
                    deleted += result.deleted;
                    if !result.errors.is_empty() {
                        report.failed_batches += 1;
                        warn!(
                            bucket = %bucket,
                            failed = result.errors.len(),
                            first_error = %result.errors[0],
                            "Some objects in batch were not deleted"
                        );
                    }
                }
                Err(e) => {
                    report.failed_batches += 1;
                    warn!(bucket = %bucket, size = batch.len(), error = %e, "Batch delete failed");
                }
            }
        }

        deleted
    }
}
