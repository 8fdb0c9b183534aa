//! S3 bucket and object-version operations

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, info};

use super::context::{AwsContext, FromAwsContext};
use super::error::{AwsError, AwsResult};
use super::SdkText;

/// One object version or delete marker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectVersionRef {
    pub key: String,
    /// `None` for objects written before versioning was enabled
    pub version_id: Option<String>,
}

/// Where the next `ListObjectVersions` page starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCursor {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of a bucket's version listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPage {
    pub versions: Vec<ObjectVersionRef>,
    pub delete_markers: Vec<ObjectVersionRef>,
    /// Set while more pages remain
    pub next: Option<VersionCursor>,
}

/// Per-key result of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteResult {
    pub deleted: usize,
    /// `key: message` for every entry the service refused
    pub errors: Vec<String>,
}

/// Object-store control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreOperations: Send + Sync {
    /// Succeeds when the bucket exists and is reachable; missing is `NotFound`
    async fn head_bucket(&self, bucket: &str) -> AwsResult<()>;

    async fn list_buckets(&self) -> AwsResult<Vec<String>>;

    /// One page of object versions and delete markers
    async fn list_object_versions(
        &self,
        bucket: &str,
        cursor: Option<VersionCursor>,
    ) -> AwsResult<VersionPage>;

    /// Delete up to 1000 versions in a single request
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersionRef],
    ) -> AwsResult<BatchDeleteResult>;

    async fn delete_bucket(&self, bucket: &str) -> AwsResult<()>;
}

/// S3 client
pub struct S3Client {
    client: Client,
}

impl FromAwsContext for S3Client {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
        }
    }
}

#[async_trait]
impl ObjectStoreOperations for S3Client {
    async fn head_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.client.head_bucket().bucket(bucket).send().await?;
        Ok(())
    }

    async fn list_buckets(&self) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_buckets()
                .set_continuation_token(continuation_token.take())
                .send()
                .await?;

            names.extend(output.buckets().iter().map(|b| b.name().text()));

            match output.continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        cursor: Option<VersionCursor>,
    ) -> AwsResult<VersionPage> {
        let cursor = cursor.unwrap_or_default();
        let output = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(cursor.key_marker)
            .set_version_id_marker(cursor.version_id_marker)
            .send()
            .await?;

        let versions = output
            .versions()
            .iter()
            .map(|v| ObjectVersionRef {
                key: v.key().text(),
                version_id: v.version_id().map(str::to_string),
            })
            .collect();
        let delete_markers = output
            .delete_markers()
            .iter()
            .map(|m| ObjectVersionRef {
                key: m.key().text(),
                version_id: m.version_id().map(str::to_string),
            })
            .collect();

        let next = (output.is_truncated() == Some(true)).then(|| VersionCursor {
            key_marker: output.next_key_marker().map(str::to_string),
            version_id_marker: output.next_version_id_marker().map(str::to_string),
        });

        Ok(VersionPage {
            versions,
            delete_markers,
            next,
        })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersionRef],
    ) -> AwsResult<BatchDeleteResult> {
        debug!(bucket = %bucket, count = objects.len(), "Deleting object batch");

        let identifiers = objects
            .iter()
            .map(|o| {
                ObjectIdentifier::builder()
                    .key(&o.key)
                    .set_version_id(o.version_id.clone())
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(AwsError::invalid_request)?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(AwsError::invalid_request)?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await?;

        let errors: Vec<String> = output
            .errors()
            .iter()
            .map(|e| format!("{}: {}", e.key().text(), e.message().text()))
            .collect();

        Ok(BatchDeleteResult {
            deleted: objects.len().saturating_sub(errors.len()),
            errors,
        })
    }

    async fn delete_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.client.delete_bucket().bucket(bucket).send().await?;
        info!(bucket = %bucket, "Bucket deleted");
        Ok(())
    }
}
