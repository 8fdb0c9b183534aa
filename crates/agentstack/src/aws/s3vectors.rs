//! S3 Vectors bucket and index operations

use async_trait::async_trait;
use aws_sdk_s3vectors::Client;
use tracing::info;

use super::context::{AwsContext, FromAwsContext};
use super::error::AwsResult;
use super::SdkText;

/// Vector bucket and index control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorOperations: Send + Sync {
    async fn list_vector_buckets(&self) -> AwsResult<Vec<String>>;

    /// Index names inside a vector bucket; a missing bucket is `NotFound`
    async fn list_indexes(&self, bucket: &str) -> AwsResult<Vec<String>>;

    async fn delete_index(&self, bucket: &str, index: &str) -> AwsResult<()>;

    async fn delete_vector_bucket(&self, bucket: &str) -> AwsResult<()>;
}

/// S3 Vectors client
pub struct S3VectorsClient {
    client: Client,
}

impl FromAwsContext for S3VectorsClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3vectors_client(),
        }
    }
}

#[async_trait]
impl VectorOperations for S3VectorsClient {
    async fn list_vector_buckets(&self) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_vector_buckets()
                .set_next_token(next_token.take())
                .send()
                .await?;

            names.extend(
                output
                    .vector_buckets()
                    .iter()
                    .map(|b| b.vector_bucket_name().text()),
            );

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_indexes(&self, bucket: &str) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_indexes()
                .vector_bucket_name(bucket)
                .set_next_token(next_token.take())
                .send()
                .await?;

            names.extend(output.indexes().iter().map(|i| i.index_name().text()));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn delete_index(&self, bucket: &str, index: &str) -> AwsResult<()> {
        self.client
            .delete_index()
            .vector_bucket_name(bucket)
            .index_name(index)
            .send()
            .await?;
        info!(vector_bucket = %bucket, index = %index, "Vector index deleted");
        Ok(())
    }

    async fn delete_vector_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.client
            .delete_vector_bucket()
            .vector_bucket_name(bucket)
            .send()
            .await?;
        info!(vector_bucket = %bucket, "Vector bucket deleted");
        Ok(())
    }
}
