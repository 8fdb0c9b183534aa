//! SQS queue operations

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::info;

use super::context::{AwsContext, FromAwsContext};
use super::error::AwsResult;

/// Queue control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueOperations: Send + Sync {
    /// Resolve a queue name to its URL; a missing queue is `NotFound`
    async fn get_queue_url(&self, name: &str) -> AwsResult<String>;

    /// URLs of queues whose name starts with `prefix`
    async fn list_queues(&self, prefix: &str) -> AwsResult<Vec<String>>;

    async fn delete_queue(&self, url: &str) -> AwsResult<()>;
}

/// The queue name at the end of a queue URL
pub fn queue_name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// SQS client
pub struct SqsClient {
    client: Client,
}

impl FromAwsContext for SqsClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.sqs_client(),
        }
    }
}

#[async_trait]
impl QueueOperations for SqsClient {
    async fn get_queue_url(&self, name: &str) -> AwsResult<String> {
        let output = self.client.get_queue_url().queue_name(name).send().await?;
        Ok(output.queue_url().unwrap_or_default().to_string())
    }

    async fn list_queues(&self, prefix: &str) -> AwsResult<Vec<String>> {
        let mut urls = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_queues()
                .queue_name_prefix(prefix)
                .set_next_token(next_token.take())
                .send()
                .await?;

            urls.extend(output.queue_urls().iter().cloned());

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(urls)
    }

    async fn delete_queue(&self, url: &str) -> AwsResult<()> {
        self.client.delete_queue().queue_url(url).send().await?;
        info!(queue = %queue_name_from_url(url), "Queue deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_from_url() {
        assert_eq!(
            queue_name_from_url(
                "https://sqs.us-east-1.amazonaws.com/123456789012/agentstack-dlq-123456789012-v1"
            ),
            "agentstack-dlq-123456789012-v1"
        );
        assert_eq!(queue_name_from_url("plain-name"), "plain-name");
    }
}
