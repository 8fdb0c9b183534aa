//! Lambda function operations

use async_trait::async_trait;
use aws_sdk_lambda::Client;
use tracing::info;

use super::context::{AwsContext, FromAwsContext};
use super::error::AwsResult;
use super::SdkText;

/// Compute function control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionOperations: Send + Sync {
    async fn list_functions(&self) -> AwsResult<Vec<String>>;

    async fn delete_function(&self, name: &str) -> AwsResult<()>;
}

/// Lambda client
pub struct LambdaClient {
    client: Client,
}

impl FromAwsContext for LambdaClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.lambda_client(),
        }
    }
}

#[async_trait]
impl FunctionOperations for LambdaClient {
    async fn list_functions(&self) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_functions()
                .set_marker(marker.take())
                .send()
                .await?;

            names.extend(output.functions().iter().map(|f| f.function_name().text()));

            match output.next_marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn delete_function(&self, name: &str) -> AwsResult<()> {
        self.client
            .delete_function()
            .function_name(name)
            .send()
            .await?;
        info!(function = %name, "Function deleted");
        Ok(())
    }
}
