//! CloudFormation stack operations

use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{Capability, Parameter, Tag};
use tracing::{debug, info};

use super::context::{AwsContext, FromAwsContext};
use super::error::{AwsError, AwsResult};
use super::SdkText;

/// Message CloudFormation returns when an update would change nothing
const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// Status a stack reports once it no longer exists
pub const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// Current status of one stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
    pub name: String,
    /// Raw status, e.g. `UPDATE_ROLLBACK_COMPLETE`
    pub status: String,
    pub reason: Option<String>,
}

/// One resource owned by a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResourceSummary {
    pub logical_id: String,
    /// Physical name or ARN; absent until the resource has been created
    pub physical_id: Option<String>,
    /// Resource type, e.g. `AWS::S3::Bucket`
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Everything needed to create or update a stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackRequest {
    pub name: String,
    pub template_body: String,
    pub parameters: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

/// Stack control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackOperations: Send + Sync {
    /// Describe a stack; a missing stack is `AwsError::NotFound`
    async fn describe_stack(&self, name: &str) -> AwsResult<StackSummary>;

    async fn create_stack(&self, request: &StackRequest) -> AwsResult<()>;

    /// Update a stack; returns `false` when the template and parameters are unchanged
    async fn update_stack(&self, request: &StackRequest) -> AwsResult<bool>;

    /// Request deletion, retaining the given logical ids
    async fn delete_stack(&self, name: &str, retain: &[String]) -> AwsResult<()>;

    async fn list_stack_resources(&self, name: &str) -> AwsResult<Vec<StackResourceSummary>>;

    /// Every stack that has not finished deleting
    async fn list_stacks(&self) -> AwsResult<Vec<StackSummary>>;
}

/// CloudFormation client
pub struct CloudFormationClient {
    client: Client,
}

impl FromAwsContext for CloudFormationClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.cloudformation_client(),
        }
    }
}

impl CloudFormationClient {
    fn parameters(request: &StackRequest) -> Vec<Parameter> {
        request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect()
    }

    fn tags(request: &StackRequest) -> Vec<Tag> {
        request
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect()
    }
}

#[async_trait]
impl StackOperations for CloudFormationClient {
    async fn describe_stack(&self, name: &str) -> AwsResult<StackSummary> {
        let output = self.client.describe_stacks().stack_name(name).send().await?;

        let stack = output.stacks().first().ok_or_else(|| AwsError::NotFound {
            message: format!("stack {name} not returned by DescribeStacks"),
        })?;

        Ok(StackSummary {
            name: stack.stack_name().text(),
            status: stack.stack_status().text(),
            reason: stack.stack_status_reason().map(str::to_string),
        })
    }

    async fn create_stack(&self, request: &StackRequest) -> AwsResult<()> {
        info!(stack = %request.name, "Creating stack");

        self.client
            .create_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityAutoExpand)
            .send()
            .await?;

        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> AwsResult<bool> {
        info!(stack = %request.name, "Updating stack");

        let result = self
            .client
            .update_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityAutoExpand)
            .send()
            .await
            .map_err(AwsError::from);

        match result {
            Ok(_) => Ok(true),
            Err(AwsError::Sdk { message, .. }) if message.contains(NO_UPDATES_MESSAGE) => {
                debug!(stack = %request.name, "Stack already up to date");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_stack(&self, name: &str, retain: &[String]) -> AwsResult<()> {
        info!(stack = %name, retain = ?retain, "Deleting stack");

        let retain = (!retain.is_empty()).then(|| retain.to_vec());
        self.client
            .delete_stack()
            .stack_name(name)
            .set_retain_resources(retain)
            .send()
            .await?;

        Ok(())
    }

    async fn list_stack_resources(&self, name: &str) -> AwsResult<Vec<StackResourceSummary>> {
        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_stack_resources()
                .stack_name(name)
                .set_next_token(next_token.take())
                .send()
                .await?;

            for summary in output.stack_resource_summaries() {
                resources.push(StackResourceSummary {
                    logical_id: summary.logical_resource_id().text(),
                    physical_id: summary.physical_resource_id().map(str::to_string),
                    resource_type: summary.resource_type().text(),
                    status: summary.resource_status().text(),
                    reason: summary.resource_status_reason().map(str::to_string),
                });
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(stack = %name, count = resources.len(), "Listed stack resources");
        Ok(resources)
    }

    async fn list_stacks(&self) -> AwsResult<Vec<StackSummary>> {
        let mut stacks = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_stacks()
                .set_next_token(next_token.take())
                .send()
                .await?;

            for summary in output.stack_summaries() {
                let status = summary.stack_status().text();
                if status == DELETE_COMPLETE {
                    continue;
                }
                stacks.push(StackSummary {
                    name: summary.stack_name().text(),
                    status,
                    reason: summary.stack_status_reason().map(str::to_string),
                });
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(stacks)
    }
}
