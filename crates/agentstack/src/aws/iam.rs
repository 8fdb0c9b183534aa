//! IAM role and managed-policy operations

use async_trait::async_trait;
use aws_sdk_iam::Client;
use aws_sdk_iam::types::PolicyScopeType;
use tracing::{debug, info};

use super::context::{AwsContext, FromAwsContext};
use super::error::AwsResult;
use super::{SdkFlag, SdkText};

/// A customer-managed policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRef {
    pub name: String,
    pub arn: String,
}

/// A principal a managed policy is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEntity {
    Role(String),
    User(String),
    Group(String),
}

/// One stored version of a managed policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersionRef {
    pub id: String,
    pub is_default: bool,
}

/// Identity control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityOperations: Send + Sync {
    async fn list_roles(&self) -> AwsResult<Vec<String>>;

    /// ARNs of managed policies attached to a role
    async fn list_attached_role_policies(&self, role: &str) -> AwsResult<Vec<String>>;

    /// Names of inline policies embedded in a role
    async fn list_role_policies(&self, role: &str) -> AwsResult<Vec<String>>;

    async fn list_instance_profiles_for_role(&self, role: &str) -> AwsResult<Vec<String>>;

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> AwsResult<()>;

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> AwsResult<()>;

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> AwsResult<()>;

    async fn delete_role(&self, role: &str) -> AwsResult<()>;

    /// Customer-managed policies in the account
    async fn list_local_policies(&self) -> AwsResult<Vec<PolicyRef>>;

    async fn list_policy_entities(&self, policy_arn: &str) -> AwsResult<Vec<PolicyEntity>>;

    async fn detach_policy(&self, policy_arn: &str, entity: &PolicyEntity) -> AwsResult<()>;

    async fn list_policy_versions(&self, policy_arn: &str) -> AwsResult<Vec<PolicyVersionRef>>;

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> AwsResult<()>;

    async fn delete_policy(&self, policy_arn: &str) -> AwsResult<()>;
}

/// IAM client
pub struct IamClient {
    client: Client,
}

impl FromAwsContext for IamClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }
}

#[async_trait]
impl IdentityOperations for IamClient {
    async fn list_roles(&self) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_roles()
                .set_marker(marker.take())
                .send()
                .await?;

            names.extend(output.roles().iter().map(|r| r.role_name().text()));

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_attached_role_policies(&self, role: &str) -> AwsResult<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_attached_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await?;

            arns.extend(
                output
                    .attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_string)),
            );

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(arns)
    }

    async fn list_role_policies(&self, role: &str) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await?;

            names.extend(output.policy_names().iter().cloned());

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_instance_profiles_for_role(&self, role: &str) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_instance_profiles_for_role()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await?;

            names.extend(
                output
                    .instance_profiles()
                    .iter()
                    .map(|p| p.instance_profile_name().text()),
            );

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> AwsResult<()> {
        self.client
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await?;
        debug!(role = %role, policy_arn = %policy_arn, "Detached managed policy");
        Ok(())
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> AwsResult<()> {
        self.client
            .delete_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .send()
            .await?;
        debug!(role = %role, policy = %policy_name, "Deleted inline policy");
        Ok(())
    }

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> AwsResult<()> {
        self.client
            .remove_role_from_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await?;
        debug!(role = %role, profile = %profile, "Removed role from instance profile");
        Ok(())
    }

    async fn delete_role(&self, role: &str) -> AwsResult<()> {
        self.client.delete_role().role_name(role).send().await?;
        info!(role = %role, "IAM role deleted");
        Ok(())
    }

    async fn list_local_policies(&self) -> AwsResult<Vec<PolicyRef>> {
        let mut policies = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_policies()
                .scope(PolicyScopeType::Local)
                .set_marker(marker.take())
                .send()
                .await?;

            policies.extend(output.policies().iter().map(|p| PolicyRef {
                name: p.policy_name().text(),
                arn: p.arn().text(),
            }));

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(policies)
    }

    async fn list_policy_entities(&self, policy_arn: &str) -> AwsResult<Vec<PolicyEntity>> {
        let mut entities = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_entities_for_policy()
                .policy_arn(policy_arn)
                .set_marker(marker.take())
                .send()
                .await?;

            entities.extend(
                output
                    .policy_roles()
                    .iter()
                    .map(|r| PolicyEntity::Role(r.role_name().text())),
            );
            entities.extend(
                output
                    .policy_users()
                    .iter()
                    .map(|u| PolicyEntity::User(u.user_name().text())),
            );
            entities.extend(
                output
                    .policy_groups()
                    .iter()
                    .map(|g| PolicyEntity::Group(g.group_name().text())),
            );

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(entities)
    }

    async fn detach_policy(&self, policy_arn: &str, entity: &PolicyEntity) -> AwsResult<()> {
        match entity {
            PolicyEntity::Role(role) => {
                self.client
                    .detach_role_policy()
                    .role_name(role)
                    .policy_arn(policy_arn)
                    .send()
                    .await?;
            }
            PolicyEntity::User(user) => {
                self.client
                    .detach_user_policy()
                    .user_name(user)
                    .policy_arn(policy_arn)
                    .send()
                    .await?;
            }
            PolicyEntity::Group(group) => {
                self.client
                    .detach_group_policy()
                    .group_name(group)
                    .policy_arn(policy_arn)
                    .send()
                    .await?;
            }
        }
        debug!(policy_arn = %policy_arn, entity = ?entity, "Detached policy");
        Ok(())
    }

    async fn list_policy_versions(&self, policy_arn: &str) -> AwsResult<Vec<PolicyVersionRef>> {
        let mut versions = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_policy_versions()
                .policy_arn(policy_arn)
                .set_marker(marker.take())
                .send()
                .await?;

            versions.extend(output.versions().iter().map(|v| PolicyVersionRef {
                id: v.version_id().text(),
                is_default: v.is_default_version().flag(),
            }));

            match output.marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(versions)
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> AwsResult<()> {
        self.client
            .delete_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_policy(&self, policy_arn: &str) -> AwsResult<()> {
        self.client.delete_policy().policy_arn(policy_arn).send().await?;
        info!(policy_arn = %policy_arn, "Managed policy deleted");
        Ok(())
    }
}
