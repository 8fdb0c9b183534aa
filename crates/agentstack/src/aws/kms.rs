//! KMS key and alias operations

use async_trait::async_trait;
use aws_sdk_kms::Client;
use tracing::info;

use super::context::{AwsContext, FromAwsContext};
use super::error::{AwsError, AwsResult};
use super::SdkText;

/// Key state once deletion has been scheduled
pub const PENDING_DELETION: &str = "PendingDeletion";

/// Key manager value for keys AWS owns on the account's behalf
pub const AWS_MANAGED: &str = "AWS";

/// Key metadata relevant to teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key_id: String,
    /// e.g. `Enabled`, `PendingDeletion`
    pub state: String,
    /// `CUSTOMER` or `AWS`
    pub manager: String,
}

/// An alias and the key it points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRef {
    pub name: String,
    pub target_key_id: Option<String>,
}

/// Key-management control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyOperations: Send + Sync {
    /// Describe a key by id, ARN or alias; a missing key is `NotFound`
    async fn describe_key(&self, key_id: &str) -> AwsResult<KeyInfo>;

    async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32)
    -> AwsResult<()>;

    async fn list_aliases(&self) -> AwsResult<Vec<AliasRef>>;

    async fn delete_alias(&self, alias: &str) -> AwsResult<()>;
}

/// KMS client
pub struct KmsClient {
    client: Client,
}

impl FromAwsContext for KmsClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.kms_client(),
        }
    }
}

#[async_trait]
impl KeyOperations for KmsClient {
    async fn describe_key(&self, key_id: &str) -> AwsResult<KeyInfo> {
        let output = self.client.describe_key().key_id(key_id).send().await?;
        let metadata = output.key_metadata().ok_or_else(|| AwsError::NotFound {
            message: format!("key {key_id} has no metadata"),
        })?;

        Ok(KeyInfo {
            key_id: metadata.key_id().text(),
            state: metadata.key_state().text(),
            manager: metadata.key_manager().text(),
        })
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        pending_window_days: i32,
    ) -> AwsResult<()> {
        self.client
            .schedule_key_deletion()
            .key_id(key_id)
            .pending_window_in_days(pending_window_days)
            .send()
            .await?;
        info!(key_id = %key_id, pending_window_days, "Key deletion scheduled");
        Ok(())
    }

    async fn list_aliases(&self) -> AwsResult<Vec<AliasRef>> {
        let mut aliases = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_aliases()
                .set_marker(marker.take())
                .send()
                .await?;

            aliases.extend(output.aliases().iter().map(|a| AliasRef {
                name: a.alias_name().text(),
                target_key_id: a.target_key_id().map(str::to_string),
            }));

            match output.next_marker() {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(aliases)
    }

    async fn delete_alias(&self, alias: &str) -> AwsResult<()> {
        self.client.delete_alias().alias_name(alias).send().await?;
        info!(alias = %alias, "Key alias deleted");
        Ok(())
    }
}
