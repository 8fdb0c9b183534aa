//! AWS account validation

use agentstack_common::AccountId;
use thiserror::Error;
use tracing::info;

use super::context::AwsContext;
use super::error::AwsError;

/// Credential precondition failures
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("failed to get AWS caller identity, check credentials")]
    Identity(#[source] AwsError),

    #[error("STS returned no usable account id")]
    MissingAccount,

    #[error("credentials belong to account {actual}, but the deployment targets {expected}")]
    Mismatch {
        expected: AccountId,
        actual: AccountId,
    },
}

/// Fetch the current AWS account ID from credentials via STS GetCallerIdentity
///
/// This operation requires no special permissions - it always succeeds if
/// credentials are valid.
pub async fn get_current_account_id(ctx: &AwsContext) -> Result<AccountId, AccountError> {
    let identity = ctx
        .sts_client()
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| AccountError::Identity(e.into()))?;

    let account = identity
        .account()
        .and_then(|a| AccountId::parse(a).ok())
        .ok_or(AccountError::MissingAccount)?;

    info!(account_id = %account, "AWS account validated");
    Ok(account)
}

/// Ensure the resolved credentials belong to the configured account before
/// any mutating call is made.
pub async fn verify_account(ctx: &AwsContext, expected: &AccountId) -> Result<(), AccountError> {
    let actual = get_current_account_id(ctx).await?;
    check_account(expected, actual)
}

fn check_account(expected: &AccountId, actual: AccountId) -> Result<(), AccountError> {
    if &actual == expected {
        Ok(())
    } else {
        Err(AccountError::Mismatch {
            expected: expected.clone(),
            actual,
        })
    }
}
