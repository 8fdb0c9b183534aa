//! Deployment identity and deterministic resource naming
//!
//! Every resource a deployment owns is named from the identity tuple alone,
//! so a teardown re-run after a crash finds exactly the same names without
//! any local state. The general convention is `<prefix>-<account>-<version>`.

use std::fmt;

use thiserror::Error;

/// Longest name S3 accepts for a bucket
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Characters that may separate a name token from its neighbours
const TOKEN_SEPARATORS: &[char] = &['-', '_', '.', '/', ':'];

/// Identity validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Version is empty or not purely lowercase alphanumeric
    #[error("version must be lowercase letters and digits only, got: '{0}'")]
    InvalidVersion(String),

    /// Application prefix is empty or contains invalid characters
    #[error("app prefix must be a lowercase token of [a-z0-9-], got: '{0}'")]
    InvalidAppPrefix(String),

    /// Account id is not a 12-digit string
    #[error("account id must be 12 digits, got: '{0}'")]
    InvalidAccount(String),

    /// Region is empty or malformed
    #[error("region must be a lowercase token like 'us-east-1', got: '{0}'")]
    InvalidRegion(String),

    /// A derived name would exceed a service limit
    #[error("derived name '{name}' exceeds {limit} characters; shorten the app prefix or version")]
    NameTooLong { name: String, limit: usize },
}

/// Strongly-typed AWS account ID (12-digit string)
///
/// This newtype prevents accidentally mixing account IDs with other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account id
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let s = s.trim();
        if s.len() == 12 && s.chars().all(|c| c.is_ascii_digit()) {
            Ok(AccountId(s.to_string()))
        } else {
            Err(IdentityError::InvalidAccount(s.to_string()))
        }
    }
}

/// The immutable tuple that names every resource in one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentIdentity {
    app: String,
    version: String,
    region: String,
    account: AccountId,
    stack_name: String,
}

impl DeploymentIdentity {
    /// Build an identity, validating every component and every derived name.
    pub fn new(
        app: &str,
        version: &str,
        region: &str,
        account: AccountId,
    ) -> Result<Self, IdentityError> {
        if !is_name_token(app) {
            return Err(IdentityError::InvalidAppPrefix(app.to_string()));
        }
        if !is_version_token(version) {
            return Err(IdentityError::InvalidVersion(version.to_string()));
        }
        if !is_name_token(region) || !region.contains('-') {
            return Err(IdentityError::InvalidRegion(region.to_string()));
        }

        let identity = Self {
            app: app.to_string(),
            version: version.to_string(),
            region: region.to_string(),
            account,
            stack_name: format!("{app}-{version}"),
        };

        let mut bucket_names = identity.well_known_buckets();
        bucket_names.push(identity.vector_bucket());
        for name in bucket_names {
            if name.len() > MAX_BUCKET_NAME_LEN {
                return Err(IdentityError::NameTooLong {
                    name,
                    limit: MAX_BUCKET_NAME_LEN,
                });
            }
        }

        Ok(identity)
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Name of the main infrastructure stack
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// `<prefix>-<account>-<version>`
    pub fn resource_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}-{}", self.account, self.version)
    }

    /// `<account>-<version>`, the token every account-scoped name ends with
    pub fn deployment_suffix(&self) -> String {
        format!("{}-{}", self.account, self.version)
    }

    /// Primary logging bucket (access logs for the content bucket)
    pub fn logging_bucket(&self) -> String {
        self.resource_name(&format!("{}-logs", self.app))
    }

    /// Source-data bucket the indexing function reads from
    pub fn content_bucket(&self) -> String {
        self.resource_name(&format!("{}-content", self.app))
    }

    /// Vector bucket holding the embedding index
    pub fn vector_bucket(&self) -> String {
        self.resource_name(&format!("{}-vectors", self.app))
    }

    /// Vector index inside [`Self::vector_bucket`]
    pub fn vector_index(&self) -> String {
        self.resource_name(&format!("{}-index", self.app))
    }

    /// Container registry repository for this version's images
    pub fn repository(&self) -> String {
        format!("{}-{}", self.app, self.version)
    }

    /// Registry URI images are pushed to
    pub fn repository_uri(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}",
            self.account,
            self.region,
            self.repository()
        )
    }

    /// Tag for one image of this version
    pub fn image_tag(&self, image: &str) -> String {
        format!("{image}-{}", self.version)
    }

    /// Dead-letter queue for failed indexing events
    pub fn dead_letter_queue(&self) -> String {
        self.resource_name(&format!("{}-dlq", self.app))
    }

    /// Alias of the customer-managed encryption key
    pub fn key_alias(&self) -> String {
        format!("alias/{}", self.resource_name(&format!("{}-key", self.app)))
    }

    /// Buckets whose names are fully determined by the identity
    pub fn well_known_buckets(&self) -> Vec<String> {
        vec![self.logging_bucket(), self.content_bucket()]
    }

    /// Whether a live resource name belongs to this deployment.
    ///
    /// Two shapes are owned: names under the stack (`<app>-<version>`, alone
    /// or followed by a separator and a name starting with a letter) and
    /// account-scoped names (`<app>-...-<account>-<version>`). Key aliases
    /// are compared without their `alias/` namespace.
    pub fn matches_name(&self, candidate: &str) -> bool {
        let candidate = candidate.to_ascii_lowercase();
        let candidate = candidate.strip_prefix("alias/").unwrap_or(&candidate);

        let under_stack = candidate
            .strip_prefix(self.stack_name.as_str())
            .is_some_and(|rest| {
                let mut chars = rest.chars();
                match chars.next() {
                    None => true,
                    // A digit here would be another deployment's version
                    Some(sep) => {
                        TOKEN_SEPARATORS.contains(&sep)
                            && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                    }
                }
            });

        let account_scoped = candidate
            .strip_prefix(self.app.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.strip_suffix(self.version.as_str()))
            .and_then(|rest| rest.strip_suffix('-'))
            .and_then(|rest| rest.strip_suffix(self.account.as_str()))
            .is_some_and(|rest| rest.is_empty() || rest.ends_with('-'));

        under_stack || account_scoped
    }
}

impl fmt::Display for DeploymentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (version {}, account {}, region {})",
            self.stack_name, self.version, self.account, self.region
        )
    }
}

/// Lowercase `[a-z0-9-]`, starting and ending with an alphanumeric.
fn is_name_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Lowercase `[a-z0-9]`: a version never contains a separator, so
/// `<app>-<version>` cannot be the prefix of another version's names.
fn is_version_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
