//! Configuration for deploy and teardown runs
//!
//! Every setting is an environment variable with an equivalent long flag,
//! so each command can run with no arguments. The parsed values become an
//! immutable [`DeploymentConfig`] built once at startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentstack_common::defaults::{
    DEFAULT_APP_PREFIX, DEFAULT_IMAGE_CONTEXTS, DEFAULT_KMS_PENDING_WINDOW_DAYS,
    DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_MAX_RECOVERY_CYCLES, DEFAULT_MODEL_ID,
    DEFAULT_POLL_INTERVAL_SECS,
};
use agentstack_common::{AccountId, DeploymentIdentity, IdentityError};
use thiserror::Error;

use crate::wait::PollConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid deployment identity")]
    Identity(#[from] IdentityError),

    #[error("invalid image list '{0}': expected name=directory pairs separated by commas")]
    InvalidImageContexts(String),

    #[error("image '{0}' is listed more than once")]
    DuplicateImage(String),

    #[error("failed to read stack template {}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stack template {} is empty", .0.display())]
    EmptyTemplate(PathBuf),
}

/// Settings shared by every command
#[derive(clap::Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Deployment version tag, e.g. "v1"
    #[arg(long = "deploy-version", env = "DEPLOY_VERSION")]
    pub version: String,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub region: String,

    /// AWS account the deployment lives in (checked against the credentials)
    #[arg(long, env = "AWS_ACCOUNT_ID")]
    pub account_id: String,

    /// AWS profile to use
    #[arg(long, env = "AWS_PROFILE")]
    pub aws_profile: Option<String>,

    /// Prefix every resource name is derived from
    #[arg(long, env = "APP_PREFIX", default_value = DEFAULT_APP_PREFIX)]
    pub app_prefix: String,

    /// Seconds between stack status checks
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Status checks before a stack operation is abandoned
    #[arg(long, env = "MAX_POLL_ATTEMPTS", default_value_t = DEFAULT_MAX_POLL_ATTEMPTS,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_poll_attempts: u32,

    /// Retained-resource retries after a failed stack delete
    #[arg(long, env = "MAX_RECOVERY_CYCLES", default_value_t = DEFAULT_MAX_RECOVERY_CYCLES)]
    pub max_recovery_cycles: u32,

    /// Waiting period before a scheduled key deletion completes (7-30 days)
    #[arg(long, env = "KMS_PENDING_WINDOW_DAYS", default_value_t = DEFAULT_KMS_PENDING_WINDOW_DAYS,
          value_parser = clap::value_parser!(i32).range(7..=30))]
    pub kms_pending_window_days: i32,
}

/// Settings only the deploy command needs
#[derive(clap::Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,

    /// CloudFormation template for the main stack
    #[arg(long, env = "STACK_TEMPLATE")]
    pub template: PathBuf,

    /// Embedding model passed to the stack
    #[arg(long, env = "MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Reasoning model passed to the agent runtime
    #[arg(long, env = "REASONING_MODEL_ID")]
    pub reasoning_model_id: String,

    /// Images to build, as name=directory pairs
    #[arg(long, env = "IMAGE_CONTEXTS", default_value = DEFAULT_IMAGE_CONTEXTS)]
    pub image_contexts: String,
}

/// Immutable run configuration
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub identity: DeploymentIdentity,
    pub poll: PollConfig,
    pub max_recovery_cycles: u32,
    pub kms_pending_window_days: i32,
    pub aws_profile: Option<String>,
}

impl TryFrom<IdentityArgs> for DeploymentConfig {
    type Error = ConfigError;

    fn try_from(args: IdentityArgs) -> Result<Self, Self::Error> {
        let account = AccountId::parse(&args.account_id)?;
        let identity = DeploymentIdentity::new(&args.app_prefix, &args.version, &args.region, account)?;

        Ok(Self {
            identity,
            poll: PollConfig {
                interval: Duration::from_secs(args.poll_interval_secs),
                max_attempts: args.max_poll_attempts,
            },
            max_recovery_cycles: args.max_recovery_cycles,
            kms_pending_window_days: args.kms_pending_window_days,
            aws_profile: args.aws_profile,
        })
    }
}

/// One image to build and push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub context: PathBuf,
}

/// Deploy-only settings
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub template_body: String,
    pub model_id: String,
    pub reasoning_model_id: String,
    pub images: Vec<ImageSpec>,
}

impl DeploySettings {
    /// Validate the deploy arguments and read the stack template.
    pub async fn load(args: &DeployArgs) -> Result<Self, ConfigError> {
        let images = parse_image_contexts(&args.image_contexts)?;
        let template_body = load_template(&args.template).await?;
        Ok(Self {
            template_body,
            model_id: args.model_id.clone(),
            reasoning_model_id: args.reasoning_model_id.clone(),
            images,
        })
    }
}

/// Parse `name=dir,name=dir`.
pub fn parse_image_contexts(value: &str) -> Result<Vec<ImageSpec>, ConfigError> {
    let invalid = || ConfigError::InvalidImageContexts(value.to_string());
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, dir) = pair.split_once('=').ok_or_else(invalid)?;
        let (name, dir) = (name.trim(), dir.trim());
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid_name || dir.is_empty() {
            return Err(invalid());
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::DuplicateImage(name.to_string()));
        }
        images.push(ImageSpec {
            name: name.to_string(),
            context: PathBuf::from(dir),
        });
    }

    if images.is_empty() {
        return Err(invalid());
    }
    Ok(images)
}

/// Read the stack template body
pub async fn load_template(path: &Path) -> Result<String, ConfigError> {
    let body = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Template {
            path: path.to_path_buf(),
            source,
        })?;
    if body.trim().is_empty() {
        return Err(ConfigError::EmptyTemplate(path.to_path_buf()));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        identity: IdentityArgs,
    }

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args = vec![
            "agentstack",
            "--deploy-version",
            "v1",
            "--region",
            "us-east-1",
            "--account-id",
            "123456789012",
            "--app-prefix",
            "agentstack",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args)
    }

    #[test]
    fn flags_build_a_config() {
        let cli = parse(&["--poll-interval-secs", "5", "--max-poll-attempts", "12"]).unwrap();
        let config = DeploymentConfig::try_from(cli.identity).unwrap();

        assert_eq!(config.identity.stack_name(), "agentstack-v1");
        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.poll.max_attempts, 12);
    }

    #[test]
    fn kms_window_is_range_checked() {
        assert!(parse(&["--kms-pending-window-days", "3"]).is_err());
        assert!(parse(&["--kms-pending-window-days", "31"]).is_err());
        assert!(parse(&["--kms-pending-window-days", "30"]).is_ok());
    }

    #[test]
    fn invalid_identity_is_rejected() {
        let mut cli = parse(&[]).unwrap();
        cli.identity.account_id = "123".to_string();
        assert!(matches!(
            DeploymentConfig::try_from(cli.identity.clone()),
            Err(ConfigError::Identity(IdentityError::InvalidAccount(_)))
        ));

        cli.identity.account_id = "123456789012".to_string();
        cli.identity.version = "V1".to_string();
        assert!(matches!(
            DeploymentConfig::try_from(cli.identity),
            Err(ConfigError::Identity(IdentityError::InvalidVersion(_)))
        ));
    }

    #[test]
    fn default_image_contexts() {
        let images = parse_image_contexts(DEFAULT_IMAGE_CONTEXTS).unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["create-index", "clean-index", "agent-runtime"]);
        assert_eq!(images[2].context, PathBuf::from("agent"));
    }

    #[test]
    fn malformed_image_contexts() {
        assert!(matches!(
            parse_image_contexts("agent"),
            Err(ConfigError::InvalidImageContexts(_))
        ));
        assert!(matches!(
            parse_image_contexts("Agent=dir"),
            Err(ConfigError::InvalidImageContexts(_))
        ));
        assert!(matches!(
            parse_image_contexts(" , "),
            Err(ConfigError::InvalidImageContexts(_))
        ));
        assert!(matches!(
            parse_image_contexts("a=x,a=y"),
            Err(ConfigError::DuplicateImage(_))
        ));
    }

    #[tokio::test]
    async fn template_is_read_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "AWSTemplateFormatVersion: '2010-09-09'").unwrap();

        let body = load_template(file.path()).await.unwrap();
        assert!(body.starts_with("AWSTemplateFormatVersion"));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_template(empty.path()).await,
            Err(ConfigError::EmptyTemplate(_))
        ));
        assert!(matches!(
            load_template(Path::new("/nonexistent/template.yaml")).await,
            Err(ConfigError::Template { .. })
        ));
    }
}
