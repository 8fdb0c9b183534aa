//! Deployment sequencing
//!
//! build images → ensure repository → authenticate → tag and push →
//! create or update the stack. Each step is fatal on error; re-running
//! resumes safely because every step is idempotent.

use std::fmt;
use std::sync::Arc;

use agentstack_common::DeploymentIdentity;
use agentstack_common::tags::deployment_tags;
use thiserror::Error;
use tracing::{info, warn};

use super::images::ImageTool;
use crate::aws::Cloud;
use crate::aws::cloudformation::StackRequest;
use crate::aws::ecr::RegistryOperations;
use crate::config::{DeploySettings, DeploymentConfig};
use crate::lifecycle::{StackManager, StackSnapshot, StackState};

/// Deploy steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    BuildImages,
    EnsureRepository,
    Authenticate,
    PushImages,
    DeployStack,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeployStep::BuildImages => "build images",
            DeployStep::EnsureRepository => "ensure repository",
            DeployStep::Authenticate => "authenticate",
            DeployStep::PushImages => "push images",
            DeployStep::DeployStack => "deploy stack",
        })
    }
}

#[derive(Debug, Error)]
#[error("deploy failed at step '{step}'")]
pub struct DeployError {
    pub step: DeployStep,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl DeployError {
    fn at(step: DeployStep) -> impl FnOnce(Box<dyn std::error::Error + Send + Sync>) -> Self {
        move |source| Self { step, source }
    }
}

/// What a successful deploy produced
#[derive(Debug, Clone)]
pub struct DeploySummary {
    pub repository_uri: String,
    pub images: Vec<String>,
    pub stack: StackSnapshot,
}

impl DeploySummary {
    /// False when the stack was left as it was in a rolled-back state
    /// because the request changed nothing.
    pub fn stack_healthy(&self) -> bool {
        self.stack.state == StackState::Complete
    }
}

/// `create-index` → `CreateIndex`
fn pascal_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Runs the deploy sequence for one deployment
pub struct Deployer {
    identity: DeploymentIdentity,
    settings: DeploySettings,
    registry: Arc<dyn RegistryOperations>,
    images: Arc<dyn ImageTool>,
    stacks: StackManager,
}

impl Deployer {
    pub fn new(
        cloud: &Cloud,
        images: Arc<dyn ImageTool>,
        config: &DeploymentConfig,
        settings: DeploySettings,
    ) -> Self {
        Self {
            identity: config.identity.clone(),
            settings,
            registry: cloud.registry.clone(),
            images,
            stacks: StackManager::new(cloud.stacks.clone(), config.poll, config.max_recovery_cycles),
        }
    }

    fn local_image(&self, name: &str) -> String {
        format!("{}:{}", self.identity.repository(), self.identity.image_tag(name))
    }

    fn remote_image(&self, repository_uri: &str, name: &str) -> String {
        format!("{repository_uri}:{}", self.identity.image_tag(name))
    }

    /// The stack request for this deployment, pointing at `repository_uri`
    pub fn stack_request(&self, repository_uri: &str) -> StackRequest {
        let mut parameters = vec![
            ("DeploymentVersion".to_string(), self.identity.version().to_string()),
            ("EmbeddingModelId".to_string(), self.settings.model_id.clone()),
            (
                "ReasoningModelId".to_string(),
                self.settings.reasoning_model_id.clone(),
            ),
            ("RepositoryUri".to_string(), repository_uri.to_string()),
        ];
        for image in &self.settings.images {
            parameters.push((
                format!("{}ImageUri", pascal_case(&image.name)),
                self.remote_image(repository_uri, &image.name),
            ));
        }

        StackRequest {
            name: self.identity.stack_name().to_string(),
            template_body: self.settings.template_body.clone(),
            parameters,
            tags: self.tags(),
        }
    }

    fn tags(&self) -> Vec<(String, String)> {
        deployment_tags(&self.identity)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Run every step, stopping at the first failure.
    pub async fn run(&self) -> Result<DeploySummary, DeployError> {
        info!(deployment = %self.identity, images = self.settings.images.len(), "Starting deploy");

        for image in &self.settings.images {
            self.images
                .build(&image.context, &self.local_image(&image.name))
                .await
                .map_err(|e| DeployError::at(DeployStep::BuildImages)(e.into()))?;
        }

        let repository = self.identity.repository();
        match self.registry.create_repository(&repository, &self.tags()).await {
            Ok(()) => info!(repository = %repository, "Repository created"),
            Err(e) if e.is_already_exists() => {
                info!(repository = %repository, "Repository already exists")
            }
            Err(e) => return Err(DeployError::at(DeployStep::EnsureRepository)(e.into())),
        }
        let repository_uri = self
            .registry
            .describe_repository(&repository)
            .await
            .map_err(|e| DeployError::at(DeployStep::EnsureRepository)(e.into()))?;

        let credentials = self
            .registry
            .authorization_token()
            .await
            .map_err(|e| DeployError::at(DeployStep::Authenticate)(e.into()))?;
        self.images
            .login(&credentials)
            .await
            .map_err(|e| DeployError::at(DeployStep::Authenticate)(e.into()))?;

        let mut pushed = Vec::new();
        for image in &self.settings.images {
            let remote = self.remote_image(&repository_uri, &image.name);
            self.images
                .tag(&self.local_image(&image.name), &remote)
                .await
                .map_err(|e| DeployError::at(DeployStep::PushImages)(e.into()))?;
            self.images
                .push(&remote)
                .await
                .map_err(|e| DeployError::at(DeployStep::PushImages)(e.into()))?;
            pushed.push(remote);
        }

        let stack = self
            .stacks
            .deploy(&self.stack_request(&repository_uri))
            .await
            .map_err(|e| DeployError::at(DeployStep::DeployStack)(e.into()))?;

        if stack.state == StackState::Complete {
            info!(
                stack = %stack.name,
                status = %stack.raw_status,
                images = pushed.len(),
                "Deploy complete"
            );
        } else {
            warn!(
                stack = %stack.name,
                status = %stack.raw_status,
                images = pushed.len(),
                "Images pushed but the stack is unchanged and not healthy"
            );
        }
        Ok(DeploySummary {
            repository_uri,
            images: pushed,
            stack,
        })
    }
}
