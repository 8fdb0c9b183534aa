//! The bundle of service clients every component is built from

use std::sync::Arc;

use super::cloudformation::{CloudFormationClient, StackOperations};
use super::context::{AwsContext, FromAwsContext};
use super::ecr::{EcrClient, RegistryOperations};
use super::iam::{IamClient, IdentityOperations};
use super::kms::{KeyOperations, KmsClient};
use super::lambda::{FunctionOperations, LambdaClient};
use super::s3::{ObjectStoreOperations, S3Client};
use super::s3vectors::{S3VectorsClient, VectorOperations};
use super::sqs::{QueueOperations, SqsClient};

/// One handle per control-plane service. Cloning is cheap.
#[derive(Clone)]
pub struct Cloud {
    pub stacks: Arc<dyn StackOperations>,
    pub objects: Arc<dyn ObjectStoreOperations>,
    pub vectors: Arc<dyn VectorOperations>,
    pub registry: Arc<dyn RegistryOperations>,
    pub identity: Arc<dyn IdentityOperations>,
    pub functions: Arc<dyn FunctionOperations>,
    pub queues: Arc<dyn QueueOperations>,
    pub keys: Arc<dyn KeyOperations>,
}

impl FromAwsContext for Cloud {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            stacks: Arc::new(CloudFormationClient::from_context(ctx)),
            objects: Arc::new(S3Client::from_context(ctx)),
            vectors: Arc::new(S3VectorsClient::from_context(ctx)),
            registry: Arc::new(EcrClient::from_context(ctx)),
            identity: Arc::new(IamClient::from_context(ctx)),
            functions: Arc::new(LambdaClient::from_context(ctx)),
            queues: Arc::new(SqsClient::from_context(ctx)),
            keys: Arc::new(KmsClient::from_context(ctx)),
        }
    }
}

impl std::fmt::Debug for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloud").finish_non_exhaustive()
    }
}
