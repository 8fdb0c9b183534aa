//! Resource kinds and teardown ordering
//!
//! Provides consistent cleanup priority across the scanner, the mutator and
//! the teardown sequence. Resources must be removed in dependency order:
//! consumers before producers, children before parents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Types of cloud resources owned by one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Versioned object-store bucket (must be emptied before deletion)
    Bucket,
    /// Vector index (must go before its vector bucket)
    VectorIndex,
    /// Vector bucket
    VectorBucket,
    /// Customer-managed encryption key (scheduled deletion)
    Key,
    /// Compute function
    Function,
    /// IAM role (policies detached first)
    Role,
    /// Customer-managed IAM policy
    Policy,
    /// Message queue
    Queue,
    /// Infrastructure stack
    Stack,
    /// Container registry repository (images deleted first)
    RegistryRepo,
}

impl ResourceKind {
    /// Every kind, in teardown order
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Bucket,
        ResourceKind::VectorIndex,
        ResourceKind::VectorBucket,
        ResourceKind::Key,
        ResourceKind::Function,
        ResourceKind::Role,
        ResourceKind::Policy,
        ResourceKind::Queue,
        ResourceKind::Stack,
        ResourceKind::RegistryRepo,
    ];

    /// Get cleanup priority (lower number = cleanup first)
    ///
    /// - 0: Buckets (referenced by the stack, must be empty before it goes)
    /// - 1-2: Vector index, then its vector bucket
    /// - 3: Encryption key
    /// - 4: Functions (consumers of roles, queues and keys)
    /// - 5-6: Roles, then standalone policies
    /// - 7: Dead-letter queue
    /// - 8: Stack
    /// - 9: Registry repository (images may still be referenced until the stack is gone)
    pub fn cleanup_priority(self) -> u8 {
        match self {
            ResourceKind::Bucket => 0,
            ResourceKind::VectorIndex => 1,
            ResourceKind::VectorBucket => 2,
            ResourceKind::Key => 3,
            ResourceKind::Function => 4,
            ResourceKind::Role => 5,
            ResourceKind::Policy => 6,
            ResourceKind::Queue => 7,
            ResourceKind::Stack => 8,
            ResourceKind::RegistryRepo => 9,
        }
    }

    /// Short stable name used in logs and reports
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::VectorIndex => "vector-index",
            ResourceKind::VectorBucket => "vector-bucket",
            ResourceKind::Key => "key",
            ResourceKind::Function => "function",
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::Queue => "queue",
            ResourceKind::Stack => "stack",
            ResourceKind::RegistryRepo => "registry-repo",
        }
    }

    /// Map a stack resource type (e.g. `AWS::S3::Bucket`) to a kind.
    ///
    /// Returns `None` for types the teardown does not manage individually
    /// (log groups, event mappings, bucket policies and the like go away
    /// with the stack).
    pub fn from_stack_type(resource_type: &str) -> Option<Self> {
        match resource_type {
            "AWS::S3::Bucket" => Some(ResourceKind::Bucket),
            "AWS::S3Vectors::VectorBucket" => Some(ResourceKind::VectorBucket),
            "AWS::S3Vectors::Index" => Some(ResourceKind::VectorIndex),
            "AWS::KMS::Key" => Some(ResourceKind::Key),
            "AWS::Lambda::Function" => Some(ResourceKind::Function),
            "AWS::IAM::Role" => Some(ResourceKind::Role),
            "AWS::IAM::ManagedPolicy" => Some(ResourceKind::Policy),
            "AWS::SQS::Queue" => Some(ResourceKind::Queue),
            "AWS::CloudFormation::Stack" => Some(ResourceKind::Stack),
            "AWS::ECR::Repository" => Some(ResourceKind::RegistryRepo),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
