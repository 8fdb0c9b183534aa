//! agentstack-common - Shared types and utilities
//!
//! This crate provides the SDK-free types shared by the orchestrator and its
//! tests, so naming and ordering rules can be checked without AWS clients.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`identity`]: Deployment identity and deterministic resource naming
//! - [`resource_kind`]: Resource kinds and teardown ordering
//! - [`tags`]: Tag keys applied to created resources

pub mod defaults;
pub mod identity;
pub mod resource_kind;
pub mod tags;

// Re-export commonly used types
pub use identity::{AccountId, DeploymentIdentity, IdentityError};
pub use resource_kind::ResourceKind;
