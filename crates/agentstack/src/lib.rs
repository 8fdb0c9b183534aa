//! agentstack - deploy and tear down versioned agent stacks on AWS
//!
//! A deployment is one infrastructure stack plus the resources around it
//! (image repository, buckets, vector store, key, queue), all named from a
//! [`DeploymentIdentity`](agentstack_common::DeploymentIdentity).
//!
//! ## Modules
//!
//! - `aws`: one client per service, the resource scanner, idempotent
//!   per-resource deletion and bucket purging
//! - `lifecycle`: the stack state machine with delete recovery
//! - `orchestrator`: the deploy and teardown sequences and the run report
//! - `config`: environment and flag configuration
//! - `wait`: bounded fixed-interval polling

pub mod aws;
pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod wait;

#[cfg(test)]
mod testing;
