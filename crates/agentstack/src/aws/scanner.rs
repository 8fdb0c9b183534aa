//! Resource scanner for finding a deployment's live resources
//!
//! Discovery runs two ways and merges the results: the deployment stack's
//! own children when the stack exists, and every service's list API
//! filtered by the deployment's name tokens. The second path finds what a
//! failed or partial stack delete left orphaned.

use std::collections::HashMap;
use std::fmt;

use agentstack_common::{DeploymentIdentity, ResourceKind};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::cloud::Cloud;
use super::cloudformation::DELETE_COMPLETE;
use super::error::AwsResult;
use super::sqs::queue_name_from_url;

/// How a resource was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    /// Listed as a child of the deployment stack
    StackChild,
    /// Found by name in a service listing
    NameMatch,
    /// Derived from the deployment identity alone
    WellKnown,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoverySource::StackChild => "stack-child",
            DiscoverySource::NameMatch => "name-match",
            DiscoverySource::WellKnown => "well-known",
        })
    }
}

/// A discovered resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// Name, id, ARN or URL, whichever the delete call takes
    pub name: String,
    /// Containing resource, for vector indexes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub discovered_via: DiscoverySource,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>, via: DiscoverySource) -> Self {
        Self {
            kind,
            name: name.into(),
            parent: None,
            discovered_via: via,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Everything one scan found, plus the listings that failed
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub resources: Vec<ResourceDescriptor>,
    pub errors: Vec<String>,
}

impl Inventory {
    /// Add a descriptor unless the same kind and name is already present.
    /// A stack child replaces a name match for the same resource.
    pub fn insert(&mut self, descriptor: ResourceDescriptor) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.kind == descriptor.kind && r.name == descriptor.name)
        {
            Some(existing) => {
                if descriptor.discovered_via == DiscoverySource::StackChild {
                    *existing = descriptor;
                }
            }
            None => self.resources.push(descriptor),
        }
    }

    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = ResourceDescriptor>) {
        for descriptor in descriptors {
            self.insert(descriptor);
        }
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.of_kind(kind).any(|r| r.name == name)
    }

    /// Count per kind, for logging
    pub fn counts(&self) -> HashMap<ResourceKind, usize> {
        let mut counts = HashMap::new();
        for resource in &self.resources {
            *counts.entry(resource.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Lists one resource kind and keeps what belongs to a deployment.
#[async_trait]
pub trait Enumerator: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>>;
}

fn name_matches(
    kind: ResourceKind,
    names: Vec<String>,
    identity: &DeploymentIdentity,
) -> Vec<ResourceDescriptor> {
    names
        .into_iter()
        .filter(|n| identity.matches_name(n))
        .map(|n| ResourceDescriptor::new(kind, n, DiscoverySource::NameMatch))
        .collect()
}

struct BucketEnumerator;

#[async_trait]
impl Enumerator for BucketEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Bucket
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let names = cloud.objects.list_buckets().await?;
        Ok(name_matches(self.kind(), names, identity))
    }
}

struct VectorBucketEnumerator;

#[async_trait]
impl Enumerator for VectorBucketEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VectorBucket
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let names = cloud.vectors.list_vector_buckets().await?;
        Ok(name_matches(self.kind(), names, identity))
    }
}

/// Indexes inside the deployment's vector buckets
struct VectorIndexEnumerator;

#[async_trait]
impl Enumerator for VectorIndexEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VectorIndex
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let mut found = Vec::new();
        let buckets = cloud.vectors.list_vector_buckets().await?;

        for bucket in buckets.into_iter().filter(|b| identity.matches_name(b)) {
            match cloud.vectors.list_indexes(&bucket).await {
                Ok(indexes) => found.extend(indexes.into_iter().map(|index| {
                    ResourceDescriptor::new(self.kind(), index, DiscoverySource::NameMatch)
                        .with_parent(bucket.clone())
                })),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(found)
    }
}

/// Keys are found through their aliases
struct KeyEnumerator;

#[async_trait]
impl Enumerator for KeyEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Key
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let aliases = cloud.keys.list_aliases().await?;
        Ok(aliases
            .into_iter()
            .filter(|a| identity.matches_name(&a.name))
            .filter_map(|a| a.target_key_id)
            .map(|key| ResourceDescriptor::new(self.kind(), key, DiscoverySource::NameMatch))
            .collect())
    }
}

struct FunctionEnumerator;

#[async_trait]
impl Enumerator for FunctionEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let names = cloud.functions.list_functions().await?;
        Ok(name_matches(self.kind(), names, identity))
    }
}

struct RoleEnumerator;

#[async_trait]
impl Enumerator for RoleEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let names = cloud.identity.list_roles().await?;
        Ok(name_matches(self.kind(), names, identity))
    }
}

/// Customer-managed policies, recorded by ARN
struct PolicyEnumerator;

#[async_trait]
impl Enumerator for PolicyEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Policy
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let policies = cloud.identity.list_local_policies().await?;
        Ok(policies
            .into_iter()
            .filter(|p| identity.matches_name(&p.name))
            .map(|p| ResourceDescriptor::new(self.kind(), p.arn, DiscoverySource::NameMatch))
            .collect())
    }
}

/// Queues, recorded by URL
struct QueueEnumerator;

#[async_trait]
impl Enumerator for QueueEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Queue
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let urls = cloud.queues.list_queues(identity.app()).await?;
        Ok(urls
            .into_iter()
            .filter(|url| identity.matches_name(queue_name_from_url(url)))
            .map(|url| ResourceDescriptor::new(self.kind(), url, DiscoverySource::NameMatch))
            .collect())
    }
}

struct StackEnumerator;

#[async_trait]
impl Enumerator for StackEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Stack
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let stacks = cloud.stacks.list_stacks().await?;
        Ok(stacks
            .into_iter()
            .filter(|s| s.status != DELETE_COMPLETE && identity.matches_name(&s.name))
            .map(|s| ResourceDescriptor::new(self.kind(), s.name, DiscoverySource::NameMatch))
            .collect())
    }
}

struct RegistryEnumerator;

#[async_trait]
impl Enumerator for RegistryEnumerator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RegistryRepo
    }

    async fn enumerate(
        &self,
        cloud: &Cloud,
        identity: &DeploymentIdentity,
    ) -> AwsResult<Vec<ResourceDescriptor>> {
        let names = cloud.registry.list_repositories().await?;
        Ok(name_matches(self.kind(), names, identity))
    }
}

fn default_enumerators() -> Vec<Box<dyn Enumerator>> {
    vec![
        Box::new(BucketEnumerator),
        Box::new(VectorIndexEnumerator),
        Box::new(VectorBucketEnumerator),
        Box::new(KeyEnumerator),
        Box::new(FunctionEnumerator),
        Box::new(RoleEnumerator),
        Box::new(PolicyEnumerator),
        Box::new(QueueEnumerator),
        Box::new(StackEnumerator),
        Box::new(RegistryEnumerator),
    ]
}

/// Scanner for finding one deployment's resources
pub struct ResourceScanner {
    cloud: Cloud,
    identity: DeploymentIdentity,
    enumerators: Vec<Box<dyn Enumerator>>,
}

impl ResourceScanner {
    pub fn new(cloud: Cloud, identity: DeploymentIdentity) -> Self {
        Self {
            cloud,
            identity,
            enumerators: default_enumerators(),
        }
    }

    /// Scan the stack's children and every resource kind.
    ///
    /// A failing listing is recorded in [`Inventory::errors`] and the scan
    /// moves on to the next kind.
    pub async fn scan_all(&self) -> Inventory {
        let mut inventory = Inventory::default();

        match self.scan_stack_children(self.identity.stack_name()).await {
            Ok(children) => inventory.extend(children),
            Err(e) => {
                warn!(stack = %self.identity.stack_name(), error = %e, "Failed to list stack resources");
                inventory
                    .errors
                    .push(format!("stack resources of {}: {e}", self.identity.stack_name()));
            }
        }

        for enumerator in &self.enumerators {
            match enumerator.enumerate(&self.cloud, &self.identity).await {
                Ok(found) => {
                    debug!(kind = %enumerator.kind(), count = found.len(), "Enumerated resources");
                    inventory.extend(found);
                }
                Err(e) => {
                    warn!(kind = %enumerator.kind(), error = %e, "Failed to enumerate resources");
                    inventory.errors.push(format!("{}: {e}", enumerator.kind()));
                }
            }
        }

        debug!(total = inventory.len(), counts = ?inventory.counts(), "Scan finished");
        inventory
    }

    /// Name-matched resources of one kind.
    pub async fn scan_kind(&self, kind: ResourceKind) -> AwsResult<Vec<ResourceDescriptor>> {
        let mut found = Vec::new();
        for enumerator in self.enumerators.iter().filter(|e| e.kind() == kind) {
            found.extend(enumerator.enumerate(&self.cloud, &self.identity).await?);
        }
        Ok(found)
    }

    /// Live children of a stack. An absent stack has none.
    ///
    /// Children already deleted, not yet created, or of a type this tool
    /// does not manage are left out.
    pub async fn scan_stack_children(&self, stack: &str) -> AwsResult<Vec<ResourceDescriptor>> {
        let resources = match self.cloud.stacks.list_stack_resources(stack).await {
            Ok(resources) => resources,
            Err(e) if e.is_not_found() => {
                debug!(stack = %stack, "Stack absent, no children to scan");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(resources
            .into_iter()
            .filter(|r| r.status != DELETE_COMPLETE)
            .filter_map(|r| {
                let kind = ResourceKind::from_stack_type(&r.resource_type)?;
                let id = r.physical_id?;
                Some(ResourceDescriptor::new(kind, id, DiscoverySource::StackChild))
            })
            .collect())
    }
}
