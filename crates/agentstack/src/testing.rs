//! In-memory cloud for unit tests
//!
//! [`FakeCloud`] implements every operations trait over plain maps, logs
//! each call as `op:args`, and can be told to fail or throttle individual
//! operations. Stack statuses advance one step per `describe_stack`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentstack_common::{AccountId, DeploymentIdentity};
use async_trait::async_trait;

use crate::aws::Cloud;
use crate::aws::cloudformation::{
    DELETE_COMPLETE, StackOperations, StackRequest, StackResourceSummary, StackSummary,
};
use crate::aws::ecr::{ImageRef, RegistryCredentials, RegistryOperations};
use crate::aws::iam::{IdentityOperations, PolicyEntity, PolicyRef, PolicyVersionRef};
use crate::aws::kms::{AliasRef, KeyInfo, KeyOperations, PENDING_DELETION};
use crate::aws::lambda::FunctionOperations;
use crate::aws::s3::{
    BatchDeleteResult, ObjectStoreOperations, ObjectVersionRef, VersionCursor, VersionPage,
};
use crate::aws::s3vectors::VectorOperations;
use crate::aws::sqs::{QueueOperations, queue_name_from_url};
use crate::aws::{AwsError, AwsResult};
use crate::config::DeploymentConfig;
use crate::orchestrator::images::{ImageError, ImageTool};
use crate::wait::PollConfig;

const ACCOUNT: &str = "123456789012";
const REGION: &str = "us-east-1";

pub fn test_identity(version: &str) -> DeploymentIdentity {
    DeploymentIdentity::new(
        "agentstack",
        version,
        REGION,
        AccountId::parse(ACCOUNT).unwrap(),
    )
    .unwrap()
}

pub fn test_config(version: &str) -> DeploymentConfig {
    DeploymentConfig {
        identity: test_identity(version),
        poll: PollConfig {
            interval: Duration::from_secs(15),
            max_attempts: 20,
        },
        max_recovery_cycles: 3,
        kms_pending_window_days: 7,
        aws_profile: None,
    }
}

fn not_found(what: impl fmt::Display) -> AwsError {
    AwsError::NotFound {
        message: format!("{what} does not exist"),
    }
}

fn conflict(code: &str, what: impl fmt::Display) -> AwsError {
    AwsError::Conflict {
        code: code.to_string(),
        message: format!("{what} is still in use"),
    }
}

fn access_denied(op: &str) -> AwsError {
    AwsError::Sdk {
        code: Some("AccessDenied".to_string()),
        message: format!("not authorized to perform {op}"),
    }
}

fn is_mutation(op: &str) -> bool {
    ["delete_", "detach_", "schedule_", "batch_", "remove_"]
        .iter()
        .any(|prefix| op.starts_with(prefix))
}

enum Injected {
    Always,
    Times(u32),
    Throttle(u32),
}

struct StoredObject {
    key: String,
    version_id: String,
    delete_marker: bool,
}

struct FakeKey {
    state: String,
}

#[derive(Default)]
struct FakeRole {
    attached: Vec<String>,
    inline: Vec<String>,
}

struct FakePolicy {
    roles: Vec<String>,
    versions: Vec<PolicyVersionRef>,
}

struct FakeStack {
    status: String,
    reason: Option<String>,
    children: Vec<StackResourceSummary>,
    pending: VecDeque<String>,
    failing: Vec<String>,
}

struct Script {
    statuses: Vec<String>,
    failing: Vec<String>,
}

struct State {
    calls: Vec<String>,
    injected: HashMap<String, Injected>,
    fail_mutations: bool,
    page_size: usize,
    next_version: u64,
    buckets: BTreeMap<String, Vec<StoredObject>>,
    vector_buckets: BTreeMap<String, Vec<String>>,
    keys: BTreeMap<String, FakeKey>,
    aliases: BTreeMap<String, String>,
    functions: BTreeSet<String>,
    roles: BTreeMap<String, FakeRole>,
    policies: BTreeMap<String, FakePolicy>,
    queues: BTreeSet<String>,
    repositories: BTreeMap<String, Vec<ImageRef>>,
    stacks: BTreeMap<String, FakeStack>,
    scripts: HashMap<String, VecDeque<Script>>,
    no_updates: HashSet<String>,
    stack_requests: HashMap<String, StackRequest>,
}

impl State {
    fn inject(&mut self, op: &str) -> AwsResult<()> {
        if let Some(injected) = self.injected.get_mut(op) {
            match injected {
                Injected::Always => return Err(access_denied(op)),
                Injected::Times(n) if *n > 0 => {
                    *n -= 1;
                    return Err(access_denied(op));
                }
                Injected::Throttle(n) if *n > 0 => {
                    *n -= 1;
                    return Err(AwsError::Throttled {
                        message: format!("rate exceeded for {op}"),
                    });
                }
                _ => {}
            }
        }
        if self.fail_mutations && is_mutation(op) {
            return Err(access_denied(op));
        }
        Ok(())
    }

    fn next_script(&mut self, stack: &str, default: [&str; 2]) -> Script {
        self.scripts
            .get_mut(stack)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Script {
                statuses: default.iter().map(|s| s.to_string()).collect(),
                failing: Vec::new(),
            })
    }
}

fn queue_url(name: &str) -> String {
    format!("https://sqs.{REGION}.amazonaws.com/{ACCOUNT}/{name}")
}

fn repository_uri(name: &str) -> String {
    format!("{ACCOUNT}.dkr.ecr.{REGION}.amazonaws.com/{name}")
}

pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                injected: HashMap::new(),
                fail_mutations: false,
                page_size: 1000,
                next_version: 0,
                buckets: BTreeMap::new(),
                vector_buckets: BTreeMap::new(),
                keys: BTreeMap::new(),
                aliases: BTreeMap::new(),
                functions: BTreeSet::new(),
                roles: BTreeMap::new(),
                policies: BTreeMap::new(),
                queues: BTreeSet::new(),
                repositories: BTreeMap::new(),
                stacks: BTreeMap::new(),
                scripts: HashMap::new(),
                no_updates: HashSet::new(),
                stack_requests: HashMap::new(),
            }),
        })
    }

    /// Every service handle backed by this fake
    pub fn cloud(self: &Arc<Self>) -> Cloud {
        Cloud {
            stacks: self.clone(),
            objects: self.clone(),
            vectors: self.clone(),
            registry: self.clone(),
            identity: self.clone(),
            functions: self.clone(),
            queues: self.clone(),
            keys: self.clone(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Log the call, apply injected failures, then run `f` on the state.
    fn call<T>(
        &self,
        op: &str,
        args: impl fmt::Display,
        f: impl FnOnce(&mut State) -> AwsResult<T>,
    ) -> AwsResult<T> {
        let mut state = self.state();
        let args = args.to_string();
        state.calls.push(if args.is_empty() {
            op.to_string()
        } else {
            format!("{op}:{args}")
        });
        state.inject(op)?;
        f(&mut state)
    }

    // Call log

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls of exactly `op`
    pub fn calls_matching(&self, op: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    // Failure injection

    pub fn fail_always(&self, op: &str) {
        self.state().injected.insert(op.to_string(), Injected::Always);
    }

    pub fn fail_times(&self, op: &str, times: u32) {
        self.state()
            .injected
            .insert(op.to_string(), Injected::Times(times));
    }

    pub fn throttle(&self, op: &str, times: u32) {
        self.state()
            .injected
            .insert(op.to_string(), Injected::Throttle(times));
    }

    /// Deny every delete, detach, schedule, batch and remove call
    pub fn fail_all_mutations(&self) {
        self.state().fail_mutations = true;
    }

    // Buckets

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = size;
    }

    pub fn add_bucket(&self, name: &str) {
        self.state().buckets.insert(name.to_string(), Vec::new());
    }

    pub fn put_versions(&self, bucket: &str, key: &str, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            state.next_version += 1;
            let version_id = format!("v{}", state.next_version);
            state
                .buckets
                .get_mut(bucket)
                .unwrap()
                .push(StoredObject {
                    key: key.to_string(),
                    version_id,
                    delete_marker: false,
                });
        }
    }

    pub fn put_delete_marker(&self, bucket: &str, key: &str) {
        let mut state = self.state();
        state.next_version += 1;
        let version_id = format!("v{}", state.next_version);
        state.buckets.get_mut(bucket).unwrap().push(StoredObject {
            key: key.to_string(),
            version_id,
            delete_marker: true,
        });
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.state().buckets.contains_key(name)
    }

    // Other services

    pub fn add_vector_bucket(&self, name: &str, indexes: &[&str]) {
        self.state().vector_buckets.insert(
            name.to_string(),
            indexes.iter().map(|i| i.to_string()).collect(),
        );
    }

    pub fn add_key(&self, key_id: &str, state: &str) {
        self.state().keys.insert(
            key_id.to_string(),
            FakeKey {
                state: state.to_string(),
            },
        );
    }

    pub fn add_alias(&self, alias: &str, key_id: &str) {
        self.state()
            .aliases
            .insert(alias.to_string(), key_id.to_string());
    }

    pub fn add_function(&self, name: &str) {
        self.state().functions.insert(name.to_string());
    }

    pub fn add_role(&self, name: &str, attached: &[&str], inline: &[&str]) {
        self.state().roles.insert(
            name.to_string(),
            FakeRole {
                attached: attached.iter().map(|a| a.to_string()).collect(),
                inline: inline.iter().map(|i| i.to_string()).collect(),
            },
        );
    }

    /// A customer-managed policy with a default and one older version,
    /// attached to `roles`
    pub fn add_policy(&self, arn: &str, roles: &[&str]) {
        let mut state = self.state();
        for role in roles {
            if let Some(role) = state.roles.get_mut(*role) {
                role.attached.push(arn.to_string());
            }
        }
        state.policies.insert(
            arn.to_string(),
            FakePolicy {
                roles: roles.iter().map(|r| r.to_string()).collect(),
                versions: vec![
                    PolicyVersionRef {
                        id: "v1".to_string(),
                        is_default: true,
                    },
                    PolicyVersionRef {
                        id: "v2".to_string(),
                        is_default: false,
                    },
                ],
            },
        );
    }

    pub fn add_queue(&self, name: &str) {
        self.state().queues.insert(name.to_string());
    }

    pub fn add_repository(&self, name: &str, images: usize) {
        let images = (0..images)
            .map(|i| ImageRef {
                digest: Some(format!("sha256:{i:064x}")),
                tag: Some(format!("image-{i}")),
            })
            .collect();
        self.state().repositories.insert(name.to_string(), images);
    }

    // Stacks

    pub fn add_stack(&self, name: &str, status: &str) {
        self.state().stacks.insert(
            name.to_string(),
            FakeStack {
                status: status.to_string(),
                reason: None,
                children: Vec::new(),
                pending: VecDeque::new(),
                failing: Vec::new(),
            },
        );
    }

    pub fn add_stack_child(
        &self,
        stack: &str,
        logical_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
    ) {
        self.state()
            .stacks
            .get_mut(stack)
            .unwrap()
            .children
            .push(StackResourceSummary {
                logical_id: logical_id.to_string(),
                physical_id: physical_id.map(str::to_string),
                resource_type: resource_type.to_string(),
                status: "CREATE_COMPLETE".to_string(),
                reason: None,
            });
    }

    pub fn set_child_status(&self, stack: &str, logical_id: &str, status: &str) {
        let mut state = self.state();
        let child = state
            .stacks
            .get_mut(stack)
            .unwrap()
            .children
            .iter_mut()
            .find(|c| c.logical_id == logical_id)
            .unwrap();
        child.status = status.to_string();
    }

    /// Queue the statuses the next create, update or delete of `name` moves
    /// through. When the stack reaches `DELETE_FAILED` the `failing`
    /// children are marked failed.
    pub fn script_stack(&self, name: &str, statuses: &[&str], failing: &[&str]) {
        self.state()
            .scripts
            .entry(name.to_string())
            .or_default()
            .push_back(Script {
                statuses: statuses.iter().map(|s| s.to_string()).collect(),
                failing: failing.iter().map(|f| f.to_string()).collect(),
            });
    }

    pub fn set_no_updates(&self, name: &str) {
        self.state().no_updates.insert(name.to_string());
    }

    pub fn stack_exists(&self, name: &str) -> bool {
        self.state().stacks.contains_key(name)
    }

    pub fn last_stack_request(&self, name: &str) -> Option<StackRequest> {
        self.state().stack_requests.get(name).cloned()
    }

    /// Live resources across every service. Keys pending deletion and
    /// aliases are not counted.
    pub fn remaining_resources(&self) -> usize {
        let state = self.state();
        state.buckets.len()
            + state.vector_buckets.len()
            + state.vector_buckets.values().map(Vec::len).sum::<usize>()
            + state
                .keys
                .values()
                .filter(|k| k.state != PENDING_DELETION)
                .count()
            + state.functions.len()
            + state.roles.len()
            + state.policies.len()
            + state.queues.len()
            + state.repositories.len()
            + state.stacks.len()
    }
}

#[async_trait]
impl ObjectStoreOperations for FakeCloud {
    async fn head_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.call("head_bucket", bucket, |s| {
            if s.buckets.contains_key(bucket) {
                Ok(())
            } else {
                Err(not_found(bucket))
            }
        })
    }

    async fn list_buckets(&self) -> AwsResult<Vec<String>> {
        self.call("list_buckets", "", |s| Ok(s.buckets.keys().cloned().collect()))
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        cursor: Option<VersionCursor>,
    ) -> AwsResult<VersionPage> {
        self.call("list_object_versions", bucket, |s| {
            let page_size = s.page_size;
            let objects = s.buckets.get(bucket).ok_or_else(|| not_found(bucket))?;
            let start = cursor
                .and_then(|c| c.key_marker)
                .and_then(|m| m.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (start + page_size).min(objects.len());

            let mut page = VersionPage {
                versions: Vec::new(),
                delete_markers: Vec::new(),
                next: None,
            };
            for object in &objects[start..end] {
                let entry = ObjectVersionRef {
                    key: object.key.clone(),
                    version_id: Some(object.version_id.clone()),
                };
                if object.delete_marker {
                    page.delete_markers.push(entry);
                } else {
                    page.versions.push(entry);
                }
            }
            if end < objects.len() {
                page.next = Some(VersionCursor {
                    key_marker: Some(end.to_string()),
                    version_id_marker: None,
                });
            }
            Ok(page)
        })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersionRef],
    ) -> AwsResult<BatchDeleteResult> {
        self.call(
            "delete_objects",
            format!("{bucket}:{}", objects.len()),
            |s| {
                let stored = s.buckets.get_mut(bucket).ok_or_else(|| not_found(bucket))?;
                let before = stored.len();
                stored.retain(|o| {
                    !objects.iter().any(|d| {
                        d.key == o.key && d.version_id.as_deref() == Some(o.version_id.as_str())
                    })
                });
                Ok(BatchDeleteResult {
                    deleted: before - stored.len(),
                    errors: Vec::new(),
                })
            },
        )
    }

    async fn delete_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.call("delete_bucket", bucket, |s| {
            match s.buckets.get(bucket) {
                None => return Err(not_found(bucket)),
                Some(objects) if !objects.is_empty() => {
                    return Err(conflict("BucketNotEmpty", bucket));
                }
                Some(_) => {}
            }
            s.buckets.remove(bucket);
            Ok(())
        })
    }
}

#[async_trait]
impl VectorOperations for FakeCloud {
    async fn list_vector_buckets(&self) -> AwsResult<Vec<String>> {
        self.call("list_vector_buckets", "", |s| {
            Ok(s.vector_buckets.keys().cloned().collect())
        })
    }

    async fn list_indexes(&self, bucket: &str) -> AwsResult<Vec<String>> {
        self.call("list_indexes", bucket, |s| {
            s.vector_buckets
                .get(bucket)
                .cloned()
                .ok_or_else(|| not_found(bucket))
        })
    }

    async fn delete_index(&self, bucket: &str, index: &str) -> AwsResult<()> {
        self.call("delete_index", format!("{bucket}:{index}"), |s| {
            let indexes = s
                .vector_buckets
                .get_mut(bucket)
                .ok_or_else(|| not_found(bucket))?;
            let before = indexes.len();
            indexes.retain(|i| i != index);
            if indexes.len() == before {
                Err(not_found(index))
            } else {
                Ok(())
            }
        })
    }

    async fn delete_vector_bucket(&self, bucket: &str) -> AwsResult<()> {
        self.call("delete_vector_bucket", bucket, |s| {
            match s.vector_buckets.get(bucket) {
                None => return Err(not_found(bucket)),
                Some(indexes) if !indexes.is_empty() => {
                    return Err(conflict("ConflictException", bucket));
                }
                Some(_) => {}
            }
            s.vector_buckets.remove(bucket);
            Ok(())
        })
    }
}

#[async_trait]
impl KeyOperations for FakeCloud {
    async fn describe_key(&self, key_id: &str) -> AwsResult<KeyInfo> {
        self.call("describe_key", key_id, |s| {
            let id = s
                .aliases
                .get(key_id)
                .cloned()
                .unwrap_or_else(|| key_id.to_string());
            let key = s.keys.get(&id).ok_or_else(|| not_found(key_id))?;
            Ok(KeyInfo {
                key_id: id,
                state: key.state.clone(),
                manager: "CUSTOMER".to_string(),
            })
        })
    }

    async fn schedule_key_deletion(&self, key_id: &str, pending_window_days: i32) -> AwsResult<()> {
        self.call(
            "schedule_key_deletion",
            format!("{key_id}:{pending_window_days}"),
            |s| {
                let key = s.keys.get_mut(key_id).ok_or_else(|| not_found(key_id))?;
                key.state = PENDING_DELETION.to_string();
                Ok(())
            },
        )
    }

    async fn list_aliases(&self) -> AwsResult<Vec<AliasRef>> {
        self.call("list_aliases", "", |s| {
            Ok(s.aliases
                .iter()
                .map(|(name, key)| AliasRef {
                    name: name.clone(),
                    target_key_id: Some(key.clone()),
                })
                .collect())
        })
    }

    async fn delete_alias(&self, alias: &str) -> AwsResult<()> {
        self.call("delete_alias", alias, |s| {
            s.aliases
                .remove(alias)
                .map(|_| ())
                .ok_or_else(|| not_found(alias))
        })
    }
}

#[async_trait]
impl FunctionOperations for FakeCloud {
    async fn list_functions(&self) -> AwsResult<Vec<String>> {
        self.call("list_functions", "", |s| Ok(s.functions.iter().cloned().collect()))
    }

    async fn delete_function(&self, name: &str) -> AwsResult<()> {
        self.call("delete_function", name, |s| {
            if s.functions.remove(name) {
                Ok(())
            } else {
                Err(not_found(name))
            }
        })
    }
}

#[async_trait]
impl IdentityOperations for FakeCloud {
    async fn list_roles(&self) -> AwsResult<Vec<String>> {
        self.call("list_roles", "", |s| Ok(s.roles.keys().cloned().collect()))
    }

    async fn list_attached_role_policies(&self, role: &str) -> AwsResult<Vec<String>> {
        self.call("list_attached_role_policies", role, |s| {
            s.roles
                .get(role)
                .map(|r| r.attached.clone())
                .ok_or_else(|| not_found(role))
        })
    }

    async fn list_role_policies(&self, role: &str) -> AwsResult<Vec<String>> {
        self.call("list_role_policies", role, |s| {
            s.roles
                .get(role)
                .map(|r| r.inline.clone())
                .ok_or_else(|| not_found(role))
        })
    }

    async fn list_instance_profiles_for_role(&self, role: &str) -> AwsResult<Vec<String>> {
        self.call("list_instance_profiles_for_role", role, |s| {
            if s.roles.contains_key(role) {
                Ok(Vec::new())
            } else {
                Err(not_found(role))
            }
        })
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> AwsResult<()> {
        self.call("detach_role_policy", format!("{role}:{policy_arn}"), |s| {
            let fake_role = s.roles.get_mut(role).ok_or_else(|| not_found(role))?;
            let before = fake_role.attached.len();
            fake_role.attached.retain(|a| a != policy_arn);
            if fake_role.attached.len() == before {
                return Err(not_found(policy_arn));
            }
            if let Some(policy) = s.policies.get_mut(policy_arn) {
                policy.roles.retain(|r| r != role);
            }
            Ok(())
        })
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> AwsResult<()> {
        self.call("delete_role_policy", format!("{role}:{policy_name}"), |s| {
            let fake_role = s.roles.get_mut(role).ok_or_else(|| not_found(role))?;
            let before = fake_role.inline.len();
            fake_role.inline.retain(|p| p != policy_name);
            if fake_role.inline.len() == before {
                Err(not_found(policy_name))
            } else {
                Ok(())
            }
        })
    }

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> AwsResult<()> {
        self.call(
            "remove_role_from_instance_profile",
            format!("{profile}:{role}"),
            |_| Ok(()),
        )
    }

    async fn delete_role(&self, role: &str) -> AwsResult<()> {
        self.call("delete_role", role, |s| {
            match s.roles.get(role) {
                None => return Err(not_found(role)),
                Some(r) if !r.attached.is_empty() || !r.inline.is_empty() => {
                    return Err(conflict("DeleteConflict", role));
                }
                Some(_) => {}
            }
            s.roles.remove(role);
            Ok(())
        })
    }

    async fn list_local_policies(&self) -> AwsResult<Vec<PolicyRef>> {
        self.call("list_local_policies", "", |s| {
            Ok(s.policies
                .keys()
                .map(|arn| PolicyRef {
                    name: arn.rsplit('/').next().unwrap_or(arn).to_string(),
                    arn: arn.clone(),
                })
                .collect())
        })
    }

    async fn list_policy_entities(&self, policy_arn: &str) -> AwsResult<Vec<PolicyEntity>> {
        self.call("list_policy_entities", policy_arn, |s| {
            s.policies
                .get(policy_arn)
                .map(|p| p.roles.iter().cloned().map(PolicyEntity::Role).collect())
                .ok_or_else(|| not_found(policy_arn))
        })
    }

    async fn detach_policy(&self, policy_arn: &str, entity: &PolicyEntity) -> AwsResult<()> {
        self.call("detach_policy", format!("{policy_arn}:{entity:?}"), |s| {
            let policy = s
                .policies
                .get_mut(policy_arn)
                .ok_or_else(|| not_found(policy_arn))?;
            if let PolicyEntity::Role(role) = entity {
                policy.roles.retain(|r| r != role);
                if let Some(fake_role) = s.roles.get_mut(role) {
                    fake_role.attached.retain(|a| a != policy_arn);
                }
            }
            Ok(())
        })
    }

    async fn list_policy_versions(&self, policy_arn: &str) -> AwsResult<Vec<PolicyVersionRef>> {
        self.call("list_policy_versions", policy_arn, |s| {
            s.policies
                .get(policy_arn)
                .map(|p| p.versions.clone())
                .ok_or_else(|| not_found(policy_arn))
        })
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> AwsResult<()> {
        self.call(
            "delete_policy_version",
            format!("{policy_arn}:{version_id}"),
            |s| {
                let policy = s
                    .policies
                    .get_mut(policy_arn)
                    .ok_or_else(|| not_found(policy_arn))?;
                policy.versions.retain(|v| v.id != version_id);
                Ok(())
            },
        )
    }

    async fn delete_policy(&self, policy_arn: &str) -> AwsResult<()> {
        self.call("delete_policy", policy_arn, |s| {
            match s.policies.get(policy_arn) {
                None => return Err(not_found(policy_arn)),
                Some(p) if !p.roles.is_empty() => {
                    return Err(conflict("DeleteConflict", policy_arn));
                }
                Some(_) => {}
            }
            s.policies.remove(policy_arn);
            Ok(())
        })
    }
}

#[async_trait]
impl QueueOperations for FakeCloud {
    async fn get_queue_url(&self, name: &str) -> AwsResult<String> {
        self.call("get_queue_url", name, |s| {
            if s.queues.contains(name) {
                Ok(queue_url(name))
            } else {
                Err(not_found(name))
            }
        })
    }

    async fn list_queues(&self, prefix: &str) -> AwsResult<Vec<String>> {
        self.call("list_queues", prefix, |s| {
            Ok(s.queues
                .iter()
                .filter(|q| q.starts_with(prefix))
                .map(|q| queue_url(q))
                .collect())
        })
    }

    async fn delete_queue(&self, url: &str) -> AwsResult<()> {
        self.call("delete_queue", url, |s| {
            if s.queues.remove(queue_name_from_url(url)) {
                Ok(())
            } else {
                Err(not_found(url))
            }
        })
    }
}

#[async_trait]
impl RegistryOperations for FakeCloud {
    async fn create_repository(&self, name: &str, _tags: &[(String, String)]) -> AwsResult<()> {
        self.call("create_repository", name, |s| {
            if s.repositories.contains_key(name) {
                return Err(AwsError::AlreadyExists {
                    message: format!("repository {name} already exists"),
                });
            }
            s.repositories.insert(name.to_string(), Vec::new());
            Ok(())
        })
    }

    async fn describe_repository(&self, name: &str) -> AwsResult<String> {
        self.call("describe_repository", name, |s| {
            if s.repositories.contains_key(name) {
                Ok(repository_uri(name))
            } else {
                Err(not_found(name))
            }
        })
    }

    async fn list_repositories(&self) -> AwsResult<Vec<String>> {
        self.call("list_repositories", "", |s| {
            Ok(s.repositories.keys().cloned().collect())
        })
    }

    async fn list_images(&self, repository: &str) -> AwsResult<Vec<ImageRef>> {
        self.call("list_images", repository, |s| {
            s.repositories
                .get(repository)
                .cloned()
                .ok_or_else(|| not_found(repository))
        })
    }

    async fn batch_delete_images(
        &self,
        repository: &str,
        images: &[ImageRef],
    ) -> AwsResult<usize> {
        self.call(
            "batch_delete_images",
            format!("{repository}:{}", images.len()),
            |s| {
                let stored = s
                    .repositories
                    .get_mut(repository)
                    .ok_or_else(|| not_found(repository))?;
                stored.retain(|i| !images.contains(i));
                Ok(0)
            },
        )
    }

    async fn delete_repository(&self, name: &str) -> AwsResult<()> {
        self.call("delete_repository", name, |s| {
            match s.repositories.get(name) {
                None => return Err(not_found(name)),
                Some(images) if !images.is_empty() => {
                    return Err(conflict("RepositoryNotEmptyException", name));
                }
                Some(_) => {}
            }
            s.repositories.remove(name);
            Ok(())
        })
    }

    async fn authorization_token(&self) -> AwsResult<RegistryCredentials> {
        self.call("authorization_token", "", |_| {
            Ok(RegistryCredentials {
                username: "AWS".to_string(),
                password: "registry-password".to_string(),
                endpoint: format!("https://{ACCOUNT}.dkr.ecr.{REGION}.amazonaws.com"),
            })
        })
    }
}

#[async_trait]
impl StackOperations for FakeCloud {
    async fn describe_stack(&self, name: &str) -> AwsResult<StackSummary> {
        self.call("describe_stack", name, |s| {
            let stack = s.stacks.get_mut(name).ok_or_else(|| not_found(name))?;

            if let Some(next) = stack.pending.pop_front() {
                stack.status = next;
                if stack.status == "DELETE_FAILED" {
                    for child in stack
                        .children
                        .iter_mut()
                        .filter(|c| stack.failing.contains(&c.logical_id))
                    {
                        child.status = "DELETE_FAILED".to_string();
                    }
                    stack.reason = Some(format!(
                        "The following resource(s) failed to delete: [{}].",
                        stack.failing.join(", ")
                    ));
                }
            }

            if stack.status == DELETE_COMPLETE {
                s.stacks.remove(name);
                return Err(not_found(name));
            }
            Ok(StackSummary {
                name: name.to_string(),
                status: stack.status.clone(),
                reason: stack.reason.clone(),
            })
        })
    }

    async fn create_stack(&self, request: &StackRequest) -> AwsResult<()> {
        let name = request.name.as_str();
        self.call("create_stack", name, |s| {
            if s.stacks.contains_key(name) {
                return Err(AwsError::AlreadyExists {
                    message: format!("stack {name} already exists"),
                });
            }
            let script = s.next_script(name, ["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
            s.stacks.insert(
                name.to_string(),
                FakeStack {
                    status: "CREATE_IN_PROGRESS".to_string(),
                    reason: None,
                    children: Vec::new(),
                    pending: script.statuses.into(),
                    failing: script.failing,
                },
            );
            s.stack_requests.insert(name.to_string(), request.clone());
            Ok(())
        })
    }

    async fn update_stack(&self, request: &StackRequest) -> AwsResult<bool> {
        let name = request.name.as_str();
        self.call("update_stack", name, |s| {
            if !s.stacks.contains_key(name) {
                return Err(not_found(name));
            }
            s.stack_requests.insert(name.to_string(), request.clone());
            if s.no_updates.contains(name) {
                return Ok(false);
            }
            let script = s.next_script(name, ["UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"]);
            if let Some(stack) = s.stacks.get_mut(name) {
                stack.pending = script.statuses.into();
                stack.failing = script.failing;
            }
            Ok(true)
        })
    }

    async fn delete_stack(&self, name: &str, retain: &[String]) -> AwsResult<()> {
        self.call("delete_stack", format!("{name}:{}", retain.join(",")), |s| {
            if !s.stacks.contains_key(name) {
                return Ok(());
            }
            let script = s.next_script(name, ["DELETE_IN_PROGRESS", DELETE_COMPLETE]);
            if let Some(stack) = s.stacks.get_mut(name) {
                for child in stack
                    .children
                    .iter_mut()
                    .filter(|c| retain.contains(&c.logical_id))
                {
                    child.status = "DELETE_SKIPPED".to_string();
                }
                stack.pending = script.statuses.into();
                stack.failing = script.failing;
            }
            Ok(())
        })
    }

    async fn list_stack_resources(&self, name: &str) -> AwsResult<Vec<StackResourceSummary>> {
        self.call("list_stack_resources", name, |s| {
            s.stacks
                .get(name)
                .map(|stack| stack.children.clone())
                .ok_or_else(|| not_found(name))
        })
    }

    async fn list_stacks(&self) -> AwsResult<Vec<StackSummary>> {
        self.call("list_stacks", "", |s| {
            Ok(s.stacks
                .iter()
                .map(|(name, stack)| StackSummary {
                    name: name.clone(),
                    status: stack.status.clone(),
                    reason: stack.reason.clone(),
                })
                .collect())
        })
    }
}

/// Records image tool calls; optionally fails every call of one operation
pub struct RecordingImages {
    log: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingImages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            fail_on: None,
        })
    }

    pub fn failing_on(op: &'static str) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            fail_on: Some(op),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, entry: String) -> Result<(), ImageError> {
        self.log.lock().unwrap().push(format!("{op}:{entry}"));
        if self.fail_on == Some(op) {
            return Err(ImageError::Failed {
                command: format!("docker {op}"),
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageTool for RecordingImages {
    async fn build(&self, context: &Path, image: &str) -> Result<(), ImageError> {
        self.record("build", format!("{image}:{}", context.display()))
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), ImageError> {
        self.record("login", credentials.username.clone())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), ImageError> {
        self.record("tag", format!("{source} {target}"))
    }

    async fn push(&self, image: &str) -> Result<(), ImageError> {
        self.record("push", image.to_string())
    }
}
