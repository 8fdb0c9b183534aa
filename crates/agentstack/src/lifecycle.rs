//! Stack lifecycle state machine
//!
//! ```text
//! ABSENT --create--> IN_PROGRESS --poll--> COMPLETE | FAILED
//! COMPLETE --delete--> IN_PROGRESS --poll--> ABSENT | DELETE_FAILED
//! DELETE_FAILED --delete retaining R--> IN_PROGRESS --poll--> ABSENT | DELETE_FAILED
//! ```
//!
//! Deploys fail fast. Deletes recover from `DELETE_FAILED` by handing the
//! failed children to a [`RetainedResourceHandler`] and retrying while
//! retaining exactly those children, for a bounded number of cycles.

use std::fmt;
use std::sync::Arc;

use agentstack_common::ResourceKind;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aws::cloudformation::{StackOperations, StackRequest};
use crate::aws::scanner::{DiscoverySource, ResourceDescriptor};
use crate::aws::{AwsError, AwsResult};
use crate::wait::{PollConfig, WaitError, await_terminal};

const UPDATE_ROLLBACK_COMPLETE: &str = "UPDATE_ROLLBACK_COMPLETE";

/// Coarse stack state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Absent,
    InProgress,
    Complete,
    Failed,
    DeleteFailed,
}

impl StackState {
    /// Map a raw CloudFormation status.
    pub fn from_status(status: &str) -> Self {
        match status {
            "DELETE_COMPLETE" => StackState::Absent,
            "DELETE_FAILED" => StackState::DeleteFailed,
            s if s.ends_with("_IN_PROGRESS") => StackState::InProgress,
            "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => StackState::Complete,
            // *_ROLLBACK_COMPLETE, *_FAILED and anything new
            _ => StackState::Failed,
        }
    }

    pub fn is_settled(self) -> bool {
        self != StackState::InProgress
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackState::Absent => "ABSENT",
            StackState::InProgress => "IN_PROGRESS",
            StackState::Complete => "COMPLETE",
            StackState::Failed => "FAILED",
            StackState::DeleteFailed => "DELETE_FAILED",
        })
    }
}

/// A stack's state at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub name: String,
    pub state: StackState,
    pub raw_status: String,
    pub reason: Option<String>,
}

impl StackSnapshot {
    fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StackState::Absent,
            raw_status: "DELETE_COMPLETE".to_string(),
            reason: None,
        }
    }
}

/// One resource inside a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackChild {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

impl StackChild {
    pub fn is_failed(&self) -> bool {
        self.status.ends_with("_FAILED")
    }

    /// The child as a cleanup target, when its type is managed individually
    pub fn descriptor(&self) -> Option<ResourceDescriptor> {
        let kind = ResourceKind::from_stack_type(&self.resource_type)?;
        let id = self.physical_id.as_deref()?;
        Some(ResourceDescriptor::new(kind, id, DiscoverySource::StackChild))
    }
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("stack {stack} ended in {status}{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Failed {
        stack: String,
        status: String,
        reason: Option<String>,
    },

    #[error("stack {stack} is in {status} and cannot be updated; tear it down first")]
    Unrecoverable { stack: String, status: String },

    #[error("stack {stack} did not settle after {attempts} status checks")]
    Timeout { stack: String, attempts: u32 },

    #[error(transparent)]
    Aws(#[from] AwsError),
}

impl From<WaitError> for StackError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Exhausted { resource, attempts } => StackError::Timeout {
                stack: resource,
                attempts,
            },
            WaitError::Check { source, .. } => StackError::Aws(source),
        }
    }
}

/// How a delete request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Nothing to delete
    AlreadyAbsent,
    /// The stack record is gone
    Deleted {
        recovery_cycles: u32,
        /// Logical ids left behind for individual cleanup
        retained: Vec<String>,
    },
    /// Recovery stopped with the stack still present
    Incomplete {
        status: String,
        reason: Option<String>,
        retained: Vec<String>,
        remaining: Vec<StackChild>,
    },
}

/// Receives the children a delete is about to retain.
///
/// Called before every retained-resource retry; the children stay in the
/// account once the stack record is gone, so the handler owns them from here.
#[async_trait]
pub trait RetainedResourceHandler: Send {
    async fn handle_retained(&mut self, stack: &str, retained: &[StackChild]);
}

/// Drives one stack through create, update and delete.
#[derive(Clone)]
pub struct StackManager {
    stacks: Arc<dyn StackOperations>,
    poll: PollConfig,
    max_recovery_cycles: u32,
}

impl StackManager {
    pub fn new(stacks: Arc<dyn StackOperations>, poll: PollConfig, max_recovery_cycles: u32) -> Self {
        Self {
            stacks,
            poll,
            max_recovery_cycles,
        }
    }

    /// Current state; a missing stack is `Absent`.
    pub async fn describe(&self, name: &str) -> AwsResult<StackSnapshot> {
        match self.stacks.describe_stack(name).await {
            Ok(summary) => Ok(StackSnapshot {
                state: StackState::from_status(&summary.status),
                name: summary.name,
                raw_status: summary.status,
                reason: summary.reason,
            }),
            Err(e) if e.is_not_found() => Ok(StackSnapshot::absent(name)),
            Err(e) => Err(e),
        }
    }

    /// Children whose individual status is failed
    pub async fn failed_children(&self, name: &str) -> AwsResult<Vec<StackChild>> {
        let resources = self.stacks.list_stack_resources(name).await?;
        Ok(resources
            .into_iter()
            .map(|r| StackChild {
                logical_id: r.logical_id,
                physical_id: r.physical_id,
                resource_type: r.resource_type,
                status: r.status,
                reason: r.reason,
            })
            .filter(StackChild::is_failed)
            .collect())
    }

    async fn wait_until(
        &self,
        name: &str,
        settled: fn(StackState) -> bool,
    ) -> Result<StackSnapshot, StackError> {
        let snapshot = await_terminal(
            &self.poll,
            name,
            || self.describe(name),
            |s: &StackSnapshot| settled(s.state),
        )
        .await?;
        debug!(stack = %name, status = %snapshot.raw_status, "Stack settled");
        Ok(snapshot)
    }

    /// Create the stack or update it in place, then wait for the result.
    ///
    /// An in-progress stack is waited out first. A stack that failed its
    /// initial create cannot be updated and is returned as `Unrecoverable`.
    pub async fn deploy(&self, request: &StackRequest) -> Result<StackSnapshot, StackError> {
        let name = request.name.as_str();
        let mut current = self.describe(name).await?;

        if current.state == StackState::InProgress {
            info!(stack = %name, status = %current.raw_status, "Stack busy, waiting before deploy");
            current = self.wait_until(name, StackState::is_settled).await?;
        }

        match current.state {
            StackState::Absent => {
                info!(stack = %name, "Creating stack");
                self.stacks.create_stack(request).await?;
            }
            StackState::Complete => {
                info!(stack = %name, "Updating stack");
                if !self.stacks.update_stack(request).await? {
                    info!(stack = %name, "Stack already up to date");
                    return Ok(current);
                }
            }
            StackState::Failed if current.raw_status == UPDATE_ROLLBACK_COMPLETE => {
                info!(stack = %name, "Updating stack after rolled-back update");
                if !self.stacks.update_stack(request).await? {
                    warn!(
                        stack = %name,
                        status = %current.raw_status,
                        "No changes to apply, stack stays in its rolled-back state"
                    );
                    return Ok(current);
                }
            }
            _ => {
                return Err(StackError::Unrecoverable {
                    stack: name.to_string(),
                    status: current.raw_status,
                });
            }
        }

        // A fresh stack can briefly describe as missing
        let settled = self
            .wait_until(name, |s| s.is_settled() && s != StackState::Absent)
            .await?;

        if settled.state == StackState::Complete {
            info!(stack = %name, status = %settled.raw_status, "Stack deployed");
            Ok(settled)
        } else {
            Err(StackError::Failed {
                stack: name.to_string(),
                status: settled.raw_status,
                reason: settled.reason,
            })
        }
    }

    /// Delete the stack, recovering from `DELETE_FAILED` by retaining the
    /// failed children.
    ///
    /// Each recovery cycle lists the currently failed children, passes them
    /// to `handler`, and retries the delete retaining exactly that set. The
    /// loop stops after `max_recovery_cycles` or when a cycle fails on the
    /// same set as the one before, and reports `Incomplete`.
    pub async fn delete(
        &self,
        name: &str,
        mut handler: Option<&mut dyn RetainedResourceHandler>,
    ) -> Result<DeleteOutcome, StackError> {
        let mut snapshot = self.describe(name).await?;

        if snapshot.state == StackState::Absent {
            debug!(stack = %name, "Stack already absent");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        if snapshot.state == StackState::InProgress {
            info!(stack = %name, status = %snapshot.raw_status, "Stack busy, waiting before delete");
            snapshot = self.wait_until(name, StackState::is_settled).await?;
            if snapshot.state == StackState::Absent {
                return Ok(DeleteOutcome::Deleted {
                    recovery_cycles: 0,
                    retained: Vec::new(),
                });
            }
        }

        // A stack already in DELETE_FAILED goes straight to recovery
        if snapshot.state != StackState::DeleteFailed {
            info!(stack = %name, status = %snapshot.raw_status, "Deleting stack");
            match self.stacks.delete_stack(name, &[]).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(DeleteOutcome::AlreadyAbsent),
                Err(e) => return Err(e.into()),
            }
            snapshot = self.wait_until(name, StackState::is_settled).await?;
        }

        let mut cycles = 0;
        let mut retained: Vec<String> = Vec::new();
        let mut previous: Option<Vec<String>> = None;

        loop {
            match snapshot.state {
                StackState::Absent => {
                    info!(stack = %name, recovery_cycles = cycles, "Stack deleted");
                    return Ok(DeleteOutcome::Deleted {
                        recovery_cycles: cycles,
                        retained,
                    });
                }
                StackState::DeleteFailed => {}
                _ => {
                    return Err(StackError::Failed {
                        stack: name.to_string(),
                        status: snapshot.raw_status,
                        reason: snapshot.reason,
                    });
                }
            }

            let failed = self.failed_children(name).await?;
            let mut failed_ids: Vec<String> = failed.iter().map(|c| c.logical_id.clone()).collect();
            failed_ids.sort();

            let no_progress = previous.as_ref() == Some(&failed_ids);
            if cycles >= self.max_recovery_cycles || no_progress {
                warn!(
                    stack = %name,
                    cycles,
                    failed = ?failed_ids,
                    reason = snapshot.reason.as_deref().unwrap_or_default(),
                    "Stack delete still failing, manual cleanup required"
                );
                return Ok(DeleteOutcome::Incomplete {
                    status: snapshot.raw_status,
                    reason: snapshot.reason,
                    retained,
                    remaining: failed,
                });
            }

            if let Some(handler) = handler.as_deref_mut() {
                handler.handle_retained(name, &failed).await;
            }

            cycles += 1;
            info!(
                stack = %name,
                cycle = cycles,
                retain = ?failed_ids,
                "Retrying stack delete, retaining failed resources"
            );
            match self.stacks.delete_stack(name, &failed_ids).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    return Ok(DeleteOutcome::Deleted {
                        recovery_cycles: cycles,
                        retained,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            retained.extend(failed_ids.iter().cloned());
            previous = Some(failed_ids);
            snapshot = self.wait_until(name, StackState::is_settled).await?;
        }
    }
}
