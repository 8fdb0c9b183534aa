//! Teardown sequencing
//!
//! Eleven fixed phases, children before parents and consumers before
//! producers. Every step is best-effort: a failure is recorded in the
//! [`RunReport`] and the run moves on, so teardown can be re-run until the
//! account is clean.

use agentstack_common::{DeploymentIdentity, ResourceKind};
use async_trait::async_trait;
use tracing::{info, warn};

use super::report::{RunReport, TeardownPhase};
use crate::aws::scanner::{DiscoverySource, Inventory, ResourceDescriptor, ResourceScanner};
use crate::aws::sqs::queue_name_from_url;
use crate::aws::{CleanupOutcome, CleanupResult, Cloud, FailureKind, ResourceMutator};
use crate::config::DeploymentConfig;
use crate::lifecycle::{DeleteOutcome, RetainedResourceHandler, StackChild, StackError, StackManager};

/// Deletes the retained children of a failed stack delete and records them
struct RetainedCleanup<'a> {
    mutator: &'a ResourceMutator,
    report: &'a mut RunReport,
    phase: TeardownPhase,
}

#[async_trait]
impl RetainedResourceHandler for RetainedCleanup<'_> {
    async fn handle_retained(&mut self, stack: &str, retained: &[StackChild]) {
        for child in retained {
            match child.descriptor() {
                Some(descriptor) => {
                    info!(
                        stack = %stack,
                        logical_id = %child.logical_id,
                        resource_type = %descriptor.kind,
                        "Deleting retained resource"
                    );
                    let outcome = self.mutator.ensure_deleted(&descriptor).await;
                    self.report.record(
                        self.phase,
                        descriptor.kind,
                        descriptor.name,
                        "delete retained",
                        outcome,
                    );
                }
                None => {
                    warn!(stack = %stack, logical_id = %child.logical_id, resource_type = %child.resource_type, "Retained resource has no individual cleanup");
                    self.report.warn(format!(
                        "{} ({}) retained by stack {stack} must be removed manually",
                        child.logical_id, child.resource_type
                    ));
                }
            }
        }
    }
}

fn stack_failure(error: &StackError) -> CleanupResult {
    match error {
        StackError::Timeout { .. } => CleanupResult::Failed(FailureKind::Retryable),
        StackError::Aws(e) => CleanupResult::failed(e),
        StackError::Failed { .. } | StackError::Unrecoverable { .. } => {
            CleanupResult::Failed(FailureKind::Fatal)
        }
    }
}

/// Runs the teardown phases for one deployment
pub struct Teardown {
    identity: DeploymentIdentity,
    scanner: ResourceScanner,
    mutator: ResourceMutator,
    stacks: StackManager,
}

impl Teardown {
    pub fn new(cloud: Cloud, config: &DeploymentConfig) -> Self {
        Self {
            identity: config.identity.clone(),
            scanner: ResourceScanner::new(cloud.clone(), config.identity.clone()),
            mutator: ResourceMutator::new(cloud.clone(), config.kms_pending_window_days),
            stacks: StackManager::new(cloud.stacks, config.poll, config.max_recovery_cycles),
        }
    }

    /// Run every phase. Always returns a report; failures are entries in it.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new();
        info!(deployment = %self.identity, "Starting teardown");

        let inventory = self.scanner.scan_all().await;
        info!(resources = inventory.len(), "Discovery complete");
        for error in &inventory.errors {
            report.warn(format!("discovery incomplete: {error}"));
        }

        for phase in TeardownPhase::ALL {
            info!(phase = phase.number(), name = %phase, "Teardown phase");
            self.run_phase(phase, &inventory, &mut report).await;
        }

        let unresolved = report.unresolved().len();
        if unresolved == 0 && report.warnings.is_empty() {
            info!(deployment = %self.identity, "Teardown complete");
        } else {
            warn!(
                deployment = %self.identity,
                unresolved,
                warnings = report.warnings.len(),
                "Teardown finished with leftovers"
            );
        }
        report
    }

    async fn run_phase(&self, phase: TeardownPhase, inventory: &Inventory, report: &mut RunReport) {
        let identity = &self.identity;
        match phase {
            TeardownPhase::PrimaryBuckets => {
                for bucket in identity.well_known_buckets() {
                    self.purge(phase, &bucket, report).await;
                }
            }
            TeardownPhase::StackBuckets => {
                for descriptor in inventory.of_kind(ResourceKind::Bucket) {
                    if !report.entries.iter().any(|e| {
                        e.kind == ResourceKind::Bucket && e.name == descriptor.name
                    }) {
                        self.purge(phase, &descriptor.name, report).await;
                    }
                }
            }
            TeardownPhase::VectorStore => {
                // Index before bucket
                for descriptor in inventory.of_kind(ResourceKind::VectorIndex) {
                    self.cleanup(phase, descriptor, "delete", report).await;
                }
                let vector_bucket = identity.vector_bucket();
                for descriptor in inventory.of_kind(ResourceKind::VectorBucket) {
                    self.cleanup(phase, descriptor, "delete", report).await;
                }
                if !inventory.contains(ResourceKind::VectorBucket, &vector_bucket) {
                    let descriptor = ResourceDescriptor::new(
                        ResourceKind::VectorBucket,
                        vector_bucket,
                        DiscoverySource::WellKnown,
                    );
                    self.cleanup(phase, &descriptor, "delete", report).await;
                }
            }
            TeardownPhase::Keys => {
                for descriptor in inventory.of_kind(ResourceKind::Key) {
                    self.cleanup(phase, descriptor, "schedule deletion", report)
                        .await;
                }
            }
            TeardownPhase::Functions => {
                for descriptor in inventory.of_kind(ResourceKind::Function) {
                    self.cleanup(phase, descriptor, "delete", report).await;
                }
            }
            TeardownPhase::Identity => {
                for descriptor in inventory.of_kind(ResourceKind::Role) {
                    self.cleanup(phase, descriptor, "detach and delete", report)
                        .await;
                }
                for descriptor in inventory.of_kind(ResourceKind::Policy) {
                    self.cleanup(phase, descriptor, "detach and delete", report)
                        .await;
                }
            }
            TeardownPhase::Queues => {
                let dlq = identity.dead_letter_queue();
                let mut dlq_seen = false;
                for descriptor in inventory.of_kind(ResourceKind::Queue) {
                    dlq_seen |= queue_name_from_url(&descriptor.name) == dlq;
                    self.cleanup(phase, descriptor, "delete", report).await;
                }
                if !dlq_seen {
                    let descriptor =
                        ResourceDescriptor::new(ResourceKind::Queue, dlq, DiscoverySource::WellKnown);
                    self.cleanup(phase, &descriptor, "delete", report).await;
                }
            }
            TeardownPhase::MainStack => {
                self.delete_stack(phase, identity.stack_name(), report).await;
            }
            TeardownPhase::Registry => {
                let repository = identity.repository();
                for descriptor in inventory.of_kind(ResourceKind::RegistryRepo) {
                    self.cleanup(phase, descriptor, "delete images and repository", report)
                        .await;
                }
                if !inventory.contains(ResourceKind::RegistryRepo, &repository) {
                    let descriptor = ResourceDescriptor::new(
                        ResourceKind::RegistryRepo,
                        repository,
                        DiscoverySource::WellKnown,
                    );
                    self.cleanup(phase, &descriptor, "delete images and repository", report)
                        .await;
                }
            }
            TeardownPhase::RemainingStacks => {
                // Fresh listing: nested stacks may have gone with the parent
                let stacks = match self.scanner.scan_kind(ResourceKind::Stack).await {
                    Ok(stacks) => stacks,
                    Err(e) => {
                        warn!(error = %e, "Failed to list remaining stacks");
                        report.warn(format!("could not list remaining stacks: {e}"));
                        return;
                    }
                };
                for descriptor in stacks {
                    if descriptor.name == identity.stack_name() {
                        continue;
                    }
                    self.delete_stack(phase, &descriptor.name, report).await;
                }
            }
            TeardownPhase::FinalSweep => {
                let mut buckets = identity.well_known_buckets();
                for entry in report.unresolved() {
                    if entry.kind == ResourceKind::Bucket && !buckets.contains(&entry.name) {
                        buckets.push(entry.name.clone());
                    }
                }
                for bucket in buckets {
                    self.purge(phase, &bucket, report).await;
                }
            }
        }
    }

    async fn purge(&self, phase: TeardownPhase, bucket: &str, report: &mut RunReport) {
        let result = self.mutator.purger().purge(bucket).await;
        report.record(
            phase,
            ResourceKind::Bucket,
            bucket,
            "purge",
            CleanupOutcome {
                result: result.result,
                detail: result.detail,
            },
        );
    }

    async fn cleanup(
        &self,
        phase: TeardownPhase,
        descriptor: &ResourceDescriptor,
        operation: &'static str,
        report: &mut RunReport,
    ) {
        let outcome = self.mutator.ensure_deleted(descriptor).await;
        report.record(phase, descriptor.kind, descriptor.name.clone(), operation, outcome);
    }

    async fn delete_stack(&self, phase: TeardownPhase, name: &str, report: &mut RunReport) {
        let mut handler = RetainedCleanup {
            mutator: &self.mutator,
            report: &mut *report,
            phase,
        };
        let result = self.stacks.delete(name, Some(&mut handler)).await;

        let outcome = match result {
            Ok(DeleteOutcome::AlreadyAbsent) => CleanupOutcome::new(CleanupResult::AlreadyDeleted),
            Ok(DeleteOutcome::Deleted {
                recovery_cycles,
                retained,
            }) => {
                if retained.is_empty() {
                    CleanupOutcome::new(CleanupResult::Deleted)
                } else {
                    CleanupOutcome::with_detail(
                        CleanupResult::Deleted,
                        format!(
                            "retained {} after {recovery_cycles} recovery cycle(s)",
                            retained.join(", ")
                        ),
                    )
                }
            }
            Ok(DeleteOutcome::Incomplete {
                status,
                reason,
                remaining,
                ..
            }) => {
                let failed: Vec<&str> = remaining.iter().map(|c| c.logical_id.as_str()).collect();
                report.warn(format!(
                    "stack {name} still {status} ({}); manual cleanup required",
                    failed.join(", ")
                ));
                CleanupOutcome::with_detail(
                    CleanupResult::Failed(FailureKind::Retryable),
                    reason.unwrap_or(status),
                )
            }
            Err(e) => {
                warn!(stack = %name, error = %e, "Stack delete did not finish");
                report.warn(format!("stack {name}: {e}; manual cleanup required"));
                CleanupOutcome::with_detail(stack_failure(&e), e.to_string())
            }
        };

        report.record(phase, ResourceKind::Stack, name, "delete stack", outcome);
    }
}
