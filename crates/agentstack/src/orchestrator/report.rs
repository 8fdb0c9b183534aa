//! Run report and summary display
//!
//! Every resource action taken by a teardown is recorded as a
//! [`ReportEntry`]; the final summary table and the list of unresolved
//! resources are printed from the report alone.

use std::fmt;

use agentstack_common::ResourceKind;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;

use crate::aws::{CleanupOutcome, CleanupResult};

/// Teardown phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownPhase {
    PrimaryBuckets,
    StackBuckets,
    VectorStore,
    Keys,
    Functions,
    Identity,
    Queues,
    MainStack,
    Registry,
    RemainingStacks,
    FinalSweep,
}

impl TeardownPhase {
    pub const ALL: [TeardownPhase; 11] = [
        TeardownPhase::PrimaryBuckets,
        TeardownPhase::StackBuckets,
        TeardownPhase::VectorStore,
        TeardownPhase::Keys,
        TeardownPhase::Functions,
        TeardownPhase::Identity,
        TeardownPhase::Queues,
        TeardownPhase::MainStack,
        TeardownPhase::Registry,
        TeardownPhase::RemainingStacks,
        TeardownPhase::FinalSweep,
    ];

    /// 1-based position in the teardown sequence
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for TeardownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TeardownPhase::PrimaryBuckets => "primary buckets",
            TeardownPhase::StackBuckets => "stack buckets",
            TeardownPhase::VectorStore => "vector store",
            TeardownPhase::Keys => "encryption keys",
            TeardownPhase::Functions => "functions",
            TeardownPhase::Identity => "roles and policies",
            TeardownPhase::Queues => "queues",
            TeardownPhase::MainStack => "main stack",
            TeardownPhase::Registry => "registry",
            TeardownPhase::RemainingStacks => "remaining stacks",
            TeardownPhase::FinalSweep => "final sweep",
        })
    }
}

/// One resource action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub phase: TeardownPhase,
    pub kind: ResourceKind,
    pub name: String,
    pub operation: &'static str,
    pub result: CleanupResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything one teardown did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    pub warnings: Vec<String>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        phase: TeardownPhase,
        kind: ResourceKind,
        name: impl Into<String>,
        operation: &'static str,
        outcome: CleanupOutcome,
    ) {
        self.entries.push(ReportEntry {
            phase,
            kind,
            name: name.into(),
            operation,
            result: outcome.result,
            detail: outcome.detail,
        });
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Resources whose latest entry is still a failure.
    ///
    /// A resource that failed early and was cleaned up by a later phase is
    /// not unresolved.
    pub fn unresolved(&self) -> Vec<&ReportEntry> {
        let mut unresolved: Vec<&ReportEntry> = Vec::new();
        for entry in &self.entries {
            unresolved.retain(|u| !(u.kind == entry.kind && u.name == entry.name));
            if entry.result.is_failure() {
                unresolved.push(entry);
            }
        }
        unresolved
    }

    /// Whether a resource's latest entry is a failure
    pub fn is_unresolved(&self, kind: ResourceKind, name: &str) -> bool {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.name == name)
            .is_some_and(|e| e.result.is_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.unresolved().is_empty()
    }

    pub fn count(&self, result: CleanupResult) -> usize {
        self.entries.iter().filter(|e| e.result == result).count()
    }

    /// Print a summary table of the teardown to stdout
    pub fn print_summary(&self) {
        println!("\n=== Teardown Summary ===\n");

        if self.entries.is_empty() {
            println!("No resources found.");
        } else {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Phase"),
                    Cell::new("Kind"),
                    Cell::new("Resource"),
                    Cell::new("Operation"),
                    Cell::new("Result"),
                    Cell::new("Detail"),
                ]);

            for entry in &self.entries {
                table.add_row(vec![
                    Cell::new(format!("{}. {}", entry.phase.number(), entry.phase)),
                    Cell::new(entry.kind),
                    Cell::new(&entry.name),
                    Cell::new(entry.operation),
                    Cell::new(entry.result),
                    Cell::new(entry.detail.as_deref().unwrap_or("")),
                ]);
            }

            println!("{table}");
        }

        let elapsed = Utc::now() - self.started_at;
        println!(
            "\n{} deleted, {} already gone, {} scheduled, {} skipped in {}s",
            self.count(CleanupResult::Deleted),
            self.count(CleanupResult::AlreadyDeleted),
            self.count(CleanupResult::DeletionScheduled),
            self.count(CleanupResult::Skipped),
            elapsed.num_seconds()
        );

        let unresolved = self.unresolved();
        if !unresolved.is_empty() {
            println!("\nUnresolved resources (manual cleanup required):");
            for entry in unresolved {
                println!(
                    "  - {} {} ({}){}",
                    entry.kind,
                    entry.name,
                    entry.result,
                    entry
                        .detail
                        .as_deref()
                        .map(|d| format!(": {d}"))
                        .unwrap_or_default()
                );
            }
        }

        if !self.warnings.is_empty() {
            println!("\nWarnings:");
            for warning in &self.warnings {
                println!("  - {warning}");
            }
        }
    }
}
