use crate::backend::contracts::ListingAdmin;
use crate::error::Result;
use crate::ids::ListingId;

/// What happened to one entity kind during a purge.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Deleted(u64),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CascadeStep {
    pub entity: &'static str,
    pub outcome: StepOutcome,
}

/// Outcome of purging one listing and its chat data.
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub listing_id: ListingId,
    pub steps: Vec<CascadeStep>,
}

impl CascadeReport {
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|step| matches!(step.outcome, StepOutcome::Deleted(_)))
    }

    pub fn failed_steps(&self) -> Vec<&CascadeStep> {
        self.steps
            .iter()
            .filter(|step| matches!(step.outcome, StepOutcome::Failed(_)))
            .collect()
    }
}

/// Delete a listing together with every conversation hanging off it.
///
/// Children go first so a crash mid-way never leaves a conversation whose
/// messages are gone. Each step is attempted even when an earlier one
/// failed: a partially purged listing is still closer to gone, and the
/// report says exactly what remains. Orphaned threads left by a partial
/// run are filtered out of user-facing lists by the summary validity
/// check, so the worst case is invisible residue, not a broken screen.
pub async fn purge_listing(backend: &dyn ListingAdmin, listing_id: ListingId) -> CascadeReport {
    tracing::info!("purging listing {} and its conversations", listing_id);
    let mut steps = Vec::with_capacity(5);

    steps.push(run_step("read_receipts", backend.delete_receipts_for_listing(listing_id).await));
    steps.push(run_step("unread_counters", backend.delete_counters_for_listing(listing_id).await));
    steps.push(run_step("messages", backend.delete_messages_for_listing(listing_id).await));
    steps.push(run_step(
        "conversations",
        backend.delete_conversations_for_listing(listing_id).await,
    ));
    steps.push(run_step(
        "listing",
        backend.delete_listing(listing_id).await.map(|_| 1),
    ));

    let report = CascadeReport { listing_id, steps };
    if report.is_clean() {
        tracing::info!("listing {} purged", listing_id);
    } else {
        tracing::error!(
            "listing {} purge left {} failed step(s)",
            listing_id,
            report.failed_steps().len()
        );
    }
    report
}

fn run_step(entity: &'static str, result: Result<u64>) -> CascadeStep {
    let outcome = match result {
        Ok(rows) => {
            tracing::debug!("deleted {} {} row(s)", rows, entity);
            StepOutcome::Deleted(rows)
        }
        Err(e) => {
            tracing::error!("failed to delete {}: {}", entity, e);
            StepOutcome::Failed(e.to_string())
        }
    };
    CascadeStep { entity, outcome }
}
