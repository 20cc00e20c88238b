use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tradeup_core::{
    AuditEvent, Audited, ChecklistChecks, ChecklistOutcome, Item, Lifecycle, Payload,
    PortfolioPosition, PositionStatus, TradeError, TradeResult, VerificationChecklist,
};
use tradeup_storage::{PositionHolding, StatusUpdate};
use uuid::Uuid;

use crate::Workflow;

pub const UNTITLED_ITEM: &str = "Untitled item";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPosition {
    pub title: String,
    pub acquisition_value: f64,
    /// Starting estimate for the item; defaults to the acquisition value.
    #[serde(default)]
    pub estimated_value: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChecklistSubmission {
    pub checks: Payload,
    #[serde(default)]
    pub disputed: bool,
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistRun {
    pub checklist: VerificationChecklist,
    pub position: PortfolioPosition,
}

fn transition_audit(
    position_id: Uuid,
    from: PositionStatus,
    to: PositionStatus,
    actor_id: &str,
) -> AuditEvent {
    AuditEvent::new("position.status_changed", "portfolio_position", position_id)
        .by(actor_id)
        .with("previous_status", from.as_str())
        .with("next_status", to.as_str())
}

impl Workflow {
    /// Open a position in `seeded` together with the item backing it.
    pub async fn open_position(
        &self,
        input: NewPosition,
        actor_id: &str,
    ) -> TradeResult<Audited<PortfolioPosition>> {
        if !(input.acquisition_value.is_finite() && input.acquisition_value >= 0.0) {
            return Err(TradeError::validation(
                "acquisition value must be a non-negative number",
            ));
        }
        let estimated_value = input.estimated_value.unwrap_or(input.acquisition_value);
        if !(estimated_value.is_finite() && estimated_value >= 0.0) {
            return Err(TradeError::validation(
                "estimated value must be a non-negative number",
            ));
        }
        let title = input.title.trim();
        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            title: if title.is_empty() {
                UNTITLED_ITEM.to_string()
            } else {
                title.to_string()
            },
            estimated_value,
            created_at: now,
        };
        let position = PortfolioPosition {
            id: Uuid::new_v4(),
            item_id: item.id,
            acquisition_value: input.acquisition_value,
            status: PositionStatus::Seeded,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEvent::new("position.created", "portfolio_position", position.id)
            .by(actor_id)
            .with("item_id", item.id.to_string())
            .with("acquisition_value", position.acquisition_value)
            .with("status", PositionStatus::Seeded.as_str());
        let stored = self.repo.create_position(item, position, audit.clone()).await?;
        info!(position_id = %stored.id, "position opened");
        Ok(Audited::new(stored, audit))
    }

    pub async fn get_position(&self, id: Uuid) -> TradeResult<PortfolioPosition> {
        self.repo
            .get_position(id)
            .await?
            .ok_or_else(|| TradeError::not_found("portfolio position", id))
    }

    pub async fn list_positions(&self) -> TradeResult<Vec<PositionHolding>> {
        Ok(self.repo.list_positions().await?)
    }

    pub async fn transition_position(
        &self,
        position_id: Uuid,
        next: PositionStatus,
        actor_id: &str,
    ) -> TradeResult<Audited<PortfolioPosition>> {
        let position = self.get_position(position_id).await?;
        position.status.check_transition(next)?;

        let audit = transition_audit(position_id, position.status, next, actor_id);
        let updated = self
            .repo
            .update_position_status(
                StatusUpdate {
                    id: position_id,
                    expected: position.status,
                    next,
                },
                audit.clone(),
            )
            .await?;
        info!(%position_id, from = %position.status, to = %next, actor_id, "position transitioned");
        Ok(Audited::new(updated, audit))
    }

    /// Record a verification checklist and move the position to the outcome
    /// status in one write. Only valid in `accepted_pending_verification`.
    pub async fn run_checklist(
        &self,
        position_id: Uuid,
        submission: ChecklistSubmission,
    ) -> TradeResult<Audited<ChecklistRun>> {
        let checks = ChecklistChecks::from_payload(&submission.checks)?;
        let reviewer_id = submission.reviewer_id.trim().to_string();
        if reviewer_id.is_empty() {
            return Err(TradeError::validation("reviewer id is required"));
        }

        let position = self.get_position(position_id).await?;
        if position.status != PositionStatus::AcceptedPendingVerification {
            warn!(%position_id, status = %position.status, "checklist refused");
            return Err(TradeError::Conflict(format!(
                "verification checklist requires status {}, found {}",
                PositionStatus::AcceptedPendingVerification,
                position.status
            )));
        }

        let passed = checks.passed();
        let outcome = ChecklistOutcome::route(passed, submission.disputed);
        let next = outcome.position_status();
        position.status.check_transition(next)?;

        let checklist = VerificationChecklist {
            id: Uuid::new_v4(),
            position_id,
            checks,
            passed,
            outcome,
            reviewer_id: reviewer_id.clone(),
            notes: submission.notes.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
        };
        let recorded = AuditEvent::new("checklist.recorded", "portfolio_position", position_id)
            .by(reviewer_id.as_str())
            .with("checklist_id", checklist.id.to_string())
            .with("passed", passed)
            .with("disputed", submission.disputed);
        let transitioned = transition_audit(position_id, position.status, next, &reviewer_id);

        let (checklist, position) = self
            .repo
            .record_checklist(
                checklist,
                StatusUpdate {
                    id: position_id,
                    expected: PositionStatus::AcceptedPendingVerification,
                    next,
                },
                vec![recorded, transitioned.clone()],
            )
            .await?;
        info!(%position_id, passed, status = %position.status, "checklist recorded");
        Ok(Audited::new(ChecklistRun { checklist, position }, transitioned))
    }

    pub async fn list_checklists(&self, position_id: Uuid) -> TradeResult<Vec<VerificationChecklist>> {
        Ok(self.repo.list_checklists(position_id).await?)
    }
}
