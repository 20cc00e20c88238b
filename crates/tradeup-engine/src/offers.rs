use chrono::Utc;
use tracing::info;
use tradeup_core::{
    AuditEvent, Audited, Lifecycle, Offer, OfferStatus, Payload, TradeError, TradeResult,
};
use tradeup_storage::StatusUpdate;
use uuid::Uuid;

use crate::Workflow;

/// Policy action checked before an offer leaves for the marketplace.
pub const OFFER_SEND_ACTION: &str = "send_offer";

impl Workflow {
    pub async fn create_offer(
        &self,
        opportunity_id: Uuid,
        terms: Payload,
        actor_id: &str,
    ) -> TradeResult<Audited<Offer>> {
        self.get_opportunity(opportunity_id).await?;
        let now = Utc::now();
        let offer = Offer {
            id: Uuid::new_v4(),
            opportunity_id,
            terms,
            status: OfferStatus::Draft,
            sent_by: None,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEvent::new("offer.created", "offer", offer.id)
            .by(actor_id)
            .with("opportunity_id", opportunity_id.to_string())
            .with("status", OfferStatus::Draft.as_str());
        let stored = self.repo.create_offer(offer, audit.clone()).await?;
        info!(offer_id = %stored.id, %opportunity_id, "offer drafted");
        Ok(Audited::new(stored, audit))
    }

    pub async fn get_offer(&self, id: Uuid) -> TradeResult<Offer> {
        self.repo
            .get_offer(id)
            .await?
            .ok_or_else(|| TradeError::not_found("offer", id))
    }

    pub async fn list_offers(&self) -> TradeResult<Vec<Offer>> {
        Ok(self.repo.list_offers().await?)
    }

    /// Move an offer along its transition table. Sending is gated by the
    /// policy guard for the opportunity's marketplace and records the sender.
    pub async fn transition_offer(
        &self,
        offer_id: Uuid,
        next: OfferStatus,
        actor_id: &str,
    ) -> TradeResult<Audited<Offer>> {
        let offer = self.get_offer(offer_id).await?;
        offer.status.check_transition(next)?;

        if next == OfferStatus::Sent {
            let opportunity = self.get_opportunity(offer.opportunity_id).await?;
            let decision = self
                .evaluate_policy(&opportunity.source, OFFER_SEND_ACTION, actor_id)
                .await?
                .into_inner();
            if !decision.allowed {
                return Err(TradeError::PolicyDenied {
                    code: decision.policy_code,
                    reason: decision.reason,
                });
            }
        }

        let audit = AuditEvent::new("offer.status_changed", "offer", offer_id)
            .by(actor_id)
            .with("previous_status", offer.status.as_str())
            .with("next_status", next.as_str());
        let sent_by = (next == OfferStatus::Sent).then(|| actor_id.to_string());
        let updated = self
            .repo
            .update_offer_status(
                StatusUpdate {
                    id: offer_id,
                    expected: offer.status,
                    next,
                },
                sent_by,
                audit.clone(),
            )
            .await?;
        info!(%offer_id, from = %offer.status, to = %next, actor_id, "offer transitioned");
        Ok(Audited::new(updated, audit))
    }
}
