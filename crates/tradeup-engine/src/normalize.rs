use chrono::Utc;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use tradeup_core::{
    round_to, AuditEvent, Audited, Opportunity, OpportunityFilter, OpportunityIntake, Payload,
    PositionStatus, TradeError, TradeResult,
};
use tradeup_storage::{sha256_hex, StorageError};
use uuid::Uuid;

use crate::Workflow;

pub const UNTITLED_OPPORTUNITY: &str = "Untitled opportunity";

const REQUIRED_FIELDS_MESSAGE: &str =
    "source, category, location, and positive price are required";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedOpportunity {
    pub source: String,
    pub category: String,
    pub location: String,
    pub title: String,
    pub ask_value: f64,
    pub dedupe_key: String,
    pub payload: Payload,
}

/// Trim, lowercase and collapse runs of whitespace to a single space.
pub fn normalize_field(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Fingerprint over the five identity fields; the title is compared case-insensitively.
pub fn dedupe_key(source: &str, category: &str, location: &str, title: &str, price: f64) -> String {
    let material = format!(
        "{source}|{category}|{location}|{}|{price:.2}",
        title.to_lowercase()
    );
    sha256_hex(material.as_bytes())
}

pub fn normalize_intake(intake: &OpportunityIntake) -> TradeResult<NormalizedOpportunity> {
    let field = |raw: &Option<String>| raw.as_deref().map(normalize_field).unwrap_or_default();
    let source = field(&intake.source);
    let category = field(&intake.category);
    let location = field(&intake.location);
    let price = intake.price.filter(|p| p.is_finite() && *p > 0.0);

    let price = match price {
        Some(price) if !source.is_empty() && !category.is_empty() && !location.is_empty() => price,
        _ => return Err(TradeError::validation(REQUIRED_FIELDS_MESSAGE)),
    };
    let ask_value = round_to(price, 2);

    let title = intake
        .title
        .as_deref()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_OPPORTUNITY.to_string());

    let key = dedupe_key(&source, &category, &location, &title, ask_value);

    let mut payload = intake.attributes.clone();
    payload.insert("source".into(), source.clone().into());
    payload.insert("category".into(), category.clone().into());
    payload.insert("location".into(), location.clone().into());
    payload.insert("title".into(), title.clone().into());
    payload.insert("ask_value".into(), ask_value.into());

    Ok(NormalizedOpportunity {
        source,
        category,
        location,
        title,
        ask_value,
        dedupe_key: key,
        payload,
    })
}

impl Workflow {
    /// Normalize and persist a new opportunity. Fingerprint collisions are
    /// rejected; the existing record is never touched.
    pub async fn ingest_opportunity(
        &self,
        intake: &OpportunityIntake,
        actor_id: &str,
    ) -> TradeResult<Audited<Opportunity>> {
        let normalized = normalize_intake(intake)?;
        let span = info_span!(
            "ingest_opportunity",
            source = %normalized.source,
            dedupe_key = %normalized.dedupe_key
        );
        self.persist_opportunity(normalized, actor_id)
            .instrument(span)
            .await
    }

    async fn persist_opportunity(
        &self,
        normalized: NormalizedOpportunity,
        actor_id: &str,
    ) -> TradeResult<Audited<Opportunity>> {
        if self
            .repo
            .find_opportunity_by_dedupe_key(&normalized.dedupe_key)
            .await?
            .is_some()
        {
            warn!("duplicate opportunity rejected");
            return Err(TradeError::Duplicate {
                entity: "opportunity",
                key: normalized.dedupe_key,
            });
        }

        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            source: normalized.source,
            category: normalized.category,
            location: normalized.location,
            title: normalized.title,
            ask_value: normalized.ask_value,
            normalized_payload: normalized.payload,
            dedupe_key: normalized.dedupe_key,
            status: PositionStatus::Sourcing,
            created_at: Utc::now(),
        };
        let audit = AuditEvent::new("opportunity.created", "opportunity", opportunity.id)
            .by(actor_id)
            .with("dedupe_key", opportunity.dedupe_key.as_str())
            .with("ask_value", opportunity.ask_value);

        let stored = match self
            .repo
            .create_opportunity(opportunity, audit.clone())
            .await
        {
            Ok(stored) => stored,
            Err(err @ StorageError::Duplicate { .. }) => {
                warn!("duplicate opportunity rejected at write");
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        info!(opportunity_id = %stored.id, "opportunity ingested");
        Ok(Audited::new(stored, audit))
    }

    pub async fn get_opportunity(&self, id: Uuid) -> TradeResult<Opportunity> {
        self.repo
            .get_opportunity(id)
            .await?
            .ok_or_else(|| TradeError::not_found("opportunity", id))
    }

    pub async fn list_opportunities(&self, filter: &OpportunityFilter) -> TradeResult<Vec<Opportunity>> {
        let filter = OpportunityFilter {
            source: filter.source.as_deref().map(normalize_field),
            category: filter.category.as_deref().map(normalize_field),
            ..filter.clone()
        };
        Ok(self.repo.list_opportunities(&filter).await?)
    }

    /// Status writes from the sourcing side; the value is recorded as given.
    pub async fn update_opportunity_status(
        &self,
        id: Uuid,
        status: PositionStatus,
        actor_id: &str,
    ) -> TradeResult<Audited<Opportunity>> {
        let current = self.get_opportunity(id).await?;
        let audit = AuditEvent::new("opportunity.status_changed", "opportunity", id)
            .by(actor_id)
            .with("previous_status", current.status.as_str())
            .with("next_status", status.as_str());
        let updated = self
            .repo
            .update_opportunity_status(id, status, audit.clone())
            .await?;
        Ok(Audited::new(updated, audit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeup_core::ErrorKind;

    fn intake(source: &str, title: &str, price: f64) -> OpportunityIntake {
        OpportunityIntake {
            source: Some(source.into()),
            category: Some(" Power   Tools ".into()),
            location: Some("Austin,  TX".into()),
            title: Some(title.into()),
            price: Some(price),
            attributes: Payload::new(),
        }
    }

    #[test]
    fn fields_are_trimmed_lowercased_and_collapsed() {
        let normalized = normalize_intake(&intake("  eBay ", "DeWalt  Drill", 80.456)).unwrap();
        assert_eq!(normalized.source, "ebay");
        assert_eq!(normalized.category, "power tools");
        assert_eq!(normalized.location, "austin, tx");
        assert_eq!(normalized.title, "DeWalt Drill");
        assert_eq!(normalized.ask_value, 80.46);
        assert_eq!(normalized.payload["ask_value"].as_number(), Some(80.46));
        assert_eq!(normalized.payload["source"].as_text(), Some("ebay"));
    }

    #[test]
    fn blank_title_gets_placeholder() {
        let normalized = normalize_intake(&intake("ebay", "   ", 10.0)).unwrap();
        assert_eq!(normalized.title, UNTITLED_OPPORTUNITY);
    }

    #[test]
    fn missing_fields_and_bad_prices_share_one_message() {
        for price in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let err = normalize_intake(&intake("ebay", "Drill", price)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.to_string(), REQUIRED_FIELDS_MESSAGE);
        }
        let mut blank_location = intake("ebay", "Drill", 10.0);
        blank_location.location = Some("  ".into());
        assert_eq!(
            normalize_intake(&blank_location).unwrap_err().to_string(),
            REQUIRED_FIELDS_MESSAGE
        );
        let no_price = OpportunityIntake {
            price: None,
            ..intake("ebay", "Drill", 1.0)
        };
        assert!(normalize_intake(&no_price).is_err());
    }

    #[test]
    fn fingerprint_collides_only_on_identical_identity_fields() {
        let a = normalize_intake(&intake("ebay", "Drill", 80.0)).unwrap();
        let b = normalize_intake(&intake(" EBAY", "drill", 80.001)).unwrap();
        assert_eq!(a.dedupe_key, b.dedupe_key);

        let other_price = normalize_intake(&intake("ebay", "Drill", 80.01)).unwrap();
        let other_source = normalize_intake(&intake("craigslist", "Drill", 80.0)).unwrap();
        let other_title = normalize_intake(&intake("ebay", "Drill Press", 80.0)).unwrap();
        assert_ne!(a.dedupe_key, other_price.dedupe_key);
        assert_ne!(a.dedupe_key, other_source.dedupe_key);
        assert_ne!(a.dedupe_key, other_title.dedupe_key);
        assert_eq!(a.dedupe_key.len(), 64);
    }
}
