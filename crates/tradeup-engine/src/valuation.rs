use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use tradeup_core::{round_to, AuditEvent, Audited, TradeError, TradeResult, Valuation};
use uuid::Uuid;

use crate::Workflow;

pub const MODEL_VERSION: &str = "rules-v1";

const BASE_WEIGHT: f64 = 0.35;
const COMPS_WEIGHT: f64 = 0.65;

/// A comparable sale. Entries without a positive finite price are ignored.
/// Deserializes from a bare price or from `{"priceUsd": .., "source": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CompEntry")]
pub struct Comp {
    pub price_usd: Option<f64>,
    pub source: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CompEntry {
    Price(f64),
    Detailed {
        #[serde(default, alias = "priceUsd")]
        price_usd: Option<f64>,
        #[serde(default)]
        source: Option<String>,
    },
}

impl From<CompEntry> for Comp {
    fn from(entry: CompEntry) -> Self {
        match entry {
            CompEntry::Price(price_usd) => Self::priced(price_usd),
            CompEntry::Detailed { price_usd, source } => Self { price_usd, source },
        }
    }
}

impl Comp {
    pub fn priced(price_usd: f64) -> Self {
        Self {
            price_usd: Some(price_usd),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationInput {
    #[serde(default, alias = "baseValue")]
    pub base_value: Option<f64>,
    #[serde(default)]
    pub comps: Vec<Comp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationEstimate {
    pub estimated_value: f64,
    pub confidence: f64,
    pub model_version: String,
    pub comps: Vec<f64>,
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Population standard deviation over mean; zero below two comps.
fn dispersion(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

pub fn estimate_value(input: &ValuationInput) -> TradeResult<ValuationEstimate> {
    let comps = input
        .comps
        .iter()
        .filter_map(|c| c.price_usd.and_then(positive))
        .collect::<Vec<_>>();
    let base = input.base_value.and_then(positive);

    let estimate = match (base, median(&comps)) {
        (Some(base), Some(median)) => BASE_WEIGHT * base + COMPS_WEIGHT * median,
        (Some(base), None) => base,
        (None, Some(median)) => median,
        (None, None) => {
            return Err(TradeError::validation(
                "valuation requires a positive base value or at least one priced comp",
            ))
        }
    };

    let has_base = if base.is_some() { 1.0 } else { 0.0 };
    let confidence = 0.45 + 0.05 * comps.len().min(10) as f64 + 0.05 * has_base
        - 0.35 * dispersion(&comps);

    Ok(ValuationEstimate {
        estimated_value: round_to(estimate, 2),
        confidence: round_to(confidence.clamp(0.1, 0.95), 2),
        model_version: MODEL_VERSION.to_string(),
        comps,
    })
}

impl Workflow {
    /// Estimate and record a new valuation version; the item's estimate follows it.
    pub async fn value_item(
        &self,
        item_id: Uuid,
        input: &ValuationInput,
        actor_id: &str,
    ) -> TradeResult<Audited<Valuation>> {
        let estimate = estimate_value(input)?;
        if self.repo.get_item(item_id).await?.is_none() {
            return Err(TradeError::not_found("item", item_id));
        }

        let valuation = Valuation {
            id: Uuid::new_v4(),
            item_id,
            estimated_value: estimate.estimated_value,
            confidence: estimate.confidence,
            model_version: estimate.model_version,
            comps: estimate.comps,
            created_at: Utc::now(),
        };
        let audit = AuditEvent::new("valuation.recorded", "item", item_id)
            .by(actor_id)
            .with("valuation_id", valuation.id.to_string())
            .with("estimated_value", valuation.estimated_value)
            .with("confidence", valuation.confidence)
            .with("model_version", MODEL_VERSION);
        let stored = self.repo.record_valuation(valuation, audit.clone()).await?;
        info!(
            item_id = %item_id,
            estimated_value = stored.estimated_value,
            confidence = stored.confidence,
            "valuation recorded"
        );
        Ok(Audited::new(stored, audit))
    }

    pub async fn list_valuations(&self, item_id: Uuid) -> TradeResult<Vec<Valuation>> {
        Ok(self.repo.list_valuations(item_id).await?)
    }
}
