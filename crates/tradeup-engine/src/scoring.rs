use chrono::{DateTime, Utc};
use tracing::{debug, info};
use tradeup_core::{
    round_to, RankedCandidate, ScoreBreakdown, ScoringCandidate, TradeError, TradeResult,
};

use crate::normalize::normalize_field;
use crate::Workflow;

pub const MAX_RANK_LIMIT: usize = 50;

/// How many stored candidates are pulled before ranking.
const CANDIDATE_POOL: usize = 500;

pub const CATEGORY_LIQUIDITY: &[(&str, f64)] = &[
    ("electronics", 0.72),
    ("tools", 0.70),
    ("collectibles", 0.58),
    ("furniture", 0.42),
    ("vehicles", 0.45),
];
pub const DEFAULT_LIQUIDITY: f64 = 0.5;

pub const SOURCE_STORY_VALUE: &[(&str, f64)] = &[
    ("craigslist", 0.62),
    ("offerup", 0.55),
    ("ebay", 0.50),
    ("etsy", 0.46),
];
pub const DEFAULT_STORY_VALUE: f64 = 0.5;

const DEFAULT_SELLER_REPUTATION: f64 = 2.5;
const CRAIGSLIST_FRAUD_PENALTY: f64 = 0.1;
const UNKNOWN_EXPIRY_TIME_COST: f64 = 0.4;
const EXPIRY_HORIZON_DAYS: f64 = 10.0;

fn lookup(table: &[(&str, f64)], key: &str, default: f64) -> f64 {
    let key = normalize_field(key);
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
        .unwrap_or(default)
}

/// Cost of a closing deadline: sooner expiry costs more, anything past the
/// horizon costs nothing.
pub fn time_cost(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match expires_at {
        None => UNKNOWN_EXPIRY_TIME_COST,
        Some(expires_at) => {
            let days = (expires_at - now).num_milliseconds() as f64 / 86_400_000.0;
            (1.0 - (days / EXPIRY_HORIZON_DAYS).clamp(0.0, 1.0)).clamp(0.0, 1.0)
        }
    }
}

pub fn score_breakdown(
    current_value: f64,
    candidate: &ScoringCandidate,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let close_prob = (candidate.seller_reputation.unwrap_or(DEFAULT_SELLER_REPUTATION) / 5.0)
        .clamp(0.0, 1.0);
    let craigslist_penalty = if normalize_field(&candidate.source) == "craigslist" {
        CRAIGSLIST_FRAUD_PENALTY
    } else {
        0.0
    };
    ScoreBreakdown {
        value_gain: (candidate.target_value - current_value) / current_value,
        close_prob,
        liquidity: lookup(CATEGORY_LIQUIDITY, &candidate.category, DEFAULT_LIQUIDITY),
        story_value: lookup(SOURCE_STORY_VALUE, &candidate.source, DEFAULT_STORY_VALUE),
        fraud_risk: (1.0 - close_prob + craigslist_penalty).clamp(0.0, 1.0),
        time_cost: time_cost(candidate.expires_at, now),
    }
}

pub fn trade_score(b: &ScoreBreakdown) -> f64 {
    let score = 0.35 * b.value_gain + 0.20 * b.close_prob + 0.15 * b.liquidity
        + 0.10 * b.story_value
        - 0.10 * b.fraud_risk
        - 0.10 * b.time_cost;
    round_to(score, 4)
}

/// Score every candidate against the value currently held and keep the best
/// `limit` (clamped to 1..=50), highest score first.
pub fn rank_candidates(
    current_value: f64,
    candidates: Vec<ScoringCandidate>,
    limit: usize,
    now: DateTime<Utc>,
) -> TradeResult<Vec<RankedCandidate>> {
    if !(current_value.is_finite() && current_value > 0.0) {
        return Err(TradeError::validation("current value must be a positive number"));
    }
    let mut ranked = candidates
        .into_iter()
        .map(|candidate| {
            let breakdown = score_breakdown(current_value, &candidate, now);
            RankedCandidate {
                trade_score: trade_score(&breakdown),
                breakdown,
                candidate,
            }
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.trade_score.total_cmp(&a.trade_score));
    ranked.truncate(limit.clamp(1, MAX_RANK_LIMIT));
    Ok(ranked)
}

impl Workflow {
    /// Rank stored sourcing/screened opportunities as next trades for an item
    /// currently worth `current_value`.
    pub async fn rank_opportunities(
        &self,
        current_value: f64,
        limit: usize,
    ) -> TradeResult<Vec<RankedCandidate>> {
        let candidates = self.repo.list_scoring_candidates(CANDIDATE_POOL).await?;
        debug!(candidates = candidates.len(), "scoring candidates loaded");
        let ranked = rank_candidates(current_value, candidates, limit, Utc::now())?;
        info!(
            current_value,
            returned = ranked.len(),
            top_score = ranked.first().map(|r| r.trade_score),
            "opportunities ranked"
        );
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn candidate(target: f64, source: &str, category: &str) -> ScoringCandidate {
        ScoringCandidate {
            opportunity_id: Uuid::new_v4(),
            target_value: target,
            source: source.into(),
            category: category.into(),
            seller_reputation: None,
            expires_at: None,
        }
    }

    #[test]
    fn weighted_score_matches_reference_breakdown() {
        let breakdown = ScoreBreakdown {
            value_gain: 0.5,
            close_prob: 0.8,
            liquidity: 0.7,
            story_value: 0.6,
            fraud_risk: 0.2,
            time_cost: 0.4,
        };
        assert_eq!(trade_score(&breakdown), 0.44);
    }

    #[test]
    fn components_use_lookup_tables_and_defaults() {
        let now = Utc::now();
        let b = score_breakdown(100.0, &candidate(150.0, "Craigslist", "tools"), now);
        assert_eq!(b.value_gain, 0.5);
        assert_eq!(b.close_prob, 0.5);
        assert_eq!(b.liquidity, 0.70);
        assert_eq!(b.story_value, 0.62);
        assert!((b.fraud_risk - 0.6).abs() < 1e-9);
        assert_eq!(b.time_cost, UNKNOWN_EXPIRY_TIME_COST);

        let unknown = score_breakdown(100.0, &candidate(100.0, "swapmeet", "art"), now);
        assert_eq!(unknown.liquidity, DEFAULT_LIQUIDITY);
        assert_eq!(unknown.story_value, DEFAULT_STORY_VALUE);
        assert_eq!(unknown.fraud_risk, 0.5);
    }

    #[test]
    fn reputation_is_clamped_to_certainty() {
        let mut c = candidate(100.0, "ebay", "tools");
        c.seller_reputation = Some(9.0);
        let b = score_breakdown(50.0, &c, Utc::now());
        assert_eq!(b.close_prob, 1.0);
        assert_eq!(b.fraud_risk, 0.0);
    }

    #[test]
    fn nearer_expiry_costs_more() {
        let now = Utc::now();
        assert_eq!(time_cost(Some(now + Duration::days(20)), now), 0.0);
        assert_eq!(time_cost(Some(now - Duration::days(1)), now), 1.0);
        let five_days = time_cost(Some(now + Duration::days(5)), now);
        assert!((five_days - 0.5).abs() < 1e-9);
        assert_eq!(time_cost(None, now), 0.4);
    }

    #[test]
    fn ranking_is_descending_and_bounded() {
        let now = Utc::now();
        let candidates = (1..=60)
            .map(|i| candidate(100.0 + i as f64, "ebay", "electronics"))
            .collect::<Vec<_>>();

        let ranked = rank_candidates(100.0, candidates.clone(), 500, now).unwrap();
        assert_eq!(ranked.len(), MAX_RANK_LIMIT);
        assert!(ranked
            .windows(2)
            .all(|pair| pair[0].trade_score >= pair[1].trade_score));

        let one = rank_candidates(100.0, candidates.clone(), 0, now).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].candidate.target_value, 160.0);

        let three = rank_candidates(100.0, candidates, 3, now).unwrap();
        assert_eq!(three.len(), 3);
    }

    #[test]
    fn ranking_requires_positive_current_value() {
        let err = rank_candidates(0.0, vec![candidate(10.0, "ebay", "tools")], 5, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), tradeup_core::ErrorKind::Validation);
    }
}
