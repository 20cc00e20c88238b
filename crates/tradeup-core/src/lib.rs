//! Core domain model, lifecycle state machines and error taxonomy for the trade-up workflow.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "tradeup-core";

/// Round half away from zero to a fixed number of decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Parse an RFC 3339 timestamp, returning `None` for anything unparseable.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Coarse classification a transport layer can map onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Unauthorized,
    Forbidden,
    Upstream,
    Storage,
}

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("duplicate {entity} for key {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("{0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{code}: {reason}")]
    PolicyDenied { code: String, reason: String },
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl TradeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition { .. } | Self::Duplicate { .. } | Self::Conflict(_) => {
                ErrorKind::Conflict
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::PolicyDenied { .. } => ErrorKind::Forbidden,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type TradeResult<T> = Result<T, TradeError>;

/// Closed set of value kinds carried by offer terms, snapshots and audit payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl PayloadValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<usize> for PayloadValue {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub type Payload = BTreeMap<String, PayloadValue>;

/// A status enum backed by an explicit transition table.
pub trait Lifecycle: Copy + Eq + fmt::Display + 'static {
    const ENTITY: &'static str;

    fn allowed_next(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    fn check_transition(self, next: Self) -> TradeResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TradeError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Draft,
    Approved,
    Rejected,
    Sent,
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Sent => "sent",
        }
    }
}

impl Lifecycle for OfferStatus {
    const ENTITY: &'static str = "offer";

    fn allowed_next(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::Sent, Self::Rejected],
            Self::Rejected | Self::Sent => &[],
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "sent" => Ok(Self::Sent),
            other => Err(TradeError::validation(format!("unknown offer status: {other}"))),
        }
    }
}

/// Lifecycle of a held item, shared by opportunities for scoring eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Seeded,
    Sourcing,
    Screened,
    Negotiating,
    AcceptedPendingVerification,
    Verified,
    Completed,
    Failed,
    Disputed,
}

impl PositionStatus {
    pub const ALL: [PositionStatus; 9] = [
        Self::Seeded,
        Self::Sourcing,
        Self::Screened,
        Self::Negotiating,
        Self::AcceptedPendingVerification,
        Self::Verified,
        Self::Completed,
        Self::Failed,
        Self::Disputed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::Sourcing => "sourcing",
            Self::Screened => "screened",
            Self::Negotiating => "negotiating",
            Self::AcceptedPendingVerification => "accepted_pending_verification",
            Self::Verified => "verified",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disputed => "disputed",
        }
    }

    /// Whether items in this status still count toward portfolio value.
    pub fn holds_value(self) -> bool {
        !matches!(self, Self::Failed | Self::Disputed)
    }

    /// Opportunities in these statuses are offered to the scoring engine.
    pub fn is_scoring_eligible(self) -> bool {
        matches!(self, Self::Sourcing | Self::Screened)
    }
}

impl Lifecycle for PositionStatus {
    const ENTITY: &'static str = "portfolio position";

    fn allowed_next(self) -> &'static [Self] {
        match self {
            Self::Seeded => &[Self::Sourcing],
            Self::Sourcing => &[Self::Screened, Self::Failed],
            Self::Screened => &[Self::Negotiating, Self::Failed],
            Self::Negotiating => &[Self::AcceptedPendingVerification, Self::Failed],
            Self::AcceptedPendingVerification => &[Self::Verified, Self::Failed, Self::Disputed],
            Self::Verified => &[Self::Completed, Self::Failed, Self::Disputed],
            Self::Completed | Self::Failed | Self::Disputed => &[],
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| TradeError::validation(format!("unknown portfolio status: {wanted}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Inspect,
    Pickup,
    Meet,
    Ship,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Pickup => "pickup",
            Self::Meet => "meet",
            Self::Ship => "ship",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inspect" => Ok(Self::Inspect),
            "pickup" => Ok(Self::Pickup),
            "meet" => Ok(Self::Meet),
            "ship" => Ok(Self::Ship),
            _ => Err(TradeError::validation(
                "task type must be one of inspect, pickup, meet, ship",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TradeError::validation(format!("unknown task status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistOutcome {
    Verified,
    Failed,
    Disputed,
}

impl ChecklistOutcome {
    pub fn route(passed: bool, disputed: bool) -> Self {
        match (passed, disputed) {
            (true, _) => Self::Verified,
            (false, true) => Self::Disputed,
            (false, false) => Self::Failed,
        }
    }

    /// The lifecycle status a position moves to for this outcome.
    pub fn position_status(self) -> PositionStatus {
        match self {
            Self::Verified => PositionStatus::Verified,
            Self::Failed => PositionStatus::Failed,
            Self::Disputed => PositionStatus::Disputed,
        }
    }
}

/// Raw intake fields as submitted by an operator or a sourcing feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityIntake {
    pub source: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub title: Option<String>,
    pub price: Option<f64>,
    /// Extra listing attributes carried into the normalized snapshot.
    #[serde(default)]
    pub attributes: Payload,
}

/// Canonical persisted opportunity. Immutable after creation except `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub source: String,
    pub category: String,
    pub location: String,
    pub title: String,
    pub ask_value: f64,
    pub normalized_payload: Payload,
    pub dedupe_key: String,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    pub source: Option<String>,
    pub category: Option<String>,
    pub status: Option<PositionStatus>,
    pub limit: Option<usize>,
}

/// A physically held item backing a portfolio position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    pub estimated_value: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub id: Uuid,
    pub item_id: Uuid,
    pub estimated_value: f64,
    pub confidence: f64,
    pub model_version: String,
    pub comps: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringCandidate {
    pub opportunity_id: Uuid,
    pub target_value: f64,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub seller_reputation: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub value_gain: f64,
    pub close_prob: f64,
    pub liquidity: f64,
    pub story_value: f64,
    pub fraud_risk: f64,
    pub time_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: ScoringCandidate,
    pub breakdown: ScoreBreakdown,
    pub trade_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub platform: String,
    pub action: String,
    pub allowed: bool,
    pub reason: String,
    pub last_reviewed: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub platform: String,
    pub action: String,
    pub actor_id: String,
    pub allowed: bool,
    pub reason: String,
    pub policy_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub terms: Payload,
    pub status: OfferStatus,
    pub sent_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub assignee: Option<String>,
    pub status: TaskStatus,
    pub provider: String,
    pub provider_task_id: String,
    pub metadata: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Proof-of-completion record attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub task_id: Uuid,
    pub media_url: String,
    pub checksum: String,
    pub geotag: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub id: Uuid,
    pub item_id: Uuid,
    pub acquisition_value: f64,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CHECKLIST_FIELDS: [&str; 4] = [
    "identity_confirmed",
    "condition_confirmed",
    "receipt_provided",
    "ownership_proof_provided",
];

/// camelCase spellings accepted alongside `CHECKLIST_FIELDS`, index for index.
const CHECKLIST_FIELD_ALIASES: [&str; 4] = [
    "identityConfirmed",
    "conditionConfirmed",
    "receiptProvided",
    "ownershipProofProvided",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistChecks {
    pub identity_confirmed: bool,
    pub condition_confirmed: bool,
    pub receipt_provided: bool,
    pub ownership_proof_provided: bool,
}

impl ChecklistChecks {
    /// Read the four required checks, rejecting missing or non-boolean entries.
    pub fn from_payload(payload: &Payload) -> TradeResult<Self> {
        let mut values = [false; 4];
        let mut invalid = Vec::new();
        let fields = CHECKLIST_FIELDS.into_iter().zip(CHECKLIST_FIELD_ALIASES);
        for (slot, (field, alias)) in values.iter_mut().zip(fields) {
            let value = payload.get(field).or_else(|| payload.get(alias));
            match value.and_then(PayloadValue::as_flag) {
                Some(v) => *slot = v,
                None => invalid.push(field),
            }
        }
        if !invalid.is_empty() {
            return Err(TradeError::validation(format!(
                "checklist requires boolean values for: {}",
                invalid.join(", ")
            )));
        }
        let [identity_confirmed, condition_confirmed, receipt_provided, ownership_proof_provided] =
            values;
        Ok(Self {
            identity_confirmed,
            condition_confirmed,
            receipt_provided,
            ownership_proof_provided,
        })
    }

    pub fn passed(&self) -> bool {
        self.identity_confirmed
            && self.condition_confirmed
            && self.receipt_provided
            && self.ownership_proof_provided
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationChecklist {
    pub id: Uuid,
    pub position_id: Uuid,
    pub checks: ChecklistChecks,
    pub passed: bool,
    pub outcome: ChecklistOutcome,
    pub reviewer_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiMetrics {
    pub value_multiple: f64,
    pub close_rate: f64,
    pub median_cycle_time_days: f64,
    pub fraud_loss_pct: f64,
    pub active_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub id: Uuid,
    #[serde(flatten)]
    pub metrics: KpiMetrics,
    pub captured_at: DateTime<Utc>,
}

/// Append-only compliance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            actor_id: None,
            payload: Payload::new(),
            created_at: Utc::now(),
        }
    }

    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<PayloadValue>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of a state-changing operation together with the audit event written for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Audited<T> {
    pub value: T,
    pub audit: AuditEvent,
}

impl<T> Audited<T> {
    pub fn new(value: T, audit: AuditEvent) -> Self {
        Self { value, audit }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_transition_table_is_enforced() {
        assert!(OfferStatus::Draft.check_transition(OfferStatus::Approved).is_ok());
        assert!(OfferStatus::Approved.check_transition(OfferStatus::Sent).is_ok());
        assert!(OfferStatus::Sent.is_terminal());
        assert!(OfferStatus::Rejected.is_terminal());

        let err = OfferStatus::Rejected
            .check_transition(OfferStatus::Approved)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "invalid offer transition: rejected -> approved");
    }

    #[test]
    fn position_table_rejects_skips_and_terminal_exits() {
        assert!(!PositionStatus::Seeded.can_transition_to(PositionStatus::Verified));
        assert!(PositionStatus::Seeded.can_transition_to(PositionStatus::Sourcing));
        assert!(!PositionStatus::Seeded.can_transition_to(PositionStatus::Failed));
        for terminal in [
            PositionStatus::Completed,
            PositionStatus::Failed,
            PositionStatus::Disputed,
        ] {
            assert!(terminal.is_terminal());
            for next in PositionStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
        let holding = PositionStatus::ALL
            .into_iter()
            .filter(|s| s.holds_value())
            .count();
        assert_eq!(holding, 7);
    }

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in PositionStatus::ALL {
            assert_eq!(status.as_str().parse::<PositionStatus>().unwrap(), status);
        }
        assert_eq!(
            "accepted_pending_verification".parse::<PositionStatus>().unwrap(),
            PositionStatus::AcceptedPendingVerification
        );
        assert!("shipped".parse::<TaskKind>().is_err());
        assert_eq!(" Ship ".parse::<TaskKind>().unwrap(), TaskKind::Ship);
    }

    #[test]
    fn checklist_payload_requires_all_four_booleans() {
        let mut payload = Payload::new();
        payload.insert("identity_confirmed".into(), true.into());
        payload.insert("condition_confirmed".into(), "yes".into());
        payload.insert("receipt_provided".into(), true.into());

        let err = ChecklistChecks::from_payload(&payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let message = err.to_string();
        assert!(message.contains("condition_confirmed"));
        assert!(message.contains("ownership_proof_provided"));
        assert!(!message.contains("identity_confirmed"));

        payload.insert("condition_confirmed".into(), true.into());
        payload.insert("ownership_proof_provided".into(), false.into());
        let checks = ChecklistChecks::from_payload(&payload).unwrap();
        assert!(!checks.passed());
    }

    #[test]
    fn checklist_payload_accepts_camel_case_keys() {
        let payload: Payload = serde_json::from_str(
            r#"{"identityConfirmed":false,"conditionConfirmed":true,"receiptProvided":true,"ownershipProofProvided":true}"#,
        )
        .unwrap();
        let checks = ChecklistChecks::from_payload(&payload).unwrap();
        assert!(!checks.identity_confirmed);
        assert!(checks.ownership_proof_provided);
        assert!(!checks.passed());
    }

    #[test]
    fn checklist_outcome_routing() {
        assert_eq!(ChecklistOutcome::route(true, true), ChecklistOutcome::Verified);
        assert_eq!(ChecklistOutcome::route(false, true), ChecklistOutcome::Disputed);
        assert_eq!(ChecklistOutcome::route(false, false), ChecklistOutcome::Failed);
        assert_eq!(
            ChecklistOutcome::Disputed.position_status(),
            PositionStatus::Disputed
        );
    }

    #[test]
    fn payload_values_deserialize_into_closed_kinds() {
        let payload: Payload =
            serde_json::from_str(r#"{"cash": 25.5, "note": "swap", "pickup": true}"#).unwrap();
        assert_eq!(payload["cash"].as_number(), Some(25.5));
        assert_eq!(payload["note"].as_text(), Some("swap"));
        assert_eq!(payload["pickup"].as_flag(), Some(true));
    }

    #[test]
    fn candidate_with_unparseable_expiry_is_treated_as_absent() {
        let candidate: ScoringCandidate = serde_json::from_str(
            r#"{
                "opportunity_id": "6f1c1c1e-2d6a-4d43-9f6d-0d0c6c8c2b11",
                "target_value": 120.0,
                "source": "ebay",
                "category": "tools",
                "expires_at": "next tuesday"
            }"#,
        )
        .unwrap();
        assert!(candidate.expires_at.is_none());
        assert!(candidate.seller_reputation.is_none());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_to(141.499_999_999, 2), 141.5);
        assert_eq!(round_to(0.444_49, 4), 0.4445);
        assert_eq!(round_to(-0.125, 2), -0.13);
    }
}
