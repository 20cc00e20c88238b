//! Repository contract and in-memory reference store for the trade-up workflow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use tradeup_core::{
    parse_timestamp, AuditEvent, Evidence, Item, KpiSnapshot, Offer, OfferStatus, Opportunity,
    OpportunityFilter, PolicyRule, PortfolioPosition, PositionStatus, ScoringCandidate, Task,
    TaskStatus, TradeError, Valuation, VerificationChecklist,
};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tradeup-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duplicate {entity} key {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id} changed concurrently: expected {expected}, found {actual}")]
    StaleStatus {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StorageError> for TradeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate { entity, key } => TradeError::Duplicate { entity, key },
            StorageError::NotFound { entity, id } => TradeError::NotFound { entity, id },
            err @ StorageError::StaleStatus { .. } => TradeError::Conflict(err.to_string()),
            StorageError::Unavailable(message) => TradeError::Storage(message),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Conditional status write: applied only while the stored status still equals `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate<S> {
    pub id: Uuid,
    pub expected: S,
    pub next: S,
}

/// A position joined with the current estimate of the item backing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionHolding {
    pub position: PortfolioPosition,
    pub estimated_value: f64,
}

/// Storage contract consumed by the workflow engine.
///
/// Every state-changing call receives the audit event(s) describing it and must
/// write the change and the events all-or-nothing.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn find_opportunity_by_dedupe_key(&self, key: &str) -> StorageResult<Option<Opportunity>>;
    async fn create_opportunity(
        &self,
        opportunity: Opportunity,
        audit: AuditEvent,
    ) -> StorageResult<Opportunity>;
    async fn get_opportunity(&self, id: Uuid) -> StorageResult<Option<Opportunity>>;
    async fn list_opportunities(&self, filter: &OpportunityFilter) -> StorageResult<Vec<Opportunity>>;
    async fn update_opportunity_status(
        &self,
        id: Uuid,
        status: PositionStatus,
        audit: AuditEvent,
    ) -> StorageResult<Opportunity>;
    async fn list_scoring_candidates(&self, limit: usize) -> StorageResult<Vec<ScoringCandidate>>;

    async fn get_item(&self, id: Uuid) -> StorageResult<Option<Item>>;
    async fn record_valuation(&self, valuation: Valuation, audit: AuditEvent) -> StorageResult<Valuation>;
    async fn list_valuations(&self, item_id: Uuid) -> StorageResult<Vec<Valuation>>;

    async fn get_policy_rule(&self, platform: &str, action: &str) -> StorageResult<Option<PolicyRule>>;
    async fn upsert_policy_rule(&self, rule: PolicyRule, audit: AuditEvent) -> StorageResult<PolicyRule>;
    async fn list_policy_rules(&self) -> StorageResult<Vec<PolicyRule>>;

    async fn create_offer(&self, offer: Offer, audit: AuditEvent) -> StorageResult<Offer>;
    async fn get_offer(&self, id: Uuid) -> StorageResult<Option<Offer>>;
    async fn update_offer_status(
        &self,
        update: StatusUpdate<OfferStatus>,
        sent_by: Option<String>,
        audit: AuditEvent,
    ) -> StorageResult<Offer>;
    async fn list_offers(&self) -> StorageResult<Vec<Offer>>;

    async fn create_task(&self, task: Task, audit: AuditEvent) -> StorageResult<Task>;
    async fn get_task(&self, id: Uuid) -> StorageResult<Option<Task>>;
    async fn find_task_by_provider_id(&self, provider_task_id: &str) -> StorageResult<Option<Task>>;
    async fn update_task_status_by_provider_id(
        &self,
        provider_task_id: &str,
        status: TaskStatus,
        audit: AuditEvent,
    ) -> StorageResult<Task>;
    async fn list_tasks(&self) -> StorageResult<Vec<Task>>;
    async fn create_evidence(&self, evidence: Evidence, audit: AuditEvent) -> StorageResult<Evidence>;
    async fn list_evidence(&self, task_id: Uuid) -> StorageResult<Vec<Evidence>>;

    async fn create_position(
        &self,
        item: Item,
        position: PortfolioPosition,
        audit: AuditEvent,
    ) -> StorageResult<PortfolioPosition>;
    async fn get_position(&self, id: Uuid) -> StorageResult<Option<PortfolioPosition>>;
    async fn update_position_status(
        &self,
        update: StatusUpdate<PositionStatus>,
        audit: AuditEvent,
    ) -> StorageResult<PortfolioPosition>;
    async fn list_positions(&self) -> StorageResult<Vec<PositionHolding>>;
    async fn record_checklist(
        &self,
        checklist: VerificationChecklist,
        update: StatusUpdate<PositionStatus>,
        audits: Vec<AuditEvent>,
    ) -> StorageResult<(VerificationChecklist, PortfolioPosition)>;
    async fn list_checklists(&self, position_id: Uuid) -> StorageResult<Vec<VerificationChecklist>>;

    async fn save_kpi_snapshot(&self, snapshot: KpiSnapshot, audit: AuditEvent) -> StorageResult<KpiSnapshot>;
    async fn list_kpi_snapshots(&self, limit: usize) -> StorageResult<Vec<KpiSnapshot>>;

    async fn append_audit_event(&self, event: AuditEvent) -> StorageResult<AuditEvent>;
    async fn list_audit_events(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
    ) -> StorageResult<Vec<AuditEvent>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    opportunities: Vec<Opportunity>,
    dedupe_index: HashMap<String, Uuid>,
    items: HashMap<Uuid, Item>,
    valuations: Vec<Valuation>,
    policy_rules: Vec<PolicyRule>,
    offers: Vec<Offer>,
    tasks: Vec<Task>,
    evidence: Vec<Evidence>,
    positions: Vec<PortfolioPosition>,
    checklists: Vec<VerificationChecklist>,
    kpi_snapshots: Vec<KpiSnapshot>,
    audit_events: Vec<AuditEvent>,
}

/// Single-process store whose mutations run under one lock, giving each call
/// the all-or-nothing behaviour the contract requires.
#[derive(Debug)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
    audit_available: AtomicBool,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            audit_available: AtomicBool::new(true),
        }
    }

    /// Simulate an audit log outage; every state-changing call fails while unavailable.
    pub fn set_audit_available(&self, available: bool) {
        self.audit_available.store(available, Ordering::SeqCst);
    }

    fn ensure_audit_writable(&self) -> StorageResult<()> {
        if self.audit_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("audit log rejected write".to_string()))
        }
    }
}

fn stale<S: ToString>(entity: &'static str, id: Uuid, expected: S, actual: S) -> StorageError {
    StorageError::StaleStatus {
        entity,
        id: id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StorageError {
    StorageError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn candidate_from(opportunity: &Opportunity) -> ScoringCandidate {
    let payload = &opportunity.normalized_payload;
    ScoringCandidate {
        opportunity_id: opportunity.id,
        target_value: opportunity.ask_value,
        source: opportunity.source.clone(),
        category: opportunity.category.clone(),
        seller_reputation: payload.get("seller_reputation").and_then(|v| v.as_number()),
        expires_at: payload
            .get("expires_at")
            .and_then(|v| v.as_text())
            .and_then(parse_timestamp),
    }
}

#[async_trait]
impl TradeRepository for InMemoryRepository {
    async fn find_opportunity_by_dedupe_key(&self, key: &str) -> StorageResult<Option<Opportunity>> {
        let state = self.state.lock().await;
        Ok(state
            .dedupe_index
            .get(key)
            .and_then(|id| state.opportunities.iter().find(|o| o.id == *id))
            .cloned())
    }

    async fn create_opportunity(
        &self,
        opportunity: Opportunity,
        audit: AuditEvent,
    ) -> StorageResult<Opportunity> {
        let mut state = self.state.lock().await;
        if state.dedupe_index.contains_key(&opportunity.dedupe_key) {
            return Err(StorageError::Duplicate {
                entity: "opportunity",
                key: opportunity.dedupe_key,
            });
        }
        self.ensure_audit_writable()?;
        state
            .dedupe_index
            .insert(opportunity.dedupe_key.clone(), opportunity.id);
        state.opportunities.push(opportunity.clone());
        state.audit_events.push(audit);
        debug!(opportunity_id = %opportunity.id, "opportunity stored");
        Ok(opportunity)
    }

    async fn get_opportunity(&self, id: Uuid) -> StorageResult<Option<Opportunity>> {
        let state = self.state.lock().await;
        Ok(state.opportunities.iter().find(|o| o.id == id).cloned())
    }

    async fn list_opportunities(&self, filter: &OpportunityFilter) -> StorageResult<Vec<Opportunity>> {
        let state = self.state.lock().await;
        Ok(state
            .opportunities
            .iter()
            .rev()
            .filter(|o| filter.source.as_deref().map_or(true, |s| o.source == s))
            .filter(|o| filter.category.as_deref().map_or(true, |c| o.category == c))
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn update_opportunity_status(
        &self,
        id: Uuid,
        status: PositionStatus,
        audit: AuditEvent,
    ) -> StorageResult<Opportunity> {
        let mut state = self.state.lock().await;
        if !state.opportunities.iter().any(|o| o.id == id) {
            return Err(not_found("opportunity", id));
        }
        self.ensure_audit_writable()?;
        state.audit_events.push(audit);
        let opportunity = state
            .opportunities
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| not_found("opportunity", id))?;
        opportunity.status = status;
        Ok(opportunity.clone())
    }

    async fn list_scoring_candidates(&self, limit: usize) -> StorageResult<Vec<ScoringCandidate>> {
        let state = self.state.lock().await;
        Ok(state
            .opportunities
            .iter()
            .rev()
            .filter(|o| o.status.is_scoring_eligible())
            .take(limit)
            .map(candidate_from)
            .collect())
    }

    async fn get_item(&self, id: Uuid) -> StorageResult<Option<Item>> {
        let state = self.state.lock().await;
        Ok(state.items.get(&id).cloned())
    }

    async fn record_valuation(&self, valuation: Valuation, audit: AuditEvent) -> StorageResult<Valuation> {
        let mut state = self.state.lock().await;
        if !state.items.contains_key(&valuation.item_id) {
            return Err(not_found("item", valuation.item_id));
        }
        self.ensure_audit_writable()?;
        if let Some(item) = state.items.get_mut(&valuation.item_id) {
            item.estimated_value = valuation.estimated_value;
        }
        state.valuations.push(valuation.clone());
        state.audit_events.push(audit);
        Ok(valuation)
    }

    async fn list_valuations(&self, item_id: Uuid) -> StorageResult<Vec<Valuation>> {
        let state = self.state.lock().await;
        Ok(state
            .valuations
            .iter()
            .rev()
            .filter(|v| v.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn get_policy_rule(&self, platform: &str, action: &str) -> StorageResult<Option<PolicyRule>> {
        let state = self.state.lock().await;
        Ok(state
            .policy_rules
            .iter()
            .find(|r| r.platform == platform && r.action == action)
            .cloned())
    }

    async fn upsert_policy_rule(&self, rule: PolicyRule, audit: AuditEvent) -> StorageResult<PolicyRule> {
        let mut state = self.state.lock().await;
        self.ensure_audit_writable()?;
        match state
            .policy_rules
            .iter_mut()
            .find(|r| r.platform == rule.platform && r.action == rule.action)
        {
            Some(existing) => *existing = rule.clone(),
            None => state.policy_rules.push(rule.clone()),
        }
        state.audit_events.push(audit);
        Ok(rule)
    }

    async fn list_policy_rules(&self) -> StorageResult<Vec<PolicyRule>> {
        let state = self.state.lock().await;
        let mut rules = state.policy_rules.clone();
        rules.sort_by(|a, b| (&a.platform, &a.action).cmp(&(&b.platform, &b.action)));
        Ok(rules)
    }

    async fn create_offer(&self, offer: Offer, audit: AuditEvent) -> StorageResult<Offer> {
        let mut state = self.state.lock().await;
        if !state.opportunities.iter().any(|o| o.id == offer.opportunity_id) {
            return Err(not_found("opportunity", offer.opportunity_id));
        }
        self.ensure_audit_writable()?;
        state.offers.push(offer.clone());
        state.audit_events.push(audit);
        Ok(offer)
    }

    async fn get_offer(&self, id: Uuid) -> StorageResult<Option<Offer>> {
        let state = self.state.lock().await;
        Ok(state.offers.iter().find(|o| o.id == id).cloned())
    }

    async fn update_offer_status(
        &self,
        update: StatusUpdate<OfferStatus>,
        sent_by: Option<String>,
        audit: AuditEvent,
    ) -> StorageResult<Offer> {
        let mut state = self.state.lock().await;
        let current = state
            .offers
            .iter()
            .find(|o| o.id == update.id)
            .map(|o| o.status)
            .ok_or_else(|| not_found("offer", update.id))?;
        if current != update.expected {
            return Err(stale("offer", update.id, update.expected, current));
        }
        self.ensure_audit_writable()?;
        state.audit_events.push(audit);
        let offer = state
            .offers
            .iter_mut()
            .find(|o| o.id == update.id)
            .ok_or_else(|| not_found("offer", update.id))?;
        offer.status = update.next;
        if sent_by.is_some() {
            offer.sent_by = sent_by;
        }
        offer.updated_at = Utc::now();
        Ok(offer.clone())
    }

    async fn list_offers(&self) -> StorageResult<Vec<Offer>> {
        let state = self.state.lock().await;
        Ok(state.offers.iter().rev().cloned().collect())
    }

    async fn create_task(&self, task: Task, audit: AuditEvent) -> StorageResult<Task> {
        let mut state = self.state.lock().await;
        if state
            .tasks
            .iter()
            .any(|t| t.provider_task_id == task.provider_task_id)
        {
            return Err(StorageError::Duplicate {
                entity: "task",
                key: task.provider_task_id,
            });
        }
        self.ensure_audit_writable()?;
        state.tasks.push(task.clone());
        state.audit_events.push(audit);
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> StorageResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn find_task_by_provider_id(&self, provider_task_id: &str) -> StorageResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.provider_task_id == provider_task_id)
            .cloned())
    }

    async fn update_task_status_by_provider_id(
        &self,
        provider_task_id: &str,
        status: TaskStatus,
        audit: AuditEvent,
    ) -> StorageResult<Task> {
        let mut state = self.state.lock().await;
        if !state
            .tasks
            .iter()
            .any(|t| t.provider_task_id == provider_task_id)
        {
            return Err(not_found("task", provider_task_id));
        }
        self.ensure_audit_writable()?;
        state.audit_events.push(audit);
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.provider_task_id == provider_task_id)
            .ok_or_else(|| not_found("task", provider_task_id))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn list_tasks(&self) -> StorageResult<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.iter().rev().cloned().collect())
    }

    async fn create_evidence(&self, evidence: Evidence, audit: AuditEvent) -> StorageResult<Evidence> {
        let mut state = self.state.lock().await;
        if !state.tasks.iter().any(|t| t.id == evidence.task_id) {
            return Err(not_found("task", evidence.task_id));
        }
        self.ensure_audit_writable()?;
        state.evidence.push(evidence.clone());
        state.audit_events.push(audit);
        Ok(evidence)
    }

    async fn list_evidence(&self, task_id: Uuid) -> StorageResult<Vec<Evidence>> {
        let state = self.state.lock().await;
        let mut out = state
            .evidence
            .iter()
            .rev()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(out)
    }

    async fn create_position(
        &self,
        item: Item,
        position: PortfolioPosition,
        audit: AuditEvent,
    ) -> StorageResult<PortfolioPosition> {
        let mut state = self.state.lock().await;
        self.ensure_audit_writable()?;
        state.items.insert(item.id, item);
        state.positions.push(position.clone());
        state.audit_events.push(audit);
        Ok(position)
    }

    async fn get_position(&self, id: Uuid) -> StorageResult<Option<PortfolioPosition>> {
        let state = self.state.lock().await;
        Ok(state.positions.iter().find(|p| p.id == id).cloned())
    }

    async fn update_position_status(
        &self,
        update: StatusUpdate<PositionStatus>,
        audit: AuditEvent,
    ) -> StorageResult<PortfolioPosition> {
        let mut state = self.state.lock().await;
        let position = apply_position_update(&mut state, update, || self.ensure_audit_writable())?;
        state.audit_events.push(audit);
        Ok(position)
    }

    async fn list_positions(&self) -> StorageResult<Vec<PositionHolding>> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .map(|position| PositionHolding {
                position: position.clone(),
                estimated_value: state
                    .items
                    .get(&position.item_id)
                    .map(|item| item.estimated_value)
                    .unwrap_or(0.0),
            })
            .collect())
    }

    async fn record_checklist(
        &self,
        checklist: VerificationChecklist,
        update: StatusUpdate<PositionStatus>,
        audits: Vec<AuditEvent>,
    ) -> StorageResult<(VerificationChecklist, PortfolioPosition)> {
        let mut state = self.state.lock().await;
        let position = apply_position_update(&mut state, update, || self.ensure_audit_writable())?;
        state.checklists.push(checklist.clone());
        state.audit_events.extend(audits);
        Ok((checklist, position))
    }

    async fn list_checklists(&self, position_id: Uuid) -> StorageResult<Vec<VerificationChecklist>> {
        let state = self.state.lock().await;
        Ok(state
            .checklists
            .iter()
            .rev()
            .filter(|c| c.position_id == position_id)
            .cloned()
            .collect())
    }

    async fn save_kpi_snapshot(&self, snapshot: KpiSnapshot, audit: AuditEvent) -> StorageResult<KpiSnapshot> {
        let mut state = self.state.lock().await;
        self.ensure_audit_writable()?;
        state.kpi_snapshots.push(snapshot.clone());
        state.audit_events.push(audit);
        Ok(snapshot)
    }

    async fn list_kpi_snapshots(&self, limit: usize) -> StorageResult<Vec<KpiSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.kpi_snapshots.iter().rev().take(limit).cloned().collect())
    }

    async fn append_audit_event(&self, event: AuditEvent) -> StorageResult<AuditEvent> {
        let mut state = self.state.lock().await;
        self.ensure_audit_writable()?;
        state.audit_events.push(event.clone());
        Ok(event)
    }

    async fn list_audit_events(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
    ) -> StorageResult<Vec<AuditEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .audit_events
            .iter()
            .rev()
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .filter(|e| entity_id.map_or(true, |id| e.entity_id == id))
            .cloned()
            .collect())
    }
}

fn apply_position_update(
    state: &mut MemoryState,
    update: StatusUpdate<PositionStatus>,
    audit_writable: impl FnOnce() -> StorageResult<()>,
) -> StorageResult<PortfolioPosition> {
    let position = state
        .positions
        .iter_mut()
        .find(|p| p.id == update.id)
        .ok_or_else(|| not_found("portfolio position", update.id))?;
    if position.status != update.expected {
        return Err(stale(
            "portfolio position",
            update.id,
            update.expected,
            position.status,
        ));
    }
    audit_writable()?;
    position.status = update.next;
    position.updated_at = Utc::now();
    Ok(position.clone())
}
