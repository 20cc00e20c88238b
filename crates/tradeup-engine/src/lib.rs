//! Decision and workflow layer: intake, valuation, scoring, policy, offers,
//! tasks, portfolio lifecycle and KPIs over a [`TradeRepository`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tradeup_adapters::{provider_for_name, TaskProvider};
use tradeup_storage::TradeRepository;

pub mod config;
pub mod kpi;
pub mod normalize;
pub mod offers;
pub mod policy;
pub mod portfolio;
pub mod scoring;
pub mod tasks;
pub mod valuation;

pub use config::EngineConfig;
pub use kpi::compute_kpis;
pub use normalize::{dedupe_key, normalize_field, normalize_intake, NormalizedOpportunity};
pub use offers::OFFER_SEND_ACTION;
pub use policy::{load_policy_rules, policy_code, DEFAULT_ALLOW_CODE, DEFAULT_ALLOW_REASON};
pub use portfolio::{ChecklistRun, ChecklistSubmission, NewPosition};
pub use scoring::{rank_candidates, score_breakdown, trade_score, MAX_RANK_LIMIT};
pub use tasks::{evidence_checksum, EvidenceInput};
pub use valuation::{estimate_value, Comp, ValuationEstimate, ValuationInput, MODEL_VERSION};

pub const CRATE_NAME: &str = "tradeup-engine";

/// Actor recorded on audit events the engine writes on its own behalf.
pub const SYSTEM_ACTOR: &str = "system";

pub struct Workflow {
    repo: Arc<dyn TradeRepository>,
    provider: Box<dyn TaskProvider>,
    config: EngineConfig,
}

impl Workflow {
    pub fn new(
        repo: Arc<dyn TradeRepository>,
        provider: Box<dyn TaskProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo,
            provider,
            config,
        }
    }

    pub fn repository(&self) -> &dyn TradeRepository {
        self.repo.as_ref()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Build a workflow from `TRADEUP_*` env vars, seeding policy rules when the
/// configured rules file exists.
pub async fn workflow_from_env(repo: Arc<dyn TradeRepository>) -> Result<Workflow> {
    let config = EngineConfig::from_env();
    let provider = provider_for_name(&config.task_provider, config.http_provider_config())
        .with_context(|| format!("configuring task provider {}", config.task_provider))?;
    let workflow = Workflow::new(repo, provider, config);

    let rules_path = workflow.config.policy_rules_path.clone();
    if rules_path.exists() {
        let seeded = workflow.seed_policy_rules(&rules_path, SYSTEM_ACTOR).await?;
        info!(rules = seeded, path = %rules_path.display(), "policy rules seeded");
    } else {
        warn!(path = %rules_path.display(), "policy rules file missing; every action defaults to allow");
    }
    if workflow.config.webhook_secret.is_empty() {
        warn!("TRADEUP_WEBHOOK_SECRET is empty; task webhooks will be rejected");
    }
    Ok(workflow)
}
