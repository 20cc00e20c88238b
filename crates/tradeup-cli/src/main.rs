use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tradeup_adapters::{CancelSignal, LocalTaskProvider};
use tradeup_core::{
    OfferStatus, OpportunityIntake, Payload, PositionStatus, ScoringCandidate, TaskStatus,
};
use tradeup_engine::{
    estimate_value, normalize_intake, rank_candidates, ChecklistSubmission, Comp, EngineConfig,
    EvidenceInput, NewPosition, ValuationInput, Workflow,
};
use tradeup_storage::{InMemoryRepository, TradeRepository};

const DEMO_ACTOR: &str = "demo-operator";
const DEMO_WEBHOOK_SECRET: &str = "demo-webhook-secret";

#[derive(Debug, Parser)]
#[command(name = "tradeup-cli")]
#[command(about = "Trade-up decision and workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Normalize an intake record and print its dedupe fingerprint.
    Normalize {
        #[arg(long)]
        source: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        price: f64,
    },
    /// Estimate an item's value from a base value and comparable sales.
    Value {
        #[arg(long)]
        base: Option<f64>,
        #[arg(long = "comp")]
        comps: Vec<f64>,
    },
    /// Rank a JSON file of scoring candidates against the current item value.
    Rank {
        #[arg(long)]
        current_value: f64,
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Evaluate a platform action against a YAML policy rule file.
    PolicyCheck {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = DEMO_ACTOR)]
        actor: String,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Run one trade-up end to end in memory and print the KPI snapshot.
    Demo,
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TRADEUP_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn in_memory_workflow(config: EngineConfig) -> Workflow {
    let repo: Arc<dyn TradeRepository> = Arc::new(InMemoryRepository::new());
    Workflow::new(repo, Box::new(LocalTaskProvider), config)
}

async fn seed_rules_if_present(workflow: &Workflow, path: &Path) -> Result<()> {
    if path.exists() {
        let seeded = workflow.seed_policy_rules(path, DEMO_ACTOR).await?;
        info!(rules = seeded, path = %path.display(), "policy rules seeded");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Demo) {
        Commands::Normalize {
            source,
            category,
            location,
            title,
            price,
        } => {
            let normalized = normalize_intake(&OpportunityIntake {
                source: Some(source),
                category: Some(category),
                location: Some(location),
                title,
                price: Some(price),
                attributes: Payload::new(),
            })?;
            print_json(&normalized)?;
        }
        Commands::Value { base, comps } => {
            let estimate = estimate_value(&ValuationInput {
                base_value: base,
                comps: comps.into_iter().map(Comp::priced).collect(),
            })?;
            print_json(&estimate)?;
        }
        Commands::Rank {
            current_value,
            candidates,
            limit,
        } => {
            let text = std::fs::read_to_string(&candidates)
                .with_context(|| format!("reading {}", candidates.display()))?;
            let parsed: Vec<ScoringCandidate> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", candidates.display()))?;
            let ranked = rank_candidates(current_value, parsed, limit, Utc::now())?;
            print_json(&ranked)?;
        }
        Commands::PolicyCheck {
            platform,
            action,
            actor,
            rules,
        } => {
            let config = EngineConfig::from_env();
            let rules = rules.unwrap_or_else(|| config.policy_rules_path.clone());
            let workflow = in_memory_workflow(config);
            seed_rules_if_present(&workflow, &rules).await?;
            let decision = workflow.evaluate_policy(&platform, &action, &actor).await?;
            print_json(&decision)?;
        }
        Commands::Demo => {
            let snapshot = run_demo().await?;
            print_json(&snapshot)?;
        }
    }

    Ok(())
}

/// Paperclip-to-something trade: value the seed, rank listings, send an
/// offer, verify the handoff and snapshot the KPIs.
async fn run_demo() -> Result<tradeup_core::KpiSnapshot> {
    let mut config = EngineConfig::from_env();
    if config.webhook_secret.is_empty() {
        config.webhook_secret = DEMO_WEBHOOK_SECRET.to_string();
    }
    let secret = config.webhook_secret.clone();
    let seed_cost = config.effective_seed_cost();
    let rules_path = config.policy_rules_path.clone();
    let workflow = in_memory_workflow(config);
    seed_rules_if_present(&workflow, &rules_path).await?;

    let position = workflow
        .open_position(
            NewPosition {
                title: "Red paperclip".into(),
                acquisition_value: seed_cost,
                estimated_value: None,
            },
            DEMO_ACTOR,
        )
        .await?
        .into_inner();
    let seed_value = workflow
        .value_item(
            position.item_id,
            &ValuationInput {
                base_value: Some(seed_cost),
                comps: [0.8, 1.0, 1.5].into_iter().map(Comp::priced).collect(),
            },
            DEMO_ACTOR,
        )
        .await?
        .into_inner();

    let listings = [
        ("offerup", "collectibles", "Fish-shaped pen", 2.0, 4.6),
        ("craigslist", "furniture", "Door knob", 3.5, 3.1),
        ("ebay", "electronics", "Camping stove", 6.0, 4.9),
    ];
    for (source, category, title, price, reputation) in listings {
        let mut attributes = Payload::new();
        attributes.insert("seller_reputation".into(), reputation.into());
        workflow
            .ingest_opportunity(
                &OpportunityIntake {
                    source: Some(source.into()),
                    category: Some(category.into()),
                    location: Some("Montreal".into()),
                    title: Some(title.into()),
                    price: Some(price),
                    attributes,
                },
                DEMO_ACTOR,
            )
            .await?;
    }

    let ranked = workflow.rank_opportunities(seed_value.estimated_value, 3).await?;
    let best = ranked
        .first()
        .context("no tradeable opportunities were ranked")?;
    info!(
        opportunity_id = %best.candidate.opportunity_id,
        score = best.trade_score,
        "best next trade selected"
    );

    let mut terms = Payload::new();
    terms.insert("trade_item".into(), "Red paperclip".into());
    let offer = workflow
        .create_offer(best.candidate.opportunity_id, terms, DEMO_ACTOR)
        .await?
        .into_inner();
    workflow
        .transition_offer(offer.id, OfferStatus::Approved, DEMO_ACTOR)
        .await?;
    workflow
        .transition_offer(offer.id, OfferStatus::Sent, DEMO_ACTOR)
        .await?;

    let mut metadata = Payload::new();
    metadata.insert("meeting_point".into(), "Cafe on St-Laurent".into());
    let task = workflow
        .dispatch_task("meet", None, metadata, DEMO_ACTOR, &CancelSignal::never())
        .await?
        .into_inner();
    for status in [TaskStatus::InProgress, TaskStatus::Completed] {
        workflow
            .apply_task_webhook(&secret, &task.provider_task_id, status)
            .await?;
    }
    workflow
        .capture_evidence(
            task.id,
            EvidenceInput {
                media_url: "file:///demo/handoff.jpg".into(),
                ..EvidenceInput::default()
            },
            DEMO_ACTOR,
        )
        .await?;

    for next in [
        PositionStatus::Sourcing,
        PositionStatus::Screened,
        PositionStatus::Negotiating,
        PositionStatus::AcceptedPendingVerification,
    ] {
        workflow
            .transition_position(position.id, next, DEMO_ACTOR)
            .await?;
    }
    let mut checks = Payload::new();
    for field in tradeup_core::CHECKLIST_FIELDS {
        checks.insert(field.into(), true.into());
    }
    workflow
        .run_checklist(
            position.id,
            ChecklistSubmission {
                checks,
                disputed: false,
                reviewer_id: DEMO_ACTOR.into(),
                notes: Some("handoff verified in person".into()),
            },
        )
        .await?;
    workflow
        .value_item(
            position.item_id,
            &ValuationInput {
                base_value: Some(best.candidate.target_value),
                comps: Vec::new(),
            },
            DEMO_ACTOR,
        )
        .await?;
    workflow
        .transition_position(position.id, PositionStatus::Completed, DEMO_ACTOR)
        .await?;

    Ok(workflow.snapshot_kpis(DEMO_ACTOR).await?.into_inner())
}
