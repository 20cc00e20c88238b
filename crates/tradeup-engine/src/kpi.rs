use chrono::Utc;
use tracing::info;
use tradeup_core::{
    round_to, AuditEvent, Audited, KpiMetrics, KpiSnapshot, Offer, OfferStatus, PositionStatus,
    Task, TradeResult,
};
use tradeup_storage::PositionHolding;
use uuid::Uuid;

use crate::valuation::median;
use crate::Workflow;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

pub fn compute_kpis(
    positions: &[PositionHolding],
    offers: &[Offer],
    tasks: &[Task],
    seed_cost: f64,
) -> KpiMetrics {
    let seed_cost = if seed_cost.is_finite() && seed_cost > 0.0 {
        seed_cost
    } else {
        1.0
    };

    let held_value = positions
        .iter()
        .filter(|h| h.position.status.holds_value())
        .map(|h| h.estimated_value)
        .sum::<f64>();

    let sent = offers.iter().filter(|o| o.status == OfferStatus::Sent).count();

    let cycle_days = positions
        .iter()
        .filter(|h| h.position.status == PositionStatus::Completed)
        .map(|h| {
            (h.position.updated_at - h.position.created_at).num_milliseconds() as f64
                / MILLIS_PER_DAY
        })
        .collect::<Vec<_>>();

    let total_acquired = positions
        .iter()
        .map(|h| h.position.acquisition_value)
        .sum::<f64>();
    let disputed_acquired = positions
        .iter()
        .filter(|h| h.position.status == PositionStatus::Disputed)
        .map(|h| h.position.acquisition_value)
        .sum::<f64>();

    KpiMetrics {
        value_multiple: round_to(held_value / seed_cost, 4),
        close_rate: round_to(ratio(sent as f64, offers.len() as f64), 4),
        median_cycle_time_days: round_to(median(&cycle_days).unwrap_or(0.0), 4),
        fraud_loss_pct: round_to(100.0 * ratio(disputed_acquired, total_acquired), 4),
        active_tasks: tasks.iter().filter(|t| t.status.is_active()).count(),
    }
}

impl Workflow {
    pub async fn kpis(&self) -> TradeResult<KpiMetrics> {
        let positions = self.repo.list_positions().await?;
        let offers = self.repo.list_offers().await?;
        let tasks = self.repo.list_tasks().await?;
        Ok(compute_kpis(
            &positions,
            &offers,
            &tasks,
            self.config.effective_seed_cost(),
        ))
    }

    pub async fn snapshot_kpis(&self, actor_id: &str) -> TradeResult<Audited<KpiSnapshot>> {
        let metrics = self.kpis().await?;
        let snapshot = KpiSnapshot {
            id: Uuid::new_v4(),
            metrics,
            captured_at: Utc::now(),
        };
        let audit = AuditEvent::new("kpi.snapshot_saved", "kpi_snapshot", snapshot.id)
            .by(actor_id)
            .with("value_multiple", metrics.value_multiple)
            .with("close_rate", metrics.close_rate)
            .with("median_cycle_time_days", metrics.median_cycle_time_days)
            .with("fraud_loss_pct", metrics.fraud_loss_pct)
            .with("active_tasks", metrics.active_tasks);
        let stored = self.repo.save_kpi_snapshot(snapshot, audit.clone()).await?;
        info!(
            snapshot_id = %stored.id,
            value_multiple = metrics.value_multiple,
            close_rate = metrics.close_rate,
            active_tasks = metrics.active_tasks,
            "kpi snapshot saved"
        );
        Ok(Audited::new(stored, audit))
    }

    /// Most recent snapshots first.
    pub async fn list_kpi_snapshots(&self, limit: usize) -> TradeResult<Vec<KpiSnapshot>> {
        Ok(self.repo.list_kpi_snapshots(limit).await?)
    }
}
