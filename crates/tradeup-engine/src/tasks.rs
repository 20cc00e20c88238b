use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};
use tradeup_adapters::{create_task_with_deadline, CancelSignal, TaskRequest};
use tradeup_core::{
    parse_timestamp, AuditEvent, Audited, Evidence, Payload, Task, TaskKind, TaskStatus,
    TradeError, TradeResult,
};
use tradeup_storage::sha256_hex;
use uuid::Uuid;

use crate::Workflow;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvidenceInput {
    pub media_url: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub geotag: Option<String>,
    /// RFC 3339; defaults to the time of capture.
    #[serde(default)]
    pub captured_at: Option<String>,
}

/// Integrity anchor for a piece of evidence: a digest of where it lives and
/// when it was captured, not of the media bytes.
pub fn evidence_checksum(media_url: &str, captured_at: DateTime<Utc>) -> String {
    let material = format!(
        "{media_url}|{}",
        captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    sha256_hex(material.as_bytes())
}

impl Workflow {
    /// Create a task with the configured provider and persist it as queued.
    /// Provider failure, timeout or cancellation persists nothing.
    pub async fn dispatch_task(
        &self,
        kind: &str,
        assignee: Option<String>,
        metadata: Payload,
        actor_id: &str,
        cancel: &CancelSignal,
    ) -> TradeResult<Audited<Task>> {
        let kind: TaskKind = kind.parse()?;
        let request = TaskRequest {
            kind,
            assignee,
            metadata,
        };
        let span = info_span!("dispatch_task", kind = %kind, provider = self.provider.name());

        let ticket = create_task_with_deadline(
            self.provider.as_ref(),
            &request,
            self.config.provider_timeout(),
            cancel,
        )
        .instrument(span)
        .await
        .map_err(|err| {
            warn!(error = %err, kind = %kind, "task provider call failed");
            TradeError::from(err)
        })?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            kind,
            assignee: request.assignee,
            status: TaskStatus::Queued,
            provider: ticket.provider,
            provider_task_id: ticket.provider_task_id,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEvent::new("task.created", "task", task.id)
            .by(actor_id)
            .with("type", kind.as_str())
            .with("provider", task.provider.as_str())
            .with("provider_task_id", task.provider_task_id.as_str());
        let stored = self.repo.create_task(task, audit.clone()).await?;
        info!(task_id = %stored.id, provider_task_id = %stored.provider_task_id, "task queued");
        Ok(Audited::new(stored, audit))
    }

    /// Apply a provider status callback. The token must equal the configured
    /// webhook secret exactly; an empty secret accepts nothing.
    pub async fn apply_task_webhook(
        &self,
        token: &str,
        provider_task_id: &str,
        status: TaskStatus,
    ) -> TradeResult<Audited<Task>> {
        let secret = self.config.webhook_secret.as_str();
        if secret.is_empty() || token != secret {
            warn!(provider_task_id, "webhook rejected: invalid token");
            return Err(TradeError::Unauthorized("invalid webhook token".to_string()));
        }

        let task = self
            .repo
            .find_task_by_provider_id(provider_task_id)
            .await?
            .ok_or_else(|| TradeError::not_found("task", provider_task_id))?;

        let audit = AuditEvent::new("task.status_updated", "task", task.id)
            .by(format!("webhook:{}", self.provider.name()))
            .with("previous_status", task.status.as_str())
            .with("provider_task_id", provider_task_id)
            .with("status", status.as_str());
        let task = self
            .repo
            .update_task_status_by_provider_id(provider_task_id, status, audit.clone())
            .await?;
        info!(task_id = %task.id, provider_task_id, status = %status, "task status updated");
        Ok(Audited::new(task, audit))
    }

    pub async fn get_task(&self, id: Uuid) -> TradeResult<Task> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| TradeError::not_found("task", id))
    }

    pub async fn list_tasks(&self) -> TradeResult<Vec<Task>> {
        Ok(self.repo.list_tasks().await?)
    }

    pub async fn capture_evidence(
        &self,
        task_id: Uuid,
        input: EvidenceInput,
        actor_id: &str,
    ) -> TradeResult<Audited<Evidence>> {
        let media_url = input.media_url.trim().to_string();
        if media_url.is_empty() {
            return Err(TradeError::validation("media_url is required"));
        }
        let captured_at = match input.captured_at.as_deref() {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                TradeError::validation("captured_at must be a valid ISO-8601 timestamp")
            })?,
            None => Utc::now(),
        };
        let checksum = match input.checksum {
            Some(supplied) => {
                let supplied = supplied.trim().to_string();
                if supplied.is_empty() {
                    return Err(TradeError::validation("checksum must not be blank when supplied"));
                }
                supplied
            }
            None => evidence_checksum(&media_url, captured_at),
        };

        let evidence = Evidence {
            id: Uuid::new_v4(),
            task_id,
            media_url,
            checksum,
            geotag: input.geotag.filter(|g| !g.trim().is_empty()),
            captured_at,
        };
        let audit = AuditEvent::new("evidence.captured", "task", task_id)
            .by(actor_id)
            .with("evidence_id", evidence.id.to_string())
            .with("checksum", evidence.checksum.as_str());
        let stored = self.repo.create_evidence(evidence, audit.clone()).await?;
        info!(%task_id, evidence_id = %stored.id, "evidence captured");
        Ok(Audited::new(stored, audit))
    }

    /// Evidence for a task, newest capture first.
    pub async fn list_evidence(&self, task_id: Uuid) -> TradeResult<Vec<Evidence>> {
        Ok(self.repo.list_evidence(task_id).await?)
    }
}
