//! Task-provider contracts plus the HTTP and local provider implementations.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info_span, warn, Instrument};
use tradeup_core::{Payload, TaskKind, TradeError};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tradeup-adapters";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub assignee: Option<String>,
    #[serde(default)]
    pub metadata: Payload,
}

/// Identifiers handed back by a provider for a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTicket {
    pub provider: String,
    pub provider_task_id: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected task with http status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider call cancelled")]
    Cancelled,
}

impl From<ProviderError> for TradeError {
    fn from(err: ProviderError) -> Self {
        TradeError::Upstream(err.to_string())
    }
}

#[async_trait]
pub trait TaskProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_task(&self, request: &TaskRequest) -> Result<ProviderTicket, ProviderError>;
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run a provider call bounded by `timeout` and abandon it as soon as `cancel` fires.
pub async fn create_task_with_deadline(
    provider: &dyn TaskProvider,
    request: &TaskRequest,
    timeout: Duration,
    cancel: &CancelSignal,
) -> Result<ProviderTicket, ProviderError> {
    let mut cancel = cancel.clone();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        outcome = tokio::time::timeout(timeout, provider.create_task(request)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        },
    }
}

/// Provider for tasks executed by in-house operators; ids are minted locally.
#[derive(Debug, Default, Clone)]
pub struct LocalTaskProvider;

#[async_trait]
impl TaskProvider for LocalTaskProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_task(&self, _request: &TaskRequest) -> Result<ProviderTicket, ProviderError> {
        Ok(ProviderTicket {
            provider: self.name().to_string(),
            provider_task_id: format!("local-{}", Uuid::new_v4()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            base_url: "http://localhost:8089".to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
            user_agent: Some("tradeup/0.1".to_string()),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    #[serde(alias = "task_id", alias = "taskId")]
    id: String,
}

/// Dispatches tasks to a remote execution service over JSON/HTTP.
#[derive(Debug)]
pub struct HttpTaskProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpTaskProvider {
    pub fn new(config: HttpProviderConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_once(
        &self,
        request: &TaskRequest,
        idempotency_key: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .client
            .post(self.tasks_url())
            .header("Idempotency-Key", idempotency_key)
            .json(request);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }
        builder.send().await
    }
}

#[async_trait]
impl TaskProvider for HttpTaskProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn create_task(&self, request: &TaskRequest) -> Result<ProviderTicket, ProviderError> {
        let idempotency_key = Uuid::new_v4().to_string();
        let span = info_span!("provider_create_task", provider = %self.config.name, kind = %request.kind);
        self.dispatch(request, &idempotency_key)
            .instrument(span)
            .await
    }
}

impl HttpTaskProvider {
    /// POST the task, retrying transient failures with the same idempotency key.
    async fn dispatch(
        &self,
        request: &TaskRequest,
        idempotency_key: &str,
    ) -> Result<ProviderTicket, ProviderError> {
        let backoff = self.config.backoff;
        for attempt in 0..=backoff.max_retries {
            let resp = match self.post_once(request, idempotency_key).await {
                Ok(resp) => resp,
                Err(err) if err.is_timeout() => {
                    return Err(ProviderError::Timeout(self.config.timeout));
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(attempt, error = %err, "provider request failed; retrying");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(ProviderError::Http(err));
                }
            };

            let status = resp.status();
            if status.is_success() {
                let created: CreatedTask = resp
                    .json()
                    .await
                    .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
                if created.id.trim().is_empty() {
                    return Err(ProviderError::InvalidResponse("empty task id".to_string()));
                }
                return Ok(ProviderTicket {
                    provider: self.config.name.clone(),
                    provider_task_id: created.id,
                });
            }

            if classify_status(status) == RetryDisposition::Retryable
                && attempt < backoff.max_retries
            {
                warn!(attempt, status = status.as_u16(), "provider returned retryable status");
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Err(ProviderError::InvalidResponse(
            "retry loop exhausted without a response".to_string(),
        ))
    }
}

/// Build the provider named by configuration.
pub fn provider_for_name(
    name: &str,
    http: HttpProviderConfig,
) -> anyhow::Result<Box<dyn TaskProvider>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "local" | "" => Ok(Box::new(LocalTaskProvider)),
        "http" => Ok(Box::new(HttpTaskProvider::new(http)?)),
        other => bail!("no task provider registered for {other}"),
    }
}
