use std::path::PathBuf;
use std::time::Duration;

use tradeup_adapters::HttpProviderConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared token webhook callers must present; empty rejects every callback.
    pub webhook_secret: String,
    pub provider_timeout_secs: u64,
    pub seed_cost: f64,
    pub task_provider: String,
    pub provider_url: String,
    pub provider_token: Option<String>,
    pub policy_rules_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            provider_timeout_secs: 10,
            seed_cost: 1.0,
            task_provider: "local".to_string(),
            provider_url: "http://localhost:8089".to_string(),
            provider_token: None,
            policy_rules_path: PathBuf::from("rules/policy.yaml"),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            webhook_secret: std::env::var("TRADEUP_WEBHOOK_SECRET").unwrap_or_default(),
            provider_timeout_secs: std::env::var("TRADEUP_PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.provider_timeout_secs),
            seed_cost: std::env::var("TRADEUP_SEED_COST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.seed_cost),
            task_provider: std::env::var("TRADEUP_TASK_PROVIDER")
                .unwrap_or(defaults.task_provider),
            provider_url: std::env::var("TRADEUP_PROVIDER_URL").unwrap_or(defaults.provider_url),
            provider_token: std::env::var("TRADEUP_PROVIDER_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            policy_rules_path: std::env::var("TRADEUP_POLICY_RULES")
                .map(PathBuf::from)
                .unwrap_or(defaults.policy_rules_path),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    /// Seed cost used as the value-multiple denominator; non-positive values fall back to 1.
    pub fn effective_seed_cost(&self) -> f64 {
        if self.seed_cost.is_finite() && self.seed_cost > 0.0 {
            self.seed_cost
        } else {
            1.0
        }
    }

    pub fn http_provider_config(&self) -> HttpProviderConfig {
        HttpProviderConfig {
            base_url: self.provider_url.clone(),
            api_token: self.provider_token.clone(),
            timeout: self.provider_timeout(),
            ..Default::default()
        }
    }
}
