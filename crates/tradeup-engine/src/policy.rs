use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use tradeup_core::{AuditEvent, Audited, PolicyDecision, PolicyRule, TradeError, TradeResult};

use crate::normalize::normalize_field;
use crate::Workflow;

pub const DEFAULT_ALLOW_CODE: &str = "POLICY_DEFAULT_ALLOW";
pub const DEFAULT_ALLOW_REASON: &str = "No explicit deny rule found";

#[derive(Debug, Clone, Deserialize)]
struct PolicyRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<PolicyRuleSeed>,
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyRuleSeed {
    platform: String,
    action: String,
    allowed: bool,
    reason: String,
    #[serde(default)]
    last_reviewed: Option<NaiveDate>,
}

fn code_fragment(input: &str) -> String {
    input
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn policy_code(platform: &str, action: &str) -> String {
    format!("POLICY_{}_{}", code_fragment(platform), code_fragment(action))
}

fn normalized_pair(platform: &str, action: &str) -> TradeResult<(String, String)> {
    let platform = normalize_field(platform);
    let action = normalize_field(action);
    if platform.is_empty() || action.is_empty() {
        return Err(TradeError::validation("platform and action are required"));
    }
    Ok((platform, action))
}

/// Read a `rules: [...]` seed file; platform and action are normalized on load.
pub fn load_policy_rules(path: &Path) -> Result<Vec<PolicyRule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: PolicyRulesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let today = Utc::now().date_naive();
    file.rules
        .into_iter()
        .map(|seed| -> Result<PolicyRule> {
            let (platform, action) = normalized_pair(&seed.platform, &seed.action)
                .with_context(|| format!("invalid rule in {}", path.display()))?;
            Ok(PolicyRule {
                platform,
                action,
                allowed: seed.allowed,
                reason: seed.reason,
                last_reviewed: seed.last_reviewed.unwrap_or(today),
            })
        })
        .collect()
}

impl Workflow {
    /// Decide whether `actor_id` may perform `action` on `platform`. The
    /// decision is written to the audit log before it is returned, allow or deny.
    pub async fn evaluate_policy(
        &self,
        platform: &str,
        action: &str,
        actor_id: &str,
    ) -> TradeResult<Audited<PolicyDecision>> {
        let (platform, action) = normalized_pair(platform, action)?;
        if actor_id.trim().is_empty() {
            return Err(TradeError::validation("actor id is required"));
        }

        let decision = match self.repo.get_policy_rule(&platform, &action).await? {
            Some(rule) => PolicyDecision {
                policy_code: policy_code(&platform, &action),
                allowed: rule.allowed,
                reason: rule.reason,
                platform,
                action,
                actor_id: actor_id.to_string(),
            },
            None => PolicyDecision {
                policy_code: DEFAULT_ALLOW_CODE.to_string(),
                allowed: true,
                reason: DEFAULT_ALLOW_REASON.to_string(),
                platform,
                action,
                actor_id: actor_id.to_string(),
            },
        };

        let audit = AuditEvent::new(
            "policy.evaluated",
            "policy",
            format!("{}:{}", decision.platform, decision.action),
        )
        .by(actor_id)
        .with("allowed", decision.allowed)
        .with("reason", decision.reason.as_str())
        .with("policy_code", decision.policy_code.as_str());
        let audit = self.repo.append_audit_event(audit).await?;

        if decision.allowed {
            info!(code = %decision.policy_code, actor_id, "policy allowed");
        } else {
            warn!(code = %decision.policy_code, actor_id, reason = %decision.reason, "policy denied");
        }
        Ok(Audited::new(decision, audit))
    }

    pub async fn upsert_policy_rule(
        &self,
        rule: PolicyRule,
        actor_id: &str,
    ) -> TradeResult<Audited<PolicyRule>> {
        let (platform, action) = normalized_pair(&rule.platform, &rule.action)?;
        let rule = PolicyRule {
            platform,
            action,
            ..rule
        };
        let audit = AuditEvent::new(
            "policy.rule_upserted",
            "policy",
            format!("{}:{}", rule.platform, rule.action),
        )
        .by(actor_id)
        .with("allowed", rule.allowed)
        .with("reason", rule.reason.as_str())
        .with("last_reviewed", rule.last_reviewed.to_string());
        let stored = self.repo.upsert_policy_rule(rule, audit.clone()).await?;
        Ok(Audited::new(stored, audit))
    }

    pub async fn list_policy_rules(&self) -> TradeResult<Vec<PolicyRule>> {
        Ok(self.repo.list_policy_rules().await?)
    }

    /// Upsert every rule from a YAML seed file, returning how many were applied.
    pub async fn seed_policy_rules(&self, path: &Path, actor_id: &str) -> Result<usize> {
        let rules = load_policy_rules(path)?;
        let count = rules.len();
        for rule in rules {
            let key = format!("{}:{}", rule.platform, rule.action);
            self.upsert_policy_rule(rule, actor_id)
                .await
                .with_context(|| format!("seeding policy rule {key}"))?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn code_is_uppercased_with_underscores() {
        assert_eq!(
            policy_code("facebook marketplace", "send-offer"),
            "POLICY_FACEBOOK_MARKETPLACE_SEND_OFFER"
        );
        assert_eq!(policy_code("ebay", "auto_bid"), "POLICY_EBAY_AUTO_BID");
    }

    #[test]
    fn seed_file_rules_are_normalized() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "version: 1\nrules:\n  - platform: \" Craigslist \"\n    action: Auto  Message\n    allowed: false\n    reason: Automated messaging violates terms\n    last_reviewed: 2026-01-15\n  - platform: ebay\n    action: send_offer\n    allowed: true\n    reason: Manual offers permitted\n"
        )
        .unwrap();

        let rules = load_policy_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].platform, "craigslist");
        assert_eq!(rules[0].action, "auto message");
        assert!(!rules[0].allowed);
        assert_eq!(
            rules[0].last_reviewed,
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
        );
        assert!(rules[1].allowed);
    }

    #[test]
    fn shipped_rules_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../rules/policy.yaml");
        let rules = load_policy_rules(&path).unwrap();
        assert!(rules
            .iter()
            .any(|r| r.platform == "craigslist" && r.action == "auto_message" && !r.allowed));
    }

    #[test]
    fn missing_seed_file_reports_path() {
        let err = load_policy_rules(Path::new("/nonexistent/policy.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/policy.yaml"));
    }
}
