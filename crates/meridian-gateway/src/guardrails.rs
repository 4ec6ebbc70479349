//! Guardrails: cost-based admission control for ad-hoc console queries.
//!
//! Limits are read from instance variables per request and never mutated
//! afterwards. A limit of zero disables its check. Cost estimation is an
//! optional engine capability; a missing capability, a failed estimate, or
//! an unsupported estimate all fail open — the query runs.

use std::collections::HashMap;

use meridian_common::proto::CostEstimate;
use tracing::{debug, warn};

use crate::runtime::OlapEngine;

pub const DEFAULT_SOFT_LIMIT_BYTES_SCANNED: i64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_HARD_LIMIT_BYTES_SCANNED: i64 = 100 * 1024 * 1024 * 1024;
pub const DEFAULT_SOFT_LIMIT_RUNTIME_MS: i64 = 60_000;
pub const DEFAULT_HARD_LIMIT_RUNTIME_MS: i64 = 600_000;

pub const SOFT_LIMIT_BYTES_VAR: &str = "query_console.soft_limit_bytes_scanned";
pub const HARD_LIMIT_BYTES_VAR: &str = "query_console.hard_limit_bytes_scanned";
pub const SOFT_LIMIT_RUNTIME_VAR: &str = "query_console.soft_limit_runtime_ms";
pub const HARD_LIMIT_RUNTIME_VAR: &str = "query_console.hard_limit_runtime_ms";

/// Per-request guardrail thresholds. Zero disables the corresponding tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailConfig {
    pub soft_limit_bytes_scanned: i64,
    pub hard_limit_bytes_scanned: i64,
    pub soft_limit_runtime_ms: i64,
    pub hard_limit_runtime_ms: i64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            soft_limit_bytes_scanned: DEFAULT_SOFT_LIMIT_BYTES_SCANNED,
            hard_limit_bytes_scanned: DEFAULT_HARD_LIMIT_BYTES_SCANNED,
            soft_limit_runtime_ms: DEFAULT_SOFT_LIMIT_RUNTIME_MS,
            hard_limit_runtime_ms: DEFAULT_HARD_LIMIT_RUNTIME_MS,
        }
    }
}

impl GuardrailConfig {
    /// Load guardrails from instance variables. Unparseable values fall back
    /// to the defaults; negative values clamp to zero (disabled) since a
    /// query cannot scan negative bytes.
    pub fn load(vars: &HashMap<String, String>) -> Self {
        Self {
            soft_limit_bytes_scanned: load_limit(
                vars,
                SOFT_LIMIT_BYTES_VAR,
                DEFAULT_SOFT_LIMIT_BYTES_SCANNED,
            ),
            hard_limit_bytes_scanned: load_limit(
                vars,
                HARD_LIMIT_BYTES_VAR,
                DEFAULT_HARD_LIMIT_BYTES_SCANNED,
            ),
            soft_limit_runtime_ms: load_limit(
                vars,
                SOFT_LIMIT_RUNTIME_VAR,
                DEFAULT_SOFT_LIMIT_RUNTIME_MS,
            ),
            hard_limit_runtime_ms: load_limit(
                vars,
                HARD_LIMIT_RUNTIME_VAR,
                DEFAULT_HARD_LIMIT_RUNTIME_MS,
            ),
        }
    }
}

fn load_limit(vars: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    match vars.get(key) {
        Some(raw) => raw.parse::<i64>().map(|v| v.max(0)).unwrap_or(default),
        None => default,
    }
}

/// Check the soft (warn) limit. Returns whether it tripped and the warning
/// message. Sitting exactly at the limit trips.
pub fn check_soft_limit(estimated_bytes: i64, config: &GuardrailConfig) -> (bool, String) {
    if estimated_bytes <= 0 || config.soft_limit_bytes_scanned == 0 {
        return (false, String::new());
    }
    if estimated_bytes >= config.soft_limit_bytes_scanned {
        return (
            true,
            format!(
                "estimated scan of {} bytes is at or above the configured soft limit of {} bytes; resubmit with the cost override to run anyway",
                estimated_bytes, config.soft_limit_bytes_scanned
            ),
        );
    }
    (false, String::new())
}

/// Check the hard (block) limit. The only unconditional veto in the system:
/// no override flag can bypass it. Sitting exactly at the limit trips.
pub fn check_hard_limit(estimated_bytes: i64, config: &GuardrailConfig) -> (bool, String) {
    if estimated_bytes <= 0 || config.hard_limit_bytes_scanned == 0 {
        return (false, String::new());
    }
    if estimated_bytes >= config.hard_limit_bytes_scanned {
        return (
            true,
            format!(
                "estimated scan of {} bytes is at or above the configured hard limit of {} bytes",
                estimated_bytes, config.hard_limit_bytes_scanned
            ),
        );
    }
    (false, String::new())
}

/// Terminal admission decision for one console query.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Allow { bytes_scanned: i64 },
    Warn { bytes_scanned: i64, message: String },
    Block { bytes_scanned: i64, reason: String },
}

/// Run the admission state machine: estimate, hard check, soft check.
///
/// There is no retry loop here; a `Warn` outcome requires the caller to
/// resubmit with `confirm_override` set to reach `Allow`.
pub async fn admit(
    engine: &dyn OlapEngine,
    instance_id: &str,
    sql: &str,
    config: &GuardrailConfig,
    confirm_override: bool,
) -> AdmissionDecision {
    let estimator = match engine.cost_estimator() {
        Some(estimator) => estimator,
        None => {
            debug!(
                connector = engine.connector(),
                "engine does not support cost estimation, allowing query"
            );
            return AdmissionDecision::Allow { bytes_scanned: 0 };
        }
    };

    let estimate: CostEstimate = match estimator.estimate_query_cost(instance_id, sql).await {
        Ok(estimate) => estimate,
        Err(err) => {
            warn!(error = %err, instance_id, "cost estimation failed, allowing query");
            return AdmissionDecision::Allow { bytes_scanned: 0 };
        }
    };

    if !estimate.supported {
        debug!(instance_id, "cost estimate not supported for this query, allowing");
        return AdmissionDecision::Allow { bytes_scanned: 0 };
    }

    let bytes_scanned = estimate.bytes_scanned;

    let (blocked, reason) = check_hard_limit(bytes_scanned, config);
    if blocked {
        return AdmissionDecision::Block {
            bytes_scanned,
            reason,
        };
    }

    if !confirm_override {
        let (exceeded, message) = check_soft_limit(bytes_scanned, config);
        if exceeded {
            return AdmissionDecision::Warn {
                bytes_scanned,
                message,
            };
        }
    }

    AdmissionDecision::Allow { bytes_scanned }
}
