//! Controller tuning and diff-policy configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::reconciler::diff::Compare;
use crate::reconciler::dns::DnsDiffPolicy;
use crate::reconciler::run::RunDiffPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Timing knobs shared by every reconciler and controller loop.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Requeue delay while an operation is in flight.
    pub short_retry: Duration,
    /// Requeue delay once the remote resource is in sync.
    pub steady_interval: Duration,
    /// Upper bound for a single provider call.
    pub request_timeout: Duration,
    /// First delay after a retryable error; doubles per consecutive failure.
    pub error_backoff: Duration,
    pub max_error_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            short_retry: Duration::from_secs(1),
            steady_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
            max_error_backoff: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Delay before retrying after `failures` consecutive retryable errors.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.error_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_error_backoff)
    }
}

/// One `kind.field=compare` override, e.g. `run.traffic=exact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedField {
    pub kind: String,
    pub field: String,
    pub compare: Compare,
}

impl FromStr for TrackedField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidField {
            field: s.to_string(),
            reason: reason.to_string(),
        };
        let (path, compare) = s.split_once('=').unwrap_or((s, "exact"));
        let (kind, field) = path
            .split_once('.')
            .ok_or_else(|| invalid("expected <kind>.<field>[=<compare>]"))?;
        let compare = compare.trim().parse::<Compare>().map_err(|e| invalid(&e))?;
        Ok(Self {
            kind: kind.trim().to_ascii_lowercase(),
            field: field.trim().to_string(),
            compare,
        })
    }
}

/// Diff policies for every kind, after applying overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffPolicies {
    pub dns: DnsDiffPolicy,
    pub run: RunDiffPolicy,
}

impl DiffPolicies {
    pub fn from_overrides(overrides: &[TrackedField]) -> Result<Self, ConfigError> {
        let mut policies = Self::default();
        for o in overrides {
            let applied = match o.kind.as_str() {
                "dns" => policies.dns.set(&o.field, o.compare),
                "run" => policies.run.set(&o.field, o.compare),
                other => Err(format!("unknown kind {:?}, expected dns or run", other)),
            };
            applied.map_err(|reason| ConfigError::InvalidField {
                field: format!("{}.{}", o.kind, o.field),
                reason,
            })?;
        }
        Ok(policies)
    }
}
