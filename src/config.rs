//! Runtime knobs for the provenance core.
//!
//! Defaults match the documented environment contract; every field can be
//! overridden through `TANGENT_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::model::Role;

/// Hard floor for the lease TTL when read from the environment. A TTL
/// below this makes a slow stream lose its lease between heartbeats.
pub const MIN_LEASE_TTL_SECS: u64 = 10;

/// Which role merge-summary messages are attributed to during context
/// assembly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeAttribution {
    User,
    #[default]
    Assistant,
}

impl MergeAttribution {
    pub fn role(&self) -> Role {
        match self {
            MergeAttribution::User => Role::User,
            MergeAttribution::Assistant => Role::Assistant,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoreConfig {
    /// Lease time-to-live in seconds.
    pub lease_ttl_secs: u64,
    /// Bound on waiting for the per-ref write lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Default page size for history reads and the context window.
    pub history_limit: u64,
    /// Token budget for assembled context, preamble included.
    pub token_limit: usize,
    /// Role that merge-summary messages are attributed to.
    pub merge_attribution: MergeAttribution,
    /// Bounded busy-wait window when starting a turn on a leased ref, in
    /// milliseconds. Zero disables waiting.
    pub lease_wait_ms: u64,
    /// Lease refresh cadence while a stream is in flight, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 120,
            lock_timeout_ms: 3000,
            history_limit: 40,
            token_limit: 8000,
            merge_attribution: MergeAttribution::Assistant,
            lease_wait_ms: 5000,
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl CoreConfig {
    /// Build a config from the defaults plus any `TANGENT_*` overrides
    /// present in the environment. Unparseable values are ignored with a
    /// warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<u64>("TANGENT_LEASE_TTL_SECS") {
            cfg.lease_ttl_secs = v.max(MIN_LEASE_TTL_SECS);
        }
        if let Some(v) = env_parse::<u64>("TANGENT_LOCK_TIMEOUT_MS") {
            cfg.lock_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("TANGENT_HISTORY_LIMIT") {
            cfg.history_limit = v;
        }
        if let Some(v) = env_parse::<usize>("TANGENT_TOKEN_LIMIT") {
            cfg.token_limit = v;
        }
        if let Ok(v) = std::env::var("TANGENT_MERGE_ATTRIBUTION") {
            match v.as_str() {
                "user" => cfg.merge_attribution = MergeAttribution::User,
                "assistant" => cfg.merge_attribution = MergeAttribution::Assistant,
                other => tracing::warn!("Unknown TANGENT_MERGE_ATTRIBUTION: {}", other),
            }
        }
        if let Some(v) = env_parse::<u64>("TANGENT_LEASE_WAIT_MS") {
            cfg.lease_wait_ms = v;
        }
        if let Some(v) = env_parse::<u64>("TANGENT_HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat_interval_ms = v;
        }
        cfg
    }

    pub fn lease_ttl_ms(&self) -> i64 {
        (self.lease_ttl_secs as i64) * 1000
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}: {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.lease_ttl_secs, 120);
        assert_eq!(cfg.lock_timeout_ms, 3000);
        assert_eq!(cfg.history_limit, 40);
        assert_eq!(cfg.token_limit, 8000);
        assert_eq!(cfg.merge_attribution, MergeAttribution::Assistant);
    }

    #[test]
    fn test_ttl_floor_applies_to_env() {
        // Direct construction is unclamped (tests rely on short leases);
        // only the environment path enforces the floor.
        let cfg = CoreConfig {
            lease_ttl_secs: 1,
            ..CoreConfig::default()
        };
        assert_eq!(cfg.lease_ttl_ms(), 1000);
        assert!(MIN_LEASE_TTL_SECS >= 10);
    }
}
