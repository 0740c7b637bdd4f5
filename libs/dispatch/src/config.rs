//! Dispatch configuration.
//!
//! Loaded from the runtime's TOML config tree by the process bootstrap;
//! every field has a default so a missing `[dispatch]` section works.

use serde::Deserialize;

/// Tunables for the actor task dispatch layer.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// How long a task failed by a transport error waits for an
    /// authoritative cause of death before it is failed to the task
    /// tracker. Zero disables the grace window entirely.
    #[serde(default = "default_wait_for_death_info_grace_ms")]
    pub wait_for_death_info_grace_ms: u64,

    /// In-flight reply count at which the excess-queueing warning hook
    /// first fires. The threshold doubles after each warning.
    #[serde(default = "default_queueing_warn_threshold")]
    pub queueing_warn_threshold: usize,
}

fn default_wait_for_death_info_grace_ms() -> u64 {
    60_000
}

fn default_queueing_warn_threshold() -> usize {
    5_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait_for_death_info_grace_ms: default_wait_for_death_info_grace_ms(),
            queueing_warn_threshold: default_queueing_warn_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.wait_for_death_info_grace_ms, 60_000);
        assert_eq!(config.queueing_warn_threshold, 5_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DispatchConfig = toml::from_str("wait_for_death_info_grace_ms = 250").unwrap();
        assert_eq!(config.wait_for_death_info_grace_ms, 250);
        assert_eq!(config.queueing_warn_threshold, 5_000);
    }

    #[test]
    fn test_full_toml() {
        let config: DispatchConfig = toml::from_str(
            "wait_for_death_info_grace_ms = 0\nqueueing_warn_threshold = 16",
        )
        .unwrap();
        assert_eq!(config.wait_for_death_info_grace_ms, 0);
        assert_eq!(config.queueing_warn_threshold, 16);
    }
}
