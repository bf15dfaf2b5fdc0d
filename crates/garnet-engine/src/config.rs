//! Engine configuration
//!
//! `EngineConfig` holds every tunable the engine reads at run time. It can be
//! built in code, taken from `Default`, or loaded from JSON.

use serde::{Deserialize, Serialize};

/// Tunables for the interpreter and the node specializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum arms in a polymorphic inline cache before going megamorphic
    pub inline_cache_size: usize,
    /// Rewrites a single node may perform before it settles on its generic form
    pub max_node_rewrites: u64,
    /// Calls before a tiered method switches to its node body
    pub tier_up_call_threshold: u32,
    /// Backward jumps before a tiered method switches to its node body
    pub tier_up_loop_threshold: u32,
    /// Maximum nested method invocations per thread
    pub max_call_depth: usize,
    /// Log every interpreted instruction at trace level
    pub trace_instructions: bool,
}

impl EngineConfig {
    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// Serialize this config to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Policy view used by the node specializer
    pub fn specialization_policy(&self) -> SpecializationPolicy {
        SpecializationPolicy {
            max_cache_arms: self.inline_cache_size.max(1),
            max_rewrites: self.max_node_rewrites,
        }
    }

    /// Policy view used for tier-up decisions
    pub fn tier_policy(&self) -> TierPolicy {
        TierPolicy {
            call_threshold: self.tier_up_call_threshold,
            loop_threshold: self.tier_up_loop_threshold,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inline_cache_size: 8,
            max_node_rewrites: 16,
            tier_up_call_threshold: 1000,
            tier_up_loop_threshold: 10_000,
            max_call_depth: 10_000,
            trace_instructions: false,
        }
    }
}

/// Limits on node rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecializationPolicy {
    /// Arms a dispatch node may cache before going megamorphic
    pub max_cache_arms: usize,
    /// Replacements a node slot may see before it stops specializing
    pub max_rewrites: u64,
}

impl SpecializationPolicy {
    /// Whether a slot that has been replaced `rewrites` times may be replaced again
    pub fn may_rewrite(&self, rewrites: u64) -> bool {
        rewrites < self.max_rewrites
    }
}

impl Default for SpecializationPolicy {
    fn default() -> Self {
        EngineConfig::default().specialization_policy()
    }
}

/// Thresholds for switching a tiered method from IR to its node body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Call count threshold
    pub call_threshold: u32,
    /// Loop iteration threshold
    pub loop_threshold: u32,
}

impl Default for TierPolicy {
    fn default() -> Self {
        EngineConfig::default().tier_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.inline_cache_size, 8);
        assert_eq!(config.tier_up_call_threshold, 1000);
        assert!(!config.trace_instructions);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "inline_cache_size": 2 }"#).unwrap();
        assert_eq!(config.inline_cache_size, 2);
        assert_eq!(config.max_node_rewrites, 16);
        assert_eq!(config.specialization_policy().max_cache_arms, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = EngineConfig::default();
        config.trace_instructions = true;
        config.max_call_depth = 64;
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_zero_cache_size_clamped() {
        let config = EngineConfig {
            inline_cache_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.specialization_policy().max_cache_arms, 1);
    }

    #[test]
    fn test_rewrite_budget() {
        let policy = SpecializationPolicy {
            max_cache_arms: 4,
            max_rewrites: 2,
        };
        assert!(policy.may_rewrite(0));
        assert!(policy.may_rewrite(1));
        assert!(!policy.may_rewrite(2));
    }
}
