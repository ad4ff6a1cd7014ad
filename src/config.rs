//! Kernel configuration.
//!
//! Hierarchical merging, lowest to highest precedence:
//! 1. Programmatic defaults
//! 2. `.empirica/config.yaml` (project config)
//! 3. `.empirica/local.yaml` (local overrides)
//! 4. `EMPIRICA_`-prefixed environment variables
//!
//! Configuration is project-local so several kernels on one machine can run
//! against different projects.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::BudgetThresholds;
use crate::services::attention::AttentionConfig;
use crate::services::cascade::CascadeConfig;
use crate::services::grounded_calibration::CalibrationConfig;
use crate::services::orchestrator::OrchestratorConfig;
use crate::services::rollup::RollupConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid threshold ordering: caveat ({caveat}) must be below proceed ({proceed})")]
    InvalidThresholds { caveat: f64, proceed: f64 },

    #[error("Invalid max_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Invalid {field}: {value}. Must be within [0, 1]")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("Zone budgets ({zones}) exceed total capacity ({total})")]
    ZoneOverflow { zones: u64, total: u64 },

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".empirica/sessions.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    pub level: String,
    /// json or pretty.
    pub format: String,
    /// Optional directory for file output.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

/// Optional vector backend endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorBackendConfig {
    pub url: Option<String>,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudgetSettings {
    pub total_capacity: u64,
    pub anchor_reserve: u64,
    pub working_set_target: u64,
    pub cache_limit: u64,
    pub eviction_aggressiveness: f64,
    pub decay_rate: f64,
    pub min_priority_threshold: f64,
    pub pressure_threshold: f64,
}

impl Default for ContextBudgetSettings {
    fn default() -> Self {
        let t = BudgetThresholds::default();
        Self {
            total_capacity: t.total_capacity,
            anchor_reserve: t.anchor_reserve,
            working_set_target: t.working_set_target,
            cache_limit: t.cache_limit,
            eviction_aggressiveness: t.eviction_aggressiveness,
            decay_rate: t.decay_rate,
            min_priority_threshold: t.min_priority_threshold,
            pressure_threshold: t.pressure_threshold,
        }
    }
}

impl From<&ContextBudgetSettings> for BudgetThresholds {
    fn from(s: &ContextBudgetSettings) -> Self {
        Self {
            total_capacity: s.total_capacity,
            anchor_reserve: s.anchor_reserve,
            working_set_target: s.working_set_target,
            cache_limit: s.cache_limit,
            eviction_aggressiveness: s.eviction_aggressiveness,
            decay_rate: s.decay_rate,
            min_priority_threshold: s.min_priority_threshold,
            pressure_threshold: s.pressure_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    pub max_recalibration_cycles: u32,
    pub confidence_threshold_proceed: f64,
    pub confidence_threshold_caveat: f64,
    pub calibration_tolerance: f64,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        let c = CascadeConfig::default();
        Self {
            max_recalibration_cycles: c.max_recalibration_cycles,
            confidence_threshold_proceed: c.confidence_threshold_proceed,
            confidence_threshold_caveat: c.confidence_threshold_caveat,
            calibration_tolerance: c.calibration_tolerance,
        }
    }
}

impl From<&CascadeSettings> for CascadeConfig {
    fn from(s: &CascadeSettings) -> Self {
        Self {
            max_recalibration_cycles: s.max_recalibration_cycles,
            confidence_threshold_proceed: s.confidence_threshold_proceed,
            confidence_threshold_caveat: s.confidence_threshold_caveat,
            calibration_tolerance: s.calibration_tolerance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionSettings {
    pub default_total: u32,
    pub dead_end_penalty: f64,
    pub diminishing_rate: f64,
}

impl Default for AttentionSettings {
    fn default() -> Self {
        let a = AttentionConfig::default();
        Self {
            default_total: a.default_total,
            dead_end_penalty: a.dead_end_penalty,
            diminishing_rate: a.diminishing_rate,
        }
    }
}

impl From<&AttentionSettings> for AttentionConfig {
    fn from(s: &AttentionSettings) -> Self {
        Self {
            default_total: s.default_total,
            dead_end_penalty: s.dead_end_penalty,
            diminishing_rate: s.diminishing_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupSettings {
    pub min_score: f64,
    pub jaccard_threshold: f64,
}

impl Default for RollupSettings {
    fn default() -> Self {
        let r = RollupConfig::default();
        Self {
            min_score: r.min_score,
            jaccard_threshold: r.jaccard_threshold,
        }
    }
}

impl From<&RollupSettings> for RollupConfig {
    fn from(s: &RollupSettings) -> Self {
        Self {
            min_score: s.min_score,
            jaccard_threshold: s.jaccard_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub grounded_observation_variance: f64,
    pub max_correction: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        let c = CalibrationConfig::default();
        Self {
            grounded_observation_variance: c.observation_variance,
            max_correction: c.max_correction,
        }
    }
}

impl From<&CalibrationSettings> for CalibrationConfig {
    fn from(s: &CalibrationSettings) -> Self {
        Self {
            observation_variance: s.grounded_observation_variance,
            max_correction: s.max_correction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_agents: usize,
    pub attention_budget_default_total: u32,
    pub round_timeout_secs: u64,
    pub max_rounds: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let o = OrchestratorConfig::default();
        Self {
            max_agents: o.max_agents,
            attention_budget_default_total: o.total_budget,
            round_timeout_secs: o.round_timeout.as_secs(),
            max_rounds: o.max_rounds,
        }
    }
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(s: &OrchestratorSettings) -> Self {
        Self {
            max_agents: s.max_agents,
            total_budget: s.attention_budget_default_total,
            max_rounds: s.max_rounds,
            round_timeout: std::time::Duration::from_secs(s.round_timeout_secs),
        }
    }
}

/// Root configuration for the kernel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub context_budget: ContextBudgetSettings,
    pub cascade: CascadeSettings,
    pub attention: AttentionSettings,
    pub rollup: RollupSettings,
    pub calibration: CalibrationSettings,
    pub orchestrator: OrchestratorSettings,
    pub vector_backend: VectorBackendConfig,
}

impl KernelConfig {
    /// Load with hierarchical merging from the project directory.
    pub fn load() -> Result<Self, ConfigError> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(".empirica/config.yaml"))
            .merge(Yaml::file(".empirica/local.yaml"))
            .merge(Env::prefixed("EMPIRICA_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a single file (plus defaults).
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config: KernelConfig = Figment::new()
            .merge(Serialized::defaults(KernelConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if self.orchestrator.max_agents == 0 || self.orchestrator.max_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(self.orchestrator.max_agents));
        }
        if self.cascade.confidence_threshold_caveat >= self.cascade.confidence_threshold_proceed {
            return Err(ConfigError::InvalidThresholds {
                caveat: self.cascade.confidence_threshold_caveat,
                proceed: self.cascade.confidence_threshold_proceed,
            });
        }

        for (field, value) in [
            ("eviction_aggressiveness", self.context_budget.eviction_aggressiveness),
            ("pressure_threshold", self.context_budget.pressure_threshold),
            ("min_priority_threshold", self.context_budget.min_priority_threshold),
            ("confidence_threshold_proceed", self.cascade.confidence_threshold_proceed),
            ("confidence_threshold_caveat", self.cascade.confidence_threshold_caveat),
            ("calibration_tolerance", self.cascade.calibration_tolerance),
            ("rollup_min_score", self.rollup.min_score),
            ("rollup_jaccard_threshold", self.rollup.jaccard_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }

        let zones = self.context_budget.anchor_reserve
            + self.context_budget.working_set_target
            + self.context_budget.cache_limit;
        if zones > self.context_budget.total_capacity {
            return Err(ConfigError::ZoneOverflow {
                zones,
                total: self.context_budget.total_capacity,
            });
        }
        Ok(())
    }

    pub fn budget_thresholds(&self) -> BudgetThresholds {
        (&self.context_budget).into()
    }

    pub fn cascade_config(&self) -> CascadeConfig {
        (&self.cascade).into()
    }

    pub fn attention_config(&self) -> AttentionConfig {
        (&self.attention).into()
    }

    pub fn rollup_config(&self) -> RollupConfig {
        (&self.rollup).into()
    }

    pub fn calibration_config(&self) -> CalibrationConfig {
        (&self.calibration).into()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        (&self.orchestrator).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = KernelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.context_budget.total_capacity, 200_000);
        assert_eq!(config.cascade.max_recalibration_cycles, 5);
        assert_eq!(config.attention.default_total, 20);
        assert_eq!(config.rollup.min_score, 0.3);
        assert_eq!(config.calibration.grounded_observation_variance, 0.05);
        assert_eq!(config.orchestrator.max_agents, 5);
        assert_eq!(config.orchestrator.round_timeout_secs, 120);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = KernelConfig::default();
        config.cascade.confidence_threshold_caveat = 0.9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn test_zone_overflow_rejected() {
        let mut config = KernelConfig::default();
        config.context_budget.total_capacity = 100_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZoneOverflow { .. })
        ));
    }

    #[test]
    fn test_unit_range_enforced() {
        let mut config = KernelConfig::default();
        config.rollup.min_score = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange { .. })
        ));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EMPIRICA_CASCADE__MAX_RECALIBRATION_CYCLES", "7");
            let config = KernelConfig::load().expect("config should load");
            assert_eq!(config.cascade.max_recalibration_cycles, 7);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_merging() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir(".empirica")?;
            jail.create_file(
                ".empirica/config.yaml",
                "context_budget:\n  total_capacity: 300000\n",
            )?;
            let config = KernelConfig::load().expect("config should load");
            assert_eq!(config.context_budget.total_capacity, 300_000);
            // Untouched settings stay at defaults.
            assert_eq!(config.context_budget.anchor_reserve, 15_000);
            Ok(())
        });
    }
}
