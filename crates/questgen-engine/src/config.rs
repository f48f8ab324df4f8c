//! Engine configuration.
//!
//! Every constant the search depends on lives here so it can be calibrated
//! from a JSON file without touching code. Defaults reproduce the values the
//! CLEVR-style generators ship with.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub sampling: SamplingConfig,
    pub relate: RelateConfig,
    pub render: RenderConfig,
    pub counters: CounterConfig,
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fraction = self.relate.trivial_fraction;
        if !(0.0..1.0).contains(&fraction) {
            return Err(EngineError::Config(format!(
                "relate.trivial_fraction must be in [0, 1), got {fraction}"
            )));
        }
        let keep = self.render.optional_keep_probability;
        if !(0.0..=1.0).contains(&keep) {
            return Err(EngineError::Config(format!(
                "render.optional_keep_probability must be in [0, 1], got {keep}"
            )));
        }
        let sampling = &self.sampling;
        for (name, ratio) in [
            ("leader_ratio", sampling.leader_ratio),
            ("leader_fraction", sampling.leader_fraction),
            ("median_ratio", sampling.median_ratio),
        ] {
            if !ratio.is_finite() || ratio < 0.0 {
                return Err(EngineError::Config(format!(
                    "sampling.{name} must be finite and non-negative, got {ratio}"
                )));
            }
        }
        if sampling.leader_fraction > 1.0 {
            return Err(EngineError::Config(format!(
                "sampling.leader_fraction must be at most 1, got {}",
                sampling.leader_fraction
            )));
        }
        if sampling.min_leader_rank == 0 {
            return Err(EngineError::Config(
                "sampling.min_leader_rank must be at least 1".to_string(),
            ));
        }
        if self.search.max_instances == Some(0) {
            return Err(EngineError::Config(
                "search.max_instances must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Stop once this many instantiations are accepted; `None` runs the search
    /// to exhaustion.
    pub max_instances: Option<usize>,
    /// How many times an exhausted search may be reseeded from the root.
    pub max_retries: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_instances: Some(1),
            max_retries: 2,
        }
    }
}

/// Rejection-sampling thresholds that keep the answer distribution flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// A candidate may not exceed this multiple of the reference peer count.
    pub leader_ratio: f64,
    /// Rank of the reference peer as a fraction of the answer count...
    pub leader_fraction: f64,
    /// ...but never closer to the top than this rank.
    pub min_leader_rank: usize,
    /// A candidate may not exceed this multiple of the median count...
    pub median_ratio: f64,
    /// ...with the median floored at this value.
    pub median_floor: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            leader_ratio: 1.1,
            leader_fraction: 0.15,
            min_leader_rank: 2,
            median_ratio: 5.0,
            median_floor: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelateConfig {
    /// Share of trivial relate/filter pairs among the options offered.
    pub trivial_fraction: f64,
}

impl Default for RelateConfig {
    fn default() -> Self {
        Self {
            trivial_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Probability that a `[bracketed]` text segment is kept.
    pub optional_keep_probability: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            optional_keep_probability: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Integer-answer templates start with counters for `0..integer_answers`.
    pub integer_answers: i64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            integer_answers: 10,
        }
    }
}
