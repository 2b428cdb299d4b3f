//! Run fingerprinting: deterministic identity of a resolved strategy.
//!
//! - `StrategyDefinition`: signal pipeline + engine config, everything a run depends on
//!   besides the candles.
//! - `ConfigHash`: BLAKE3 over the canonical JSON of a definition.
//! - `RunKey`: config hash + candle range hash, the key of the run cache.

use crate::domain::{CandleStore, ConfigHash, RangeHash, StrategyConfig};
use crate::signals::PipelineSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully-resolved strategy: no free parameters remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub pipeline: PipelineSpec,
    pub config: StrategyConfig,
}

impl StrategyDefinition {
    pub fn new(pipeline: PipelineSpec, config: StrategyConfig) -> Self {
        Self { pipeline, config }
    }

    /// Hash of the canonical serialization.
    ///
    /// Struct fields serialize in declaration order and maps are never used in
    /// these types, so equal definitions always produce equal JSON.
    pub fn config_hash(&self) -> ConfigHash {
        match serde_json::to_vec(self) {
            Ok(json) => ConfigHash::from_bytes(&json),
            // Non-finite floats are the only thing serde_json rejects here;
            // fall back to the Debug form so the hash stays total.
            Err(_) => ConfigHash::from_bytes(format!("{self:?}").as_bytes()),
        }
    }
}

/// Identity of one engine run: what was run, over which candles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub config: ConfigHash,
    pub range: RangeHash,
}

impl RunKey {
    pub fn new(definition: &StrategyDefinition, candles: &CandleStore) -> Self {
        Self {
            config: definition.config_hash(),
            range: candles.range_hash(),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = |s: &str| s.chars().take(12).collect::<String>();
        write!(f, "{}@{}", short(&self.config.0), short(&self.range.0))
    }
}
