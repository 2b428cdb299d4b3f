//! Signal stage: candles in, one signal per candle out.
//!
//! Signals never see engine state (positions, equity). A strategy's signal
//! logic is a [`PipelineSpec`]: an ordered list of indicator, filter and
//! action stages compiled ahead of time and interpreted by a fixed evaluator.

pub mod pipeline;
pub mod presets;

pub use pipeline::{
    CompiledPipeline, Condition, IndicatorSpec, Operand, PipelineError, PipelineSpec, PriceSource,
    Stage,
};

use serde::{Deserialize, Serialize};

/// What the strategy asks the engine to do at a candle's close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    #[default]
    None,
    EnterLong,
    EnterShort,
    Exit,
    AddSafetyOrder,
}

impl Signal {
    /// Signals that open or grow exposure. Filters gate only these.
    pub fn is_gated(self) -> bool {
        matches!(
            self,
            Signal::EnterLong | Signal::EnterShort | Signal::AddSafetyOrder
        )
    }
}
