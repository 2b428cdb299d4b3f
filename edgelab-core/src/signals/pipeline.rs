//! Pipeline specification, compiler and evaluator.
//!
//! - `PipelineSpec`: serializable, ordered `Stage` list (indicators, then
//!   filters, then actions).
//! - `PipelineSpec::compile()`: validates ordering and references, resolves
//!   indicator keys to slots.
//! - `CompiledPipeline::evaluate()`: precomputes every indicator once, then
//!   walks the candles producing one `Signal` per candle.
//!
//! Operands may look back (`offset`) but never forward, so the signal at
//! candle t depends only on candles `0..=t`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Signal;
use crate::domain::Candle;
use crate::indicators::{self, DonchianBand};

// ─── Specification ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Open,
    High,
    Low,
    #[default]
    Close,
    /// (high + low) / 2
    Hl2,
    /// (high + low + close) / 3
    Hlc3,
}

impl PriceSource {
    pub fn of(self, c: &Candle) -> f64 {
        match self {
            PriceSource::Open => c.open,
            PriceSource::High => c.high,
            PriceSource::Low => c.low,
            PriceSource::Close => c.close,
            PriceSource::Hl2 => (c.high + c.low) / 2.0,
            PriceSource::Hlc3 => (c.high + c.low + c.close) / 3.0,
        }
    }

    fn series(self, candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| self.of(c)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    Sma {
        period: usize,
        #[serde(default)]
        source: PriceSource,
    },
    Ema {
        period: usize,
        #[serde(default)]
        source: PriceSource,
    },
    Rsi {
        period: usize,
        #[serde(default)]
        source: PriceSource,
    },
    Roc {
        period: usize,
        #[serde(default)]
        source: PriceSource,
    },
    Atr {
        period: usize,
    },
    DonchianUpper {
        period: usize,
    },
    DonchianLower {
        period: usize,
    },
}

impl IndicatorSpec {
    pub fn period(&self) -> usize {
        match self {
            IndicatorSpec::Sma { period, .. }
            | IndicatorSpec::Ema { period, .. }
            | IndicatorSpec::Rsi { period, .. }
            | IndicatorSpec::Roc { period, .. }
            | IndicatorSpec::Atr { period }
            | IndicatorSpec::DonchianUpper { period }
            | IndicatorSpec::DonchianLower { period } => *period,
        }
    }

    pub fn set_period(&mut self, value: usize) {
        match self {
            IndicatorSpec::Sma { period, .. }
            | IndicatorSpec::Ema { period, .. }
            | IndicatorSpec::Rsi { period, .. }
            | IndicatorSpec::Roc { period, .. }
            | IndicatorSpec::Atr { period }
            | IndicatorSpec::DonchianUpper { period }
            | IndicatorSpec::DonchianLower { period } => *period = value,
        }
    }

    pub fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        match *self {
            IndicatorSpec::Sma { period, source } => indicators::sma(&source.series(candles), period),
            IndicatorSpec::Ema { period, source } => indicators::ema(&source.series(candles), period),
            IndicatorSpec::Rsi { period, source } => indicators::rsi(&source.series(candles), period),
            IndicatorSpec::Roc { period, source } => indicators::roc(&source.series(candles), period),
            IndicatorSpec::Atr { period } => indicators::atr(candles, period),
            IndicatorSpec::DonchianUpper { period } => {
                indicators::donchian(candles, period, DonchianBand::Upper)
            }
            IndicatorSpec::DonchianLower { period } => {
                indicators::donchian(candles, period, DonchianBand::Lower)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Indicator {
        key: String,
        /// Bars back from the current candle.
        #[serde(default)]
        offset: usize,
    },
    Price {
        #[serde(default)]
        source: PriceSource,
        #[serde(default)]
        offset: usize,
    },
    Constant {
        value: f64,
    },
}

impl Operand {
    pub fn indicator(key: &str) -> Self {
        Operand::Indicator {
            key: key.to_string(),
            offset: 0,
        }
    }

    pub fn close() -> Self {
        Operand::Price {
            source: PriceSource::Close,
            offset: 0,
        }
    }

    pub fn constant(value: f64) -> Self {
        Operand::Constant { value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    GreaterThan { left: Operand, right: Operand },
    LessThan { left: Operand, right: Operand },
    /// left > right now, left <= right on the previous candle.
    CrossAbove { left: Operand, right: Operand },
    /// left < right now, left >= right on the previous candle.
    CrossBelow { left: Operand, right: Operand },
    AllOf { conditions: Vec<Condition> },
    AnyOf { conditions: Vec<Condition> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Indicator { key: String, spec: IndicatorSpec },
    Filter { condition: Condition },
    Action { condition: Condition, signal: Signal },
}

impl Stage {
    fn rank(&self) -> u8 {
        match self {
            Stage::Indicator { .. } => 0,
            Stage::Filter { .. } => 1,
            Stage::Action { .. } => 2,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Stage::Indicator { .. } => "indicator",
            Stage::Filter { .. } => "filter",
            Stage::Action { .. } => "action",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("pipeline has no action stage")]
    NoActions,
    #[error("stage {index}: {stage} stage after a later-phase stage")]
    OutOfOrder { index: usize, stage: &'static str },
    #[error("stage {index}: duplicate indicator key {key:?}")]
    DuplicateKey { index: usize, key: String },
    #[error("stage {index}: unknown indicator key {key:?}")]
    UnknownKey { index: usize, key: String },
    #[error("stage {index}: indicator {key:?} period must be >= 1")]
    ZeroPeriod { index: usize, key: String },
    #[error("stage {index}: non-finite constant {value}")]
    NonFiniteConstant { index: usize, value: f64 },
    #[error("unknown pipeline parameter {0:?}")]
    UnknownParam(String),
    #[error("parameter {name:?}: {value} is not a valid period")]
    InvalidPeriod { name: String, value: f64 },
}

// ─── Parameter access ────────────────────────────────────────────────

impl PipelineSpec {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Tunable parameter names: `"<indicator key>.period"`.
    pub fn param_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter_map(|s| match s {
                Stage::Indicator { key, .. } => Some(format!("{key}.period")),
                _ => None,
            })
            .collect()
    }

    /// Set `"<key>.period"` to `value` (rounded to the nearest integer).
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), PipelineError> {
        let key = name
            .strip_suffix(".period")
            .ok_or_else(|| PipelineError::UnknownParam(name.to_string()))?;
        if !value.is_finite() || value.round() < 1.0 {
            return Err(PipelineError::InvalidPeriod {
                name: name.to_string(),
                value,
            });
        }
        for stage in &mut self.stages {
            if let Stage::Indicator { key: k, spec } = stage {
                if k == key {
                    spec.set_period(value.round() as usize);
                    return Ok(());
                }
            }
        }
        Err(PipelineError::UnknownParam(name.to_string()))
    }
}

// ─── Compilation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Value {
    Series { slot: usize, offset: usize },
    Price { source: PriceSource, offset: usize },
    Constant(f64),
}

#[derive(Debug, Clone)]
enum Check {
    Always,
    Gt(Value, Value),
    Lt(Value, Value),
    CrossAbove(Value, Value),
    CrossBelow(Value, Value),
    All(Vec<Check>),
    Any(Vec<Check>),
}

/// A validated pipeline with indicator keys resolved to slots.
#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    indicators: Vec<IndicatorSpec>,
    filters: Vec<Check>,
    actions: Vec<(Check, Signal)>,
}

impl PipelineSpec {
    pub fn compile(&self) -> Result<CompiledPipeline, PipelineError> {
        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut indicators = Vec::new();
        let mut filters = Vec::new();
        let mut actions = Vec::new();
        let mut max_rank = 0;

        for (index, stage) in self.stages.iter().enumerate() {
            if stage.rank() < max_rank {
                return Err(PipelineError::OutOfOrder {
                    index,
                    stage: stage.label(),
                });
            }
            max_rank = stage.rank();

            match stage {
                Stage::Indicator { key, spec } => {
                    if spec.period() == 0 {
                        return Err(PipelineError::ZeroPeriod {
                            index,
                            key: key.clone(),
                        });
                    }
                    if slots.insert(key.as_str(), indicators.len()).is_some() {
                        return Err(PipelineError::DuplicateKey {
                            index,
                            key: key.clone(),
                        });
                    }
                    indicators.push(spec.clone());
                }
                Stage::Filter { condition } => {
                    filters.push(resolve_condition(condition, &slots, index)?);
                }
                Stage::Action { condition, signal } => {
                    actions.push((resolve_condition(condition, &slots, index)?, *signal));
                }
            }
        }

        if actions.is_empty() {
            return Err(PipelineError::NoActions);
        }
        Ok(CompiledPipeline {
            indicators,
            filters,
            actions,
        })
    }
}

fn resolve_operand(
    op: &Operand,
    slots: &HashMap<&str, usize>,
    index: usize,
) -> Result<Value, PipelineError> {
    match op {
        Operand::Indicator { key, offset } => match slots.get(key.as_str()) {
            Some(&slot) => Ok(Value::Series {
                slot,
                offset: *offset,
            }),
            None => Err(PipelineError::UnknownKey {
                index,
                key: key.clone(),
            }),
        },
        Operand::Price { source, offset } => Ok(Value::Price {
            source: *source,
            offset: *offset,
        }),
        Operand::Constant { value } if value.is_finite() => Ok(Value::Constant(*value)),
        Operand::Constant { value } => Err(PipelineError::NonFiniteConstant {
            index,
            value: *value,
        }),
    }
}

fn resolve_condition(
    cond: &Condition,
    slots: &HashMap<&str, usize>,
    index: usize,
) -> Result<Check, PipelineError> {
    let pair = |l: &Operand, r: &Operand| -> Result<(Value, Value), PipelineError> {
        Ok((resolve_operand(l, slots, index)?, resolve_operand(r, slots, index)?))
    };
    Ok(match cond {
        Condition::Always => Check::Always,
        Condition::GreaterThan { left, right } => {
            let (l, r) = pair(left, right)?;
            Check::Gt(l, r)
        }
        Condition::LessThan { left, right } => {
            let (l, r) = pair(left, right)?;
            Check::Lt(l, r)
        }
        Condition::CrossAbove { left, right } => {
            let (l, r) = pair(left, right)?;
            Check::CrossAbove(l, r)
        }
        Condition::CrossBelow { left, right } => {
            let (l, r) = pair(left, right)?;
            Check::CrossBelow(l, r)
        }
        Condition::AllOf { conditions } => Check::All(
            conditions
                .iter()
                .map(|c| resolve_condition(c, slots, index))
                .collect::<Result<_, _>>()?,
        ),
        Condition::AnyOf { conditions } => Check::Any(
            conditions
                .iter()
                .map(|c| resolve_condition(c, slots, index))
                .collect::<Result<_, _>>()?,
        ),
    })
}

// ─── Evaluation ──────────────────────────────────────────────────────

struct Frame<'a> {
    candles: &'a [Candle],
    series: &'a [Vec<f64>],
}

impl Frame<'_> {
    /// Value at candle `i - back`; NaN before the start of the series.
    fn value(&self, v: Value, i: usize, back: usize) -> f64 {
        match v {
            Value::Constant(x) => x,
            Value::Series { slot, offset } => match i.checked_sub(offset + back) {
                Some(j) => self.series[slot][j],
                None => f64::NAN,
            },
            Value::Price { source, offset } => match i.checked_sub(offset + back) {
                Some(j) => source.of(&self.candles[j]),
                None => f64::NAN,
            },
        }
    }

    // NaN compares false, so warmup never triggers anything.
    fn holds(&self, check: &Check, i: usize) -> bool {
        match check {
            Check::Always => true,
            Check::Gt(l, r) => self.value(*l, i, 0) > self.value(*r, i, 0),
            Check::Lt(l, r) => self.value(*l, i, 0) < self.value(*r, i, 0),
            Check::CrossAbove(l, r) => {
                self.value(*l, i, 0) > self.value(*r, i, 0)
                    && self.value(*l, i, 1) <= self.value(*r, i, 1)
            }
            Check::CrossBelow(l, r) => {
                self.value(*l, i, 0) < self.value(*r, i, 0)
                    && self.value(*l, i, 1) >= self.value(*r, i, 1)
            }
            Check::All(checks) => checks.iter().all(|c| self.holds(c, i)),
            Check::Any(checks) => checks.iter().any(|c| self.holds(c, i)),
        }
    }
}

impl CompiledPipeline {
    /// One signal per candle.
    ///
    /// Per candle the first action whose condition holds wins. Entry and
    /// add-safety-order actions are skipped while any filter fails, in which
    /// case later actions (exits) still get a chance.
    pub fn evaluate(&self, candles: &[Candle]) -> Vec<Signal> {
        let series: Vec<Vec<f64>> = self.indicators.iter().map(|s| s.compute(candles)).collect();
        let frame = Frame {
            candles,
            series: &series,
        };

        (0..candles.len())
            .map(|i| {
                let filters_pass = self.filters.iter().all(|f| frame.holds(f, i));
                self.actions
                    .iter()
                    .find(|(check, signal)| {
                        (filters_pass || !signal.is_gated()) && frame.holds(check, i)
                    })
                    .map_or(Signal::None, |(_, signal)| *signal)
            })
            .collect()
    }

    pub fn indicator_count(&self) -> usize {
        self.indicators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_candles;

    fn sma(key: &str, period: usize) -> Stage {
        Stage::Indicator {
            key: key.into(),
            spec: IndicatorSpec::Sma {
                period,
                source: PriceSource::Close,
            },
        }
    }

    fn action(condition: Condition, signal: Signal) -> Stage {
        Stage::Action { condition, signal }
    }

    #[test]
    fn rejects_filter_before_indicator() {
        let spec = PipelineSpec::new(vec![
            Stage::Filter {
                condition: Condition::Always,
            },
            sma("fast", 2),
            action(Condition::Always, Signal::EnterLong),
        ]);
        assert_eq!(
            spec.compile().unwrap_err(),
            PipelineError::OutOfOrder {
                index: 1,
                stage: "indicator"
            }
        );
    }

    #[test]
    fn rejects_unknown_reference() {
        let spec = PipelineSpec::new(vec![action(
            Condition::GreaterThan {
                left: Operand::indicator("missing"),
                right: Operand::constant(1.0),
            },
            Signal::EnterLong,
        )]);
        assert!(matches!(spec.compile(), Err(PipelineError::UnknownKey { .. })));
    }

    #[test]
    fn rejects_duplicate_keys_and_empty_actions() {
        let dup = PipelineSpec::new(vec![
            sma("a", 2),
            sma("a", 3),
            action(Condition::Always, Signal::EnterLong),
        ]);
        assert!(matches!(dup.compile(), Err(PipelineError::DuplicateKey { .. })));
        assert_eq!(
            PipelineSpec::new(vec![sma("a", 2)]).compile().unwrap_err(),
            PipelineError::NoActions
        );
    }

    #[test]
    fn cross_above_fires_once() {
        // close crosses above the constant 102 at index 3 only
        let candles = make_candles(&[100.0, 101.0, 101.5, 103.0, 104.0, 105.0]);
        let spec = PipelineSpec::new(vec![action(
            Condition::CrossAbove {
                left: Operand::close(),
                right: Operand::constant(102.0),
            },
            Signal::EnterLong,
        )]);
        let signals = spec.compile().unwrap().evaluate(&candles);
        let fired: Vec<usize> = signals
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == Signal::EnterLong)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![3]);
    }

    #[test]
    fn filter_blocks_entries_but_not_exits() {
        let candles = make_candles(&[100.0, 101.0, 102.0]);
        let spec = PipelineSpec::new(vec![
            Stage::Filter {
                condition: Condition::GreaterThan {
                    left: Operand::close(),
                    right: Operand::constant(1_000.0),
                },
            },
            action(Condition::Always, Signal::EnterLong),
            action(Condition::Always, Signal::Exit),
        ]);
        let signals = spec.compile().unwrap().evaluate(&candles);
        assert!(signals.iter().all(|s| *s == Signal::Exit));
    }

    #[test]
    fn warmup_nan_never_fires() {
        let candles = make_candles(&[100.0, 101.0, 102.0, 103.0]);
        let spec = PipelineSpec::new(vec![
            sma("slow", 3),
            action(
                Condition::GreaterThan {
                    left: Operand::close(),
                    right: Operand::indicator("slow"),
                },
                Signal::EnterLong,
            ),
        ]);
        let signals = spec.compile().unwrap().evaluate(&candles);
        assert_eq!(signals[0], Signal::None);
        assert_eq!(signals[1], Signal::None);
        assert_eq!(signals[2], Signal::EnterLong);
    }

    #[test]
    fn set_param_updates_period() {
        let mut spec = PipelineSpec::new(vec![sma("fast", 5), action(Condition::Always, Signal::EnterLong)]);
        assert_eq!(spec.param_names(), vec!["fast.period".to_string()]);
        spec.set_param("fast.period", 8.0).unwrap();
        match &spec.stages[0] {
            Stage::Indicator { spec, .. } => assert_eq!(spec.period(), 8),
            other => panic!("unexpected stage {other:?}"),
        }
        assert!(matches!(
            spec.set_param("slow.period", 8.0),
            Err(PipelineError::UnknownParam(_))
        ));
        assert!(matches!(
            spec.set_param("fast.period", 0.0),
            Err(PipelineError::InvalidPeriod { .. })
        ));
    }

    #[test]
    fn spec_roundtrips_through_json() {
        let spec = PipelineSpec::new(vec![
            sma("fast", 5),
            action(
                Condition::CrossAbove {
                    left: Operand::close(),
                    right: Operand::indicator("fast"),
                },
                Signal::EnterLong,
            ),
        ]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: PipelineSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
