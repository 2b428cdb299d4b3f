//! Ready-made pipelines.

use super::pipeline::{Condition, IndicatorSpec, Operand, PipelineSpec, PriceSource, Stage};
use super::Signal;

/// Enter long on every candle. With an open long position the engine ignores
/// repeated entries, so this holds one position from the first candle on.
pub fn always_long() -> PipelineSpec {
    PipelineSpec::new(vec![Stage::Action {
        condition: Condition::Always,
        signal: Signal::EnterLong,
    }])
}

/// SMA crossover: long when `fast` crosses above `slow`, short (or flat, for
/// long-only configs) when it crosses below.
///
/// Tunable parameters: `fast.period`, `slow.period`.
pub fn ma_crossover(fast: usize, slow: usize) -> PipelineSpec {
    PipelineSpec::new(vec![
        Stage::Indicator {
            key: "fast".into(),
            spec: IndicatorSpec::Sma {
                period: fast,
                source: PriceSource::Close,
            },
        },
        Stage::Indicator {
            key: "slow".into(),
            spec: IndicatorSpec::Sma {
                period: slow,
                source: PriceSource::Close,
            },
        },
        Stage::Action {
            condition: Condition::CrossAbove {
                left: Operand::indicator("fast"),
                right: Operand::indicator("slow"),
            },
            signal: Signal::EnterLong,
        },
        Stage::Action {
            condition: Condition::CrossBelow {
                left: Operand::indicator("fast"),
                right: Operand::indicator("slow"),
            },
            signal: Signal::EnterShort,
        },
    ])
}

/// Donchian breakout: long when the close clears the previous candle's upper
/// band, exit when it drops under the previous lower band.
///
/// Tunable parameters: `upper.period`, `lower.period`.
pub fn donchian_breakout(entry_period: usize, exit_period: usize) -> PipelineSpec {
    let prev = |key: &str| Operand::Indicator {
        key: key.into(),
        offset: 1,
    };
    PipelineSpec::new(vec![
        Stage::Indicator {
            key: "upper".into(),
            spec: IndicatorSpec::DonchianUpper {
                period: entry_period,
            },
        },
        Stage::Indicator {
            key: "lower".into(),
            spec: IndicatorSpec::DonchianLower {
                period: exit_period,
            },
        },
        Stage::Action {
            condition: Condition::GreaterThan {
                left: Operand::close(),
                right: prev("upper"),
            },
            signal: Signal::EnterLong,
        },
        Stage::Action {
            condition: Condition::LessThan {
                left: Operand::close(),
                right: prev("lower"),
            },
            signal: Signal::Exit,
        },
    ])
}

/// Look up a preset by name with default parameters.
pub fn by_name(name: &str) -> Option<PipelineSpec> {
    match name {
        "always_long" => Some(always_long()),
        "ma_crossover" => Some(ma_crossover(10, 30)),
        "donchian_breakout" => Some(donchian_breakout(20, 10)),
        _ => None,
    }
}
