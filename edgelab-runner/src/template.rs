//! Strategy template: a base definition with named, tunable slots.
//!
//! Applying a [`ParamSet`] to a template yields a fully-resolved
//! [`StrategyDefinition`]. Recognized names:
//! - engine: `leverage`, `stop_loss_pct`, `take_profit_pct`,
//!   `trailing_activation_pct`, `trailing_distance_pct`, `commission_rate`,
//!   `slippage_pct`, `max_bars_in_trade`, `liquidation_buffer_pct`,
//!   `equity_pct`
//! - DCA grid (base config must carry one): `dca.deposit`,
//!   `dca.base_order_size`, `dca.safety_order_size`, `dca.safety_order_count`,
//!   `dca.martingale_multiplier`, `dca.step_pct`, `dca.step_scale`,
//!   `dca.max_drawdown_kill_pct`
//! - pipeline: `<indicator key>.period`

use edgelab_core::domain::{OrderSizing, StrategyConfig, TakeProfitLevel, TrailingStop};
use edgelab_core::fingerprint::StrategyDefinition;
use edgelab_core::signals::PipelineSpec;
use serde::{Deserialize, Serialize};

use crate::params::{ParamError, ParamSet, ParamSpace};

const ENGINE_PARAMS: &[&str] = &[
    "leverage",
    "stop_loss_pct",
    "take_profit_pct",
    "trailing_activation_pct",
    "trailing_distance_pct",
    "commission_rate",
    "slippage_pct",
    "max_bars_in_trade",
    "liquidation_buffer_pct",
    "equity_pct",
];

const DCA_PARAMS: &[&str] = &[
    "dca.deposit",
    "dca.base_order_size",
    "dca.safety_order_size",
    "dca.safety_order_count",
    "dca.martingale_multiplier",
    "dca.step_pct",
    "dca.step_scale",
    "dca.max_drawdown_kill_pct",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTemplate {
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub config: StrategyConfig,
}

impl StrategyTemplate {
    pub fn new(pipeline: PipelineSpec, config: StrategyConfig) -> Self {
        Self { pipeline, config }
    }

    /// Every name this template accepts.
    pub fn param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ENGINE_PARAMS.iter().map(|s| s.to_string()).collect();
        if self.config.dca.is_some() {
            names.extend(DCA_PARAMS.iter().map(|s| s.to_string()));
        }
        names.extend(self.pipeline.param_names());
        names
    }

    /// Fail fast if `space` names a slot this template lacks.
    pub fn check_space(&self, space: &ParamSpace) -> Result<(), ParamError> {
        let names = self.param_names();
        for p in &space.params {
            if !names.iter().any(|n| *n == p.name) {
                return Err(ParamError::UnknownParam {
                    name: p.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve `params` into a concrete definition.
    ///
    /// The result is not validated here; the engine validates the config
    /// before every run.
    pub fn apply(&self, params: &ParamSet) -> Result<StrategyDefinition, ParamError> {
        let mut pipeline = self.pipeline.clone();
        let mut config = self.config.clone();
        for (name, value) in params.iter() {
            if let Some(field) = name.strip_prefix("dca.") {
                set_dca(&mut config, name, field, value)?;
            } else if name.ends_with(".period") {
                pipeline
                    .set_param(name, value)
                    .map_err(|e| ParamError::InvalidValue {
                        name: name.to_string(),
                        value,
                        reason: e.to_string(),
                    })?;
            } else {
                set_engine(&mut config, name, value)?;
            }
        }
        Ok(StrategyDefinition::new(pipeline, config))
    }
}

fn set_engine(config: &mut StrategyConfig, name: &str, value: f64) -> Result<(), ParamError> {
    match name {
        "leverage" => config.leverage = value,
        "stop_loss_pct" => config.stop_loss_pct = Some(value),
        "take_profit_pct" => match config.take_profits.first_mut() {
            Some(first) => first.offset_pct = value,
            None => config.take_profits.push(TakeProfitLevel {
                offset_pct: value,
                close_fraction: 1.0,
            }),
        },
        "trailing_activation_pct" => {
            trailing(config).activation_pct = value;
        }
        "trailing_distance_pct" => {
            trailing(config).distance_pct = value;
        }
        "commission_rate" => config.commission_rate = value,
        "slippage_pct" => config.slippage_pct = value,
        "max_bars_in_trade" => config.max_bars_in_trade = Some(count(name, value)?),
        "liquidation_buffer_pct" => config.liquidation_buffer_pct = value,
        "equity_pct" => config.sizing = OrderSizing::EquityPercent { pct: value },
        _ => {
            return Err(ParamError::UnknownParam {
                name: name.to_string(),
            })
        }
    }
    Ok(())
}

/// The trailing stop, created with zero activation when the base has none.
fn trailing(config: &mut StrategyConfig) -> &mut TrailingStop {
    config.trailing_stop.get_or_insert(TrailingStop {
        activation_pct: 0.0,
        distance_pct: 1.0,
    })
}

fn set_dca(
    config: &mut StrategyConfig,
    name: &str,
    field: &str,
    value: f64,
) -> Result<(), ParamError> {
    let Some(dca) = config.dca.as_mut() else {
        return Err(ParamError::InvalidValue {
            name: name.to_string(),
            value,
            reason: "base config has no DCA grid".into(),
        });
    };
    match field {
        "deposit" => dca.deposit = value,
        "base_order_size" => dca.base_order_size = value,
        "safety_order_size" => dca.safety_order_size = value,
        "safety_order_count" => dca.safety_order_count = count_or_zero(name, value)?,
        "martingale_multiplier" => dca.martingale_multiplier = value,
        "step_pct" => dca.step_pct = value,
        "step_scale" => dca.step_scale = value,
        "max_drawdown_kill_pct" => dca.max_drawdown_kill_pct = Some(value),
        _ => {
            return Err(ParamError::UnknownParam {
                name: name.to_string(),
            })
        }
    }
    Ok(())
}

/// Round to a count >= 1.
fn count(name: &str, value: f64) -> Result<usize, ParamError> {
    match count_or_zero(name, value)? {
        0 => Err(ParamError::InvalidValue {
            name: name.to_string(),
            value,
            reason: "must be >= 1".into(),
        }),
        n => Ok(n),
    }
}

fn count_or_zero(name: &str, value: f64) -> Result<usize, ParamError> {
    if !value.is_finite() || value.round() < 0.0 {
        return Err(ParamError::InvalidValue {
            name: name.to_string(),
            value,
            reason: "not a non-negative count".into(),
        });
    }
    Ok(value.round() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSpec;
    use edgelab_core::domain::DcaGrid;
    use edgelab_core::signals::presets;

    fn template() -> StrategyTemplate {
        StrategyTemplate::new(presets::ma_crossover(10, 30), StrategyConfig::default())
    }

    #[test]
    fn applies_engine_and_pipeline_params() {
        let params = ParamSet::new()
            .with("fast.period", 5.0)
            .with("leverage", 3.0)
            .with("stop_loss_pct", 2.5)
            .with("take_profit_pct", 4.0)
            .with("max_bars_in_trade", 12.4);
        let def = template().apply(&params).unwrap();
        assert_eq!(def.config.leverage, 3.0);
        assert_eq!(def.config.stop_loss_pct, Some(2.5));
        assert_eq!(def.config.take_profits.len(), 1);
        assert_eq!(def.config.take_profits[0].offset_pct, 4.0);
        assert_eq!(def.config.take_profits[0].close_fraction, 1.0);
        assert_eq!(def.config.max_bars_in_trade, Some(12));
        assert_eq!(def, template().apply(&params).unwrap());
        assert_ne!(
            def.config_hash(),
            template().apply(&ParamSet::new()).unwrap().config_hash()
        );
    }

    #[test]
    fn take_profit_overrides_first_rung_only() {
        let mut t = template();
        t.config.take_profits = vec![
            TakeProfitLevel {
                offset_pct: 2.0,
                close_fraction: 0.5,
            },
            TakeProfitLevel {
                offset_pct: 6.0,
                close_fraction: 0.5,
            },
        ];
        let def = t.apply(&ParamSet::new().with("take_profit_pct", 3.0)).unwrap();
        assert_eq!(def.config.take_profits[0].offset_pct, 3.0);
        assert_eq!(def.config.take_profits[1].offset_pct, 6.0);
    }

    #[test]
    fn dca_params_need_a_grid() {
        let err = template()
            .apply(&ParamSet::new().with("dca.step_pct", 1.0))
            .unwrap_err();
        assert!(matches!(err, ParamError::InvalidValue { .. }));

        let mut t = template();
        t.config.dca = Some(DcaGrid {
            deposit: 1_000.0,
            base_order_size: 100.0,
            safety_order_size: 100.0,
            safety_order_count: 3,
            martingale_multiplier: 1.5,
            step_pct: 1.0,
            step_scale: 1.0,
            max_drawdown_kill_pct: None,
        });
        let def = t
            .apply(&ParamSet::new().with("dca.safety_order_count", 5.0))
            .unwrap();
        assert_eq!(def.config.dca.unwrap().safety_order_count, 5);
    }

    #[test]
    fn check_space_rejects_unknown_names() {
        let t = template();
        let ok = ParamSpace::new(vec![
            ParamSpec::discrete("fast.period", 5.0, 15.0, 5.0),
            ParamSpec::continuous("stop_loss_pct", 0.5, 5.0),
        ]);
        assert!(t.check_space(&ok).is_ok());
        let bad = ParamSpace::new(vec![ParamSpec::discrete("medium.period", 5.0, 15.0, 5.0)]);
        assert_eq!(
            t.check_space(&bad),
            Err(ParamError::UnknownParam {
                name: "medium.period".into()
            })
        );
        let dca = ParamSpace::new(vec![ParamSpec::discrete("dca.step_pct", 1.0, 2.0, 1.0)]);
        assert!(t.check_space(&dca).is_err());
    }

    #[test]
    fn zero_period_is_rejected() {
        let err = template()
            .apply(&ParamSet::new().with("fast.period", 0.2))
            .unwrap_err();
        assert!(matches!(err, ParamError::InvalidValue { .. }));
    }
}
