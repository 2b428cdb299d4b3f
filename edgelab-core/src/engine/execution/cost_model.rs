//! Cost model: slippage and commission calculation.
//!
//! Slippage is directional: buyers pay more, sellers receive less. It applies
//! to market-style fills (signal entries and exits, stop and trailing exits,
//! the drawdown kill). Limit-style fills (take-profit rungs, safety orders)
//! and liquidations fill at their level.
//! Commission is a fraction of notional, charged on every fill.

use crate::domain::{Side, StrategyConfig};

/// Direction of a single fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side of the fill that opens (or adds to) a position.
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Side of the fill that reduces a position.
    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Slippage as a fraction of price.
    pub slippage: f64,
    /// Commission as a fraction of notional.
    pub commission_rate: f64,
}

impl CostModel {
    pub fn new(slippage_pct: f64, commission_rate: f64) -> Self {
        Self {
            slippage: slippage_pct / 100.0,
            commission_rate,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.slippage_pct, config.commission_rate)
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Apply adverse slippage to a raw fill price.
    pub fn slipped(&self, raw_price: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => raw_price * (1.0 + self.slippage),
            OrderSide::Sell => raw_price * (1.0 - self.slippage),
        }
    }

    pub fn commission(&self, price: f64, quantity: f64) -> f64 {
        (price * quantity).abs() * self.commission_rate
    }
}
