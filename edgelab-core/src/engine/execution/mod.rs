//! Fill-price mechanics: the intrabar price path and execution friction.

pub mod cost_model;
pub mod path_policy;

pub use cost_model::{CostModel, OrderSide};
pub use path_policy::price_path;
