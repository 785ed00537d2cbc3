//! Market strategy stages: moving-average indicators and LONG/SHORT decisions

pub mod decision;
pub mod indicator;

#[cfg(test)]
mod tests;

pub use decision::{decide, generate_decisions, run_decisions, Decision};
pub use indicator::{compute_moving_averages, rolling_mean, run_indicators, WindowScope};
