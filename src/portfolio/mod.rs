//! Portfolio valuation, value history and allocation drift detection.

mod aggregator;

pub use aggregator::{PortfolioAggregator, OVER_EXPOSED, UNDER_EXPOSED};
