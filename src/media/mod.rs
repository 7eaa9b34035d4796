pub mod aggregator;
pub mod fetch;
