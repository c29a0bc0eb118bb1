pub mod aggregator;
pub mod window;

// Re-export the per-symbol state types for convenient access
// (e.g. `use crate::market_data::SymbolAggregator`).
pub use aggregator::{SymbolAggregator, SymbolSnapshot};
pub use window::{OiWindow, SidedWindow, TimeWindow};
