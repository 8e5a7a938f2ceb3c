//! Market data processing: window validation, indicator dispatch, caching.

pub mod processor;
pub mod spec;

pub use processor::{MarketDataProcessor, ProcessedData, ProcessorError, ProcessorResult};
pub use spec::IndicatorSpec;
