pub mod consolidator;
pub mod extractor;
pub mod types;

pub use consolidator::Consolidator;
pub use extractor::FactExtractor;
pub use types::{ConsolidationDecision, ConsolidationOutcome, FactOrigin};
