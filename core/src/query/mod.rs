mod engine;

pub use engine::{IntelligentQueryResult, QueryEngine, QueryMetadata};
