use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{Document, DataSource};

/// Where a [`SourceAdapter::process`] call left its output.
pub enum ProcessArtifact {
    /// The adapter already stored memory-ready Documents itself; indexing
    /// can be skipped entirely for this source.
    Direct,
    /// A JSON-array or JSONL file on disk, to be read in batches during the
    /// Index phase.
    File(PathBuf),
}

/// The boundary between the Orchestrator and a concrete document source
/// (filesystem export, chat log, mail archive, whatever produces
/// `DataSource`s). Every concrete adapter is an external collaborator —
/// this crate only depends on the trait.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Runs this source's processing step, producing either a JSONL/JSON
    /// artifact on disk or a direct in-place store.
    async fn process(&self, source: &DataSource) -> Result<ProcessArtifact>;

    /// Converts one batch's worth of raw JSON records into Documents. For
    /// adapters whose artifact already contains Document-shaped JSON this is
    /// a straight deserialize; for opaque `Record` formats it performs the
    /// adapter-specific mapping.
    fn to_documents(&self, records: Vec<Value>) -> Result<Vec<Document>>;

    /// Chat-like sources carry much larger per-item content, so the
    /// Orchestrator indexes them in smaller batches. Defaults to `false`.
    fn is_chat_like(&self) -> bool {
        false
    }
}
