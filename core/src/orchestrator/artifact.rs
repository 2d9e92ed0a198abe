use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::Value;

use crate::error::{CoreError, Result};

/// A processed artifact as written by a `ProcessSource` activity: either a
/// single top-level JSON array or a JSONL stream, one record per line.
/// Format is auto-detected from the first non-whitespace byte (`[` vs `{`).
pub enum ProcessedArtifact {
    /// Byte offsets of each line in the backing file, so a batch can be read
    /// by seeking rather than loading the whole file.
    Jsonl { path: std::path::PathBuf, line_spans: Vec<(u64, u64)> },
    /// Records already fully materialized; the `[...]` form has no cheaper
    /// streaming decomposition with the JSON tooling this crate uses.
    Array { records: Vec<Value> },
}

impl ProcessedArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let first_byte = first_non_whitespace_byte(&mut file)?;
        file.seek(SeekFrom::Start(0))?;

        match first_byte {
            Some(b'[') => {
                let records: Vec<Value> = serde_json::from_reader(BufReader::new(file))?;
                Ok(ProcessedArtifact::Array { records })
            }
            _ => {
                let line_spans = index_lines(&mut BufReader::new(file))?;
                Ok(ProcessedArtifact::Jsonl {
                    path: path.to_path_buf(),
                    line_spans,
                })
            }
        }
    }

    pub fn total_items(&self) -> usize {
        match self {
            ProcessedArtifact::Jsonl { line_spans, .. } => line_spans.len(),
            ProcessedArtifact::Array { records } => records.len(),
        }
    }

    /// Reads only the `[start, end)` slice of records.
    pub fn read_batch(&self, start: usize, end: usize) -> Result<Vec<Value>> {
        match self {
            ProcessedArtifact::Array { records } => {
                Ok(records.get(start..end.min(records.len())).unwrap_or(&[]).to_vec())
            }
            ProcessedArtifact::Jsonl { path, line_spans } => {
                let end = end.min(line_spans.len());
                if start >= end {
                    return Ok(Vec::new());
                }

                let mut file = File::open(path)?;
                let mut records = Vec::with_capacity(end - start);
                for &(offset, len) in &line_spans[start..end] {
                    file.seek(SeekFrom::Start(offset))?;
                    let mut buf = vec![0u8; len as usize];
                    file.read_exact(&mut buf)?;
                    let record: Value = serde_json::from_slice(&buf)
                        .map_err(|e| CoreError::Processing(format!("malformed JSONL record at offset {offset}: {e}")))?;
                    records.push(record);
                }
                Ok(records)
            }
        }
    }
}

fn first_non_whitespace_byte<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf)? {
            0 => return Ok(None),
            _ if buf[0].is_ascii_whitespace() => continue,
            _ => return Ok(Some(buf[0])),
        }
    }
}

/// Scans the file once to record each non-blank line's byte span, so later
/// batch reads can seek directly instead of buffering the whole artifact.
fn index_lines<R: BufRead>(reader: &mut R) -> Result<Vec<(u64, u64)>> {
    let mut spans = Vec::new();
    let mut offset: u64 = 0;
    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if !trimmed.trim().is_empty() {
            spans.push((offset, trimmed.len() as u64));
        }
        offset += bytes_read as u64;
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn detects_json_array_and_counts_items() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"a":1}}, {{"a":2}}, {{"a":3}}]"#).unwrap();

        let artifact = ProcessedArtifact::load(file.path()).unwrap();
        assert_eq!(artifact.total_items(), 3);
        assert_eq!(artifact.read_batch(1, 3).unwrap().len(), 2);
    }

    #[test]
    fn detects_jsonl_and_reads_exact_slice() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();
        writeln!(file, r#"{{"a":2}}"#).unwrap();
        writeln!(file, r#"{{"a":3}}"#).unwrap();

        let artifact = ProcessedArtifact::load(file.path()).unwrap();
        assert_eq!(artifact.total_items(), 3);

        let batch = artifact.read_batch(0, 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["a"], 1);
        assert_eq!(batch[1]["a"], 2);
    }

    #[test]
    fn jsonl_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"a":2}}"#).unwrap();

        let artifact = ProcessedArtifact::load(file.path()).unwrap();
        assert_eq!(artifact.total_items(), 2);
    }

    #[test]
    fn out_of_range_batch_returns_empty() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();

        let artifact = ProcessedArtifact::load(file.path()).unwrap();
        assert!(artifact.read_batch(5, 10).unwrap().is_empty());
    }
}
