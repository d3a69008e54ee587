//! JSON-lines flush files
//!
//! The schemaless flush format: one JSON delta per line, using the same
//! camelCase dialect as the HTTP surface (HLCs as decimal strings).

use crate::types::delta::RowDelta;
use crate::types::error::Result;
use bytes::Bytes;

/// File extension for JSON-lines flush files.
pub const EXT: &str = "jsonl";

/// Content type advertised on put.
pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// Serialise a delta snapshot, one JSON object per line.
pub fn encode(deltas: &[RowDelta]) -> Result<Bytes> {
    let mut out = Vec::with_capacity(deltas.len() * 160);
    for delta in deltas {
        serde_json::to_writer(&mut out, delta)?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

/// Restore the delta list from a JSON-lines file.
pub fn decode(bytes: &[u8]) -> Result<Vec<RowDelta>> {
    let mut deltas = Vec::new();
    for line in bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        deltas.push(serde_json::from_slice(line)?);
    }
    Ok(deltas)
}
