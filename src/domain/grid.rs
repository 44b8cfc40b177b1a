//! Grid state payload
//!
//! Stored objects are zlib-compressed JSON. Only the `rows` array and each
//! row's `name` are interpreted; every other field is carried through as-is.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TabulatorError};

/// One opaque result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Row {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Map::new(),
        }
    }
}

/// Recorded results of one test group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridState {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GridState {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            extra: Map::new(),
        }
    }

    /// Decompress and deserialize a stored payload.
    pub fn decode(compressed: &[u8]) -> Result<Self> {
        let raw = decompress(compressed)?;
        serde_json::from_slice(&raw).map_err(|e| TabulatorError::Decode(format!("deserialize grid: {}", e)))
    }

    /// Serialize and compress for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let raw = serde_json::to_vec(self)?;
        compress(&raw)
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| TabulatorError::Decode(format!("zlib: {}", e)))?;
    Ok(out)
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let grid = GridState::new(vec![Row::named("a"), Row::named("b")]);
        let decoded = GridState::decode(&grid.encode().unwrap()).unwrap();
        assert_eq!(decoded, grid);
    }

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "columns": [{"build": "42", "started": 1700000000}],
            "rows": [{"name": "//pkg:test", "results": [1, 2, 1], "messages": ["boom"]}],
        });
        let compressed = compress(&serde_json::to_vec(&raw).unwrap()).unwrap();
        let grid = GridState::decode(&compressed).unwrap();
        assert_eq!(grid.rows[0].name, "//pkg:test");
        assert_eq!(grid.rows[0].data["results"], json!([1, 2, 1]));

        let back: Value = serde_json::from_slice(&decompress(&grid.encode().unwrap()).unwrap()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_missing_rows_is_empty() {
        let compressed = compress(b"{}").unwrap();
        let grid = GridState::decode(&compressed).unwrap();
        assert!(grid.rows.is_empty());
    }

    #[test]
    fn test_decode_rejects_uncompressed() {
        let err = GridState::decode(b"{\"rows\": []}").unwrap_err();
        assert!(matches!(err, TabulatorError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        let compressed = compress(b"not json").unwrap();
        let err = GridState::decode(&compressed).unwrap_err();
        assert!(matches!(err, TabulatorError::Decode(_)));
    }
}
