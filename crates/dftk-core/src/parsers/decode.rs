use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Layout(String),
}

/// Decodes a retrieved artifact into a nested record.
///
/// Groups become objects and datasets become values, so array artifacts
/// and JSON summaries share one representation.
pub trait RecordDecoder {
    fn decode(&self, path: &Path) -> Result<Value, DecodeError>;
}

/// Decoder for JSON-encoded record dumps.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordDecoder;

impl RecordDecoder for JsonRecordDecoder {
    fn decode(&self, path: &Path) -> Result<Value, DecodeError> {
        let content = fs::read_to_string(path).map_err(|source| DecodeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| DecodeError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Flattens a rectangular nested numeric array into its shape and row-major values.
pub fn decode_array(value: &Value) -> Result<(Vec<usize>, Vec<f64>), DecodeError> {
    let mut shape = Vec::new();
    let mut level = value;
    while let Value::Array(items) = level {
        shape.push(items.len());
        match items.first() {
            Some(first) => level = first,
            None => break,
        }
    }

    let mut values = Vec::new();
    flatten_into(value, &shape, &mut values)?;
    Ok((shape, values))
}

fn flatten_into(value: &Value, shape: &[usize], values: &mut Vec<f64>) -> Result<(), DecodeError> {
    match (value, shape.split_first()) {
        (Value::Array(items), Some((extent, rest))) => {
            if items.len() != *extent {
                return Err(DecodeError::Layout(format!(
                    "ragged array: expected {} entries, found {}",
                    extent,
                    items.len()
                )));
            }
            items
                .iter()
                .try_for_each(|item| flatten_into(item, rest, values))
        }
        (Value::Number(number), None) => {
            let value = number
                .as_f64()
                .ok_or_else(|| DecodeError::Layout(format!("non-finite array entry {number}")))?;
            values.push(value);
            Ok(())
        }
        (other, _) => Err(DecodeError::Layout(format!(
            "unexpected array entry {other}"
        ))),
    }
}
