//! JSON codec strategy and the delimited-text cell encoding.
//!
//! The codec is injected into [`Client`](crate::Client) so callers can swap in a
//! parser that keeps big integers exact. The default [`SerdeJsonCodec`] does so
//! when the crate is built with the `arbitrary-precision` feature.

use std::fmt::Debug;

use serde_json::Value;

use crate::error::{PrestoError, Result};

/// Parses response bodies and serializes compound cell values.
pub trait JsonCodec: Send + Sync + Debug {
    fn parse(&self, body: &str) -> Result<Value>;

    fn stringify(&self, value: &Value) -> Result<String>;
}

/// `serde_json` backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn parse(&self, body: &str) -> Result<Value> {
        serde_json::from_str(body).map_err(|e| PrestoError::Codec(format!("JSON parse error: {e}")))
    }

    fn stringify(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(PrestoError::from)
    }
}

/// Renders one cell for text output.
///
/// Numbers are bare, null is `""`, everything else is quoted with inner quotes doubled.
pub fn encode_cell(value: &Value, codec: &dyn JsonCodec) -> Result<String> {
    let raw = match value {
        Value::Number(n) => return Ok(n.to_string()),
        Value::Null => return Ok("\"\"".to_string()),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => codec.stringify(value)?,
    };
    Ok(quote(&raw))
}

/// Joins one row's cells with commas.
pub fn encode_row(row: &[Value], codec: &dyn JsonCodec) -> Result<String> {
    let cells = row
        .iter()
        .map(|cell| encode_cell(cell, codec))
        .collect::<Result<Vec<_>>>()?;
    Ok(cells.join(","))
}

/// Header line from column names; names are always quoted.
pub fn encode_header<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().map(quote).collect::<Vec<_>>().join(",")
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}
