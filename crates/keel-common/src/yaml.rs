//! YAML decoding using yaml-rust2
//!
//! Documents are converted to `serde_json::Value` so typed deserialization and
//! server-side apply share one representation.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct YamlError(String);

/// One document of a multi-document stream, tagged with its position
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Zero-based position of the chunk this document was decoded from
    pub index: usize,
    /// The decoded document
    pub value: Value,
}

/// Parse a single YAML document into a `serde_json::Value`.
///
/// Returns `Value::Null` for empty or comment-only input. If the input holds
/// several documents only the first one is returned.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .next()
        .map(yaml_to_json)
        .unwrap_or(Ok(Value::Null))
}

/// Split a stream on `---` separator lines.
///
/// The separator must start the line; anything after `--- ` on the same line
/// belongs to the next document. Chunks with no content other than blank
/// lines or comments are dropped.
pub fn split_documents(input: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in input.split_inclusive('\n') {
        let bare = line.trim_end();
        if bare == "---" || bare.starts_with("--- ") {
            chunks.push(&input[start..offset]);
            start = offset + 3;
        }
        offset += line.len();
    }
    chunks.push(&input[start..]);

    chunks.into_iter().filter(|c| has_content(c)).collect()
}

/// Parse a multi-document stream, keeping only non-empty documents.
///
/// Each chunk is decoded independently so an error names the document it
/// came from.
pub fn parse_documents(input: &str) -> Result<Vec<Document>, (usize, YamlError)> {
    let mut documents = Vec::new();
    for (index, chunk) in split_documents(input).into_iter().enumerate() {
        let value = parse_yaml(chunk).map_err(|e| (index, e))?;
        if value.is_null() {
            continue;
        }
        documents.push(Document { index, value });
    }
    Ok(documents)
}

fn has_content(chunk: &str) -> bool {
    chunk.lines().any(|l| {
        let l = l.trim();
        !l.is_empty() && !l.starts_with('#')
    })
}

fn yaml_key(key: Yaml) -> Result<String, YamlError> {
    Ok(match key {
        Yaml::String(s) | Yaml::Real(s) => s,
        Yaml::Integer(i) => i.to_string(),
        Yaml::Boolean(b) => b.to_string(),
        Yaml::Null => "null".to_string(),
        other => return Err(YamlError(format!("unsupported mapping key: {:?}", other))),
    })
}

/// JSON has no infinity or NaN, so `.inf`, `.nan` and out-of-range reals
/// are rejected rather than mapped to some other value.
fn json_number(real: &str) -> Result<Number, YamlError> {
    let unsigned = real.trim_start_matches(['+', '-']);
    let value: f64 = match unsigned.to_ascii_lowercase().as_str() {
        ".inf" | ".nan" => f64::NAN,
        _ => real
            .parse::<f64>()
            .map_err(|e| YamlError(format!("invalid float {}: {}", real, e)))?,
    };
    Number::from_f64(value)
        .ok_or_else(|| YamlError(format!("non-finite float {} is not supported", real)))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => Value::Number(json_number(&s)?),
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => return Err(YamlError("bad YAML value".to_string())),
    })
}
