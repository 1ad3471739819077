//! Self-describing content formats for percolated documents and responses.
//!
//! The format of an inline payload is detected from its leading bytes:
//! `{` for JSON, a `---` document marker for YAML, and either the CBOR
//! self-describe tag (`d9 d9 f7`) or a CBOR map header for CBOR. Decoding
//! always yields a [`CanonicalDoc`]; failures are returned as [`DecodeError`]
//! values and never panic.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// CBOR tag 55799, prepended by [`encode`] so payloads are self-describing.
pub const CBOR_SELF_DESCRIBE: [u8; 3] = [0xd9, 0xd9, 0xf7];
const YAML_DOC_START: &[u8] = b"---";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Json,
    Yaml,
    Cbor,
}

impl ContentFormat {
    /// Detect the format from a fixed-position marker.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&CBOR_SELF_DESCRIBE) { return Some(ContentFormat::Cbor); }
        // Major type 5 (map). These bytes are never valid leading UTF-8.
        if let Some(first) = bytes.first() { if (0xa0..=0xbf).contains(first) { return Some(ContentFormat::Cbor); } }
        let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
        let text = &bytes[start..];
        if text.starts_with(YAML_DOC_START) { Some(ContentFormat::Yaml) }
        else if text[0] == b'{' { Some(ContentFormat::Json) }
        else { None }
    }

    pub fn as_str(self) -> &'static str {
        match self { ContentFormat::Json => "json", ContentFormat::Yaml => "yaml", ContentFormat::Cbor => "cbor" }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ContentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ContentFormat::Json),
            "yaml" | "yml" => Ok(ContentFormat::Yaml),
            "cbor" => Ok(ContentFormat::Cbor),
            other => Err(format!("unknown content format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to derive document: empty payload")]
    Empty,

    #[error("failed to derive document: unable to detect content format")]
    UnknownFormat,

    #[error("failed to derive document from {format}: {reason}")]
    Malformed { format: ContentFormat, reason: String },

    #[error("failed to derive document from {format}: root must be an object")]
    NotAnObject { format: ContentFormat },
}

#[derive(Debug, Error)]
#[error("failed to encode {format}: {reason}")]
pub struct EncodeError {
    pub format: ContentFormat,
    pub reason: String,
}

/// A decoded document: a tree of named fields with JSON-like values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalDoc(Map<String, Value>);

impl CanonicalDoc {
    pub fn new(fields: Map<String, Value>) -> Self { Self(fields) }

    pub fn from_value(value: Value, format: ContentFormat) -> Result<Self, DecodeError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(DecodeError::NotAnObject { format }),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> { &self.0 }

    /// Look up a dotted path through nested objects (`"a.b.c"`).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts { current = current.as_object()?.get(part)?; }
        Some(current)
    }

    pub fn into_value(self) -> Value { Value::Object(self.0) }
}

impl From<Map<String, Value>> for CanonicalDoc {
    fn from(fields: Map<String, Value>) -> Self { Self(fields) }
}

/// Decode a payload; the format is sniffed when not declared.
pub fn decode(bytes: &[u8], declared: Option<ContentFormat>) -> Result<CanonicalDoc, DecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) { return Err(DecodeError::Empty); }
    let format = match declared { Some(f) => f, None => ContentFormat::sniff(bytes).ok_or(DecodeError::UnknownFormat)? };
    let malformed = |reason: String| DecodeError::Malformed { format, reason };
    let value: Value = match format {
        ContentFormat::Json => serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?,
        ContentFormat::Yaml => serde_yaml::from_slice(bytes).map_err(|e| malformed(e.to_string()))?,
        ContentFormat::Cbor => {
            let body = bytes.strip_prefix(&CBOR_SELF_DESCRIBE[..]).unwrap_or(bytes);
            ciborium::de::from_reader(body).map_err(|e| malformed(e.to_string()))?
        }
    };
    CanonicalDoc::from_value(value, format)
}

/// Encode any serializable value so that [`ContentFormat::sniff`] recognises it.
pub fn encode<T: Serialize + ?Sized>(value: &T, format: ContentFormat) -> Result<Vec<u8>, EncodeError> {
    let failed = |reason: String| EncodeError { format, reason };
    match format {
        ContentFormat::Json => serde_json::to_vec(value).map_err(|e| failed(e.to_string())),
        ContentFormat::Yaml => {
            let body = serde_yaml::to_string(value).map_err(|e| failed(e.to_string()))?;
            let mut out = Vec::with_capacity(body.len() + 4);
            out.extend_from_slice(b"---\n");
            out.extend_from_slice(body.trim_start_matches("---\n").as_bytes());
            Ok(out)
        }
        ContentFormat::Cbor => {
            let mut out = CBOR_SELF_DESCRIBE.to_vec();
            ciborium::ser::into_writer(value, &mut out).map_err(|e| failed(e.to_string()))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sniffs_leading_markers() {
        assert_eq!(ContentFormat::sniff(b"  {\"a\":1}"), Some(ContentFormat::Json));
        assert_eq!(ContentFormat::sniff(b"---\na: 1\n"), Some(ContentFormat::Yaml));
        assert_eq!(ContentFormat::sniff(&[0xd9, 0xd9, 0xf7, 0xa0]), Some(ContentFormat::Cbor));
        assert_eq!(ContentFormat::sniff(&[0xa1, 0x61, 0x61, 0x01]), Some(ContentFormat::Cbor));
        assert_eq!(ContentFormat::sniff(b"illegal json"), None);
    }

    #[test]
    fn decodes_every_format_to_the_same_doc() {
        let doc = json!({"field1": "b c", "n": 3, "nested": {"x": [1, 2]}});
        for format in [ContentFormat::Json, ContentFormat::Yaml, ContentFormat::Cbor] {
            let bytes = encode(&doc, format).expect("encode");
            let decoded = decode(&bytes, None).expect("decode");
            assert_eq!(decoded.into_value(), doc, "format {format}");
        }
    }

    #[test]
    fn malformed_input_is_a_typed_error() {
        assert_eq!(decode(b"illegal json", None), Err(DecodeError::UnknownFormat));
        assert_eq!(decode(b"   ", None), Err(DecodeError::Empty));
        assert!(matches!(decode(b"{\"a\":", None), Err(DecodeError::Malformed { format: ContentFormat::Json, .. })));
        assert!(matches!(decode(b"[1,2]", Some(ContentFormat::Json)), Err(DecodeError::NotAnObject { .. })));
        let err = decode(b"{oops", None).unwrap_err();
        assert!(err.to_string().contains("failed to derive document"));
    }

    #[test]
    fn dotted_paths_walk_objects() {
        let doc = decode(br#"{"a":{"b":{"c":"x"}}}"#, None).expect("decode");
        assert_eq!(doc.get_path("a.b.c"), Some(&json!("x")));
        assert_eq!(doc.get_path("a.z"), None);
    }
}
