//! Newline-delimited batch format: a header line naming the action and target,
//! followed by a body line carrying the document and options.
//!
//! ```text
//! {"percolate": {"index": "my-index", "type": "type"}}
//! {"doc": {"field1": "value"}}
//! {"count": {"index": "my-index", "type": "type", "id": "1"}}
//! {}
//! ```
use std::sync::Arc;

use serde_json::{Map, Value};

use percolate_core::error::{Error, Result};
use percolate_core::types::{DocRef, DocSource, MultiPercolateRequest, PercolateRequest};

/// Parse a batch. Header problems fail the whole batch; body problems are left
/// for the shards to report.
pub fn parse_ndjson(input: &[u8], default_size: usize) -> Result<MultiPercolateRequest> {
    let mut lines = input
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim_ascii()))
        .filter(|(_, line)| !line.is_empty());

    let mut batch = MultiPercolateRequest::new();
    while let Some((line_no, header)) = lines.next() {
        let (only_count, header) = parse_header(header, line_no)?;
        let body = lines.next().map(|(_, body)| body).unwrap_or_default();
        batch.requests.push(build_request(only_count, &header, body, default_size, line_no)?);
    }
    Ok(batch)
}

fn parse_header(line: &[u8], line_no: usize) -> Result<(bool, Map<String, Value>)> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| Error::InvalidRequest(format!("line {line_no}: malformed header: {e}")))?;
    let Value::Object(mut outer) = value else {
        return Err(Error::InvalidRequest(format!("line {line_no}: header must be an object")));
    };
    let (only_count, inner) = match (outer.remove("percolate"), outer.remove("count")) {
        (Some(inner), None) => (false, inner),
        (None, Some(inner)) => (true, inner),
        _ => return Err(Error::InvalidRequest(format!("line {line_no}: header needs exactly one of [percolate] or [count]"))),
    };
    match inner {
        Value::Object(params) => Ok((only_count, params)),
        _ => Err(Error::InvalidRequest(format!("line {line_no}: header parameters must be an object"))),
    }
}

fn string_param<'a>(params: &'a Map<String, Value>, key: &str, line_no: usize) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(Error::InvalidRequest(format!("line {line_no}: [{key}] must be a string, got {other}"))),
    }
}

fn index_list(params: &Map<String, Value>, key: &str, line_no: usize) -> Result<Vec<String>> {
    let names: Vec<String> = match params.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(String::from).ok_or_else(|| Error::InvalidRequest(format!("line {line_no}: [{key}] entries must be strings"))))
            .collect::<Result<_>>()?,
        Some(other) => return Err(Error::InvalidRequest(format!("line {line_no}: [{key}] must be a string or array, got {other}"))),
    };
    Ok(names)
}

fn build_request(only_count: bool, params: &Map<String, Value>, body: &[u8], default_size: usize, line_no: usize) -> Result<PercolateRequest> {
    let indices = index_list(params, "index", line_no)?;
    let doc_type = string_param(params, "type", line_no)?.unwrap_or_default().to_string();
    let routing = string_param(params, "routing", line_no)?;

    let parsed_body = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };

    let (targets, target_type, source) = match string_param(params, "id", line_no)? {
        Some(id) => {
            let first = indices.first().cloned().ok_or_else(|| Error::InvalidRequest(format!("line {line_no}: [id] requires an [index]")))?;
            let mut doc_ref = DocRef::new(first, doc_type.clone(), id);
            doc_ref.routing = routing.map(String::from);
            let mut targets = index_list(params, "percolate_index", line_no)?;
            if targets.is_empty() { targets = indices; }
            let target_type = string_param(params, "percolate_type", line_no)?.map(String::from).unwrap_or(doc_type);
            (targets, target_type, DocSource::Ref(doc_ref))
        }
        None => {
            let bytes: Vec<u8> = match parsed_body.as_ref().map(|map| map.get("doc")) {
                Some(Some(doc)) => serde_json::to_vec(doc).map_err(|e| Error::InvalidRequest(format!("line {}: {e}", line_no + 1)))?,
                Some(None) => Vec::new(),
                None => body.to_vec(),
            };
            (indices, doc_type, DocSource::Inline(Arc::from(bytes)))
        }
    };
    if targets.is_empty() {
        return Err(Error::InvalidRequest(format!("line {line_no}: header names no index")));
    }

    let mut request = PercolateRequest::new(&[], target_type, source);
    request.indices = targets;
    request.routing = routing.map(String::from);
    request.only_count = only_count;
    request.size = Some(default_size);
    if let Some(body) = &parsed_body {
        if let Some(size) = body.get("size").and_then(Value::as_u64) { request.size = Some(size as usize); }
        let flag = |key: &str| body.get(key).and_then(Value::as_bool).unwrap_or(false);
        request.score = flag("score") || flag("track_scores");
        request.sort = flag("sort");
        if request.sort { request.score = true; }
        request.include_fields = flag("include_fields");
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_and_fetch_items() {
        let input = br#"
{"percolate": {"index": "idx", "type": "type"}}
{"doc": {"field1": "b"}, "size": 2}
{"count": {"index": "docs", "type": "type", "id": "5", "percolate_index": "idx,other"}}
{}
"#;
        let batch = parse_ndjson(input, 10).unwrap();
        assert_eq!(batch.len(), 2);

        let first = &batch.requests[0];
        assert_eq!(first.indices, vec!["idx"]);
        assert_eq!(first.size, Some(2));
        match &first.source {
            DocSource::Inline(bytes) => assert_eq!(&bytes[..], br#"{"field1":"b"}"#),
            other => panic!("unexpected source {other:?}"),
        }

        let second = &batch.requests[1];
        assert!(second.only_count);
        assert_eq!(second.indices, vec!["idx", "other"]);
        assert_eq!(second.size, Some(10));
        assert_eq!(second.source, DocSource::Ref(DocRef::new("docs", "type", "5")));
    }

    #[test]
    fn unparseable_body_is_kept_as_raw_payload() {
        let input = b"{\"percolate\": {\"index\": \"idx\", \"type\": \"t\"}}\n{\"doc\": {\"field1\": \"value\"}\n";
        let batch = parse_ndjson(input, 10).unwrap();
        match &batch.requests[0].source {
            DocSource::Inline(bytes) => assert_eq!(&bytes[..], b"{\"doc\": {\"field1\": \"value\"}"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn bad_headers_fail_the_batch() {
        assert!(matches!(parse_ndjson(b"{\"search\": {}}\n{}\n", 10), Err(Error::InvalidRequest(_))));
        assert!(matches!(parse_ndjson(b"not json\n{}\n", 10), Err(Error::InvalidRequest(_))));
        assert!(matches!(parse_ndjson(b"{\"percolate\": {\"type\": \"t\"}}\n{}\n", 10), Err(Error::InvalidRequest(_))));
    }
}
