use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use percolate_core::content::{decode, encode, ContentFormat};
use percolate_core::types::{RegisteredQuery, RoutingKey};
use percolate_core::{CanonicalDoc, Query, QuerySource};
use percolate_text::{AnalyzerKind, MatchOptions, PercolateMatcher};

fn registered(id: &str, source: Value) -> RegisteredQuery {
    let parsed = QuerySource::parse(&source).expect("query source");
    RegisteredQuery { id: id.to_string(), owner_index: "test".to_string(), routing: RoutingKey::Unrouted, query: parsed.query, stored_fields: parsed.stored_fields }
}

fn basic_queries() -> Vec<RegisteredQuery> {
    vec![
        registered("1", json!({"query": {"match": {"field1": "b"}}, "a": "b"})),
        registered("2", json!({"query": {"match": {"field1": "c"}}})),
        registered("3", json!({"query": {"bool": {"must": [{"match": {"field1": "b"}}, {"match": {"field1": "c"}}]}}})),
        registered("4", json!({"query": {"match_all": {}}})),
    ]
}

fn doc(value: Value) -> CanonicalDoc { decode(&encode(&value, ContentFormat::Json).expect("encode"), None).expect("decode") }

fn opts() -> MatchOptions { MatchOptions::new(Utc::now()) }

fn ids(result: &percolate_core::types::ShardResult) -> Vec<String> {
    let mut ids: Vec<String> = result.matches.iter().map(|m| m.id.clone()).collect();
    ids.sort();
    ids
}

#[test]
fn basic_match_sets() {
    let matcher = PercolateMatcher::default();
    let queries = basic_queries();

    let r = matcher.percolate(&doc(json!({"field1": "b"})), &queries, &opts());
    assert_eq!(ids(&r), vec!["1", "4"]);
    assert_eq!(r.count, 2);

    let r = matcher.percolate(&doc(json!({"field1": "b c"})), &queries, &opts());
    assert_eq!(ids(&r), vec!["1", "2", "3", "4"]);

    let r = matcher.percolate(&doc(json!({"field1": "d"})), &queries, &opts());
    assert_eq!(ids(&r), vec!["4"]);
}

#[test]
fn every_content_format_matches_the_same() {
    let matcher = PercolateMatcher::default();
    let queries = basic_queries();
    for format in [ContentFormat::Json, ContentFormat::Yaml, ContentFormat::Cbor] {
        let bytes = encode(&json!({"field1": "c"}), format).expect("encode");
        let r = matcher.percolate(&decode(&bytes, None).expect("decode"), &queries, &opts());
        assert_eq!(ids(&r), vec!["2", "4"], "format {format}");
    }
}

#[test]
fn size_limit_truncates_but_count_is_exact() {
    let matcher = PercolateMatcher::default();
    let queries: Vec<RegisteredQuery> = (0..20).map(|i| registered(&i.to_string(), json!({"query": {"match_all": {}}}))).collect();

    let mut o = opts();
    o.size = Some(5);
    let r = matcher.percolate(&doc(json!({"field": "a"})), &queries, &o);
    assert_eq!(r.count, 20);
    assert_eq!(r.matches.len(), 5);

    o.only_count = true;
    let r = matcher.percolate(&doc(json!({"field": "a"})), &queries, &o);
    assert_eq!(r.count, 20);
    assert!(r.matches.is_empty());
}

#[test]
fn nested_query_requires_one_element_to_match() {
    let matcher = PercolateMatcher::default();
    let queries = vec![registered("Q", json!({"query": {"nested": {"path": "employee", "score_mode": "avg",
        "query": {"match": {"employee.name": {"query": "virginia potts", "operator": "and"}}}}}}))];

    let miss = doc(json!({"companyname": "notstark", "employee": [{"name": "virginia stark"}, {"name": "tony potts"}]}));
    let hit = doc(json!({"companyname": "stark", "employee": [{"name": "virginia potts"}, {"name": "tony stark"}]}));

    assert!(matcher.percolate(&miss, &queries, &opts()).matches.is_empty());
    let r = matcher.percolate(&hit, &queries, &opts());
    assert_eq!(ids(&r), vec!["Q"]);
}

#[test]
fn relative_dates_use_the_request_start_time() {
    let matcher = PercolateMatcher::default();
    let queries = vec![registered("1", json!({"query": {"range": {"date_field": {"lt": "now+90d"}}}}))];
    let d = doc(json!({"date_field": "2015-07-21T10:28:01-07:00"}));

    let mut o = opts();
    o.start_time = Utc.with_ymd_and_hms(2015, 8, 1, 0, 0, 0).single().expect("start");
    assert_eq!(matcher.percolate(&d, &queries, &o).count, 1);

    o.start_time = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).single().expect("start");
    assert_eq!(matcher.percolate(&d, &queries, &o).count, 0);
}

#[test]
fn broken_query_is_skipped_without_aborting_the_pass() {
    let matcher = PercolateMatcher::default();
    let queries = vec![
        registered("bad", json!({"query": {"range": {"date_field": {"lt": "now+5q"}}}})),
        registered("good", json!({"query": {"match_all": {}}})),
    ];
    let r = matcher.percolate(&doc(json!({"date_field": "2015-07-21"})), &queries, &opts());
    assert_eq!(ids(&r), vec!["good"]);
    assert_eq!(r.skipped.len(), 1);
    assert_eq!(r.skipped[0].id, "bad");
    assert!(r.skipped[0].reason.contains("now+5q"));
}

#[test]
fn sorted_scores_and_stored_fields() {
    let matcher = PercolateMatcher::default();
    let queries = vec![
        registered("half", json!({"query": {"match": {"body": "quick zebra"}}, "owner": "x"})),
        registered("full", json!({"query": {"match": {"body": "quick fox"}}})),
    ];
    let mut o = opts();
    o.score = true;
    o.sort = true;
    o.include_fields = true;
    let r = matcher.percolate(&doc(json!({"body": "the quick brown fox"})), &queries, &o);
    assert_eq!(r.matches[0].id, "full");
    assert_eq!(r.matches[0].score, Some(1.0));
    assert_eq!(r.matches[1].score, Some(0.5));
    assert_eq!(r.matches[1].fields.as_ref().and_then(|f| f.get("owner")), Some(&json!("x")));
}

#[test]
fn term_range_phrase_and_bool_clauses() {
    let matcher = PercolateMatcher::new(AnalyzerKind::Stopwords);
    let queries = vec![
        registered("term", json!({"query": {"term": {"status": "active"}}})),
        registered("range", json!({"query": {"range": {"age": {"gte": 18, "lt": 65}}}})),
        registered("phrase", json!({"query": {"match_phrase": {"title": "brown fox"}}})),
        registered("not_phrase", json!({"query": {"match_phrase": {"title": "fox brown"}}})),
        registered("not", json!({"query": {"bool": {"must_not": {"term": {"status": "active"}}}}})),
        registered("should", json!({"query": {"bool": {"should": [{"term": {"tag": "x"}}, {"term": {"tag": "y"}}], "minimum_should_match": 2}}})),
        registered("exists", json!({"query": {"exists": {"field": "title"}}})),
    ];
    let r = matcher.percolate(&doc(json!({"status": "active", "age": 30, "title": "The brown fox", "tag": ["x", "y"]})), &queries, &opts());
    assert_eq!(ids(&r), vec!["exists", "phrase", "range", "should", "term"]);
    assert_eq!(Query::parse(&json!({"match_all": {}})).expect("parse"), Query::MatchAll);
}
