//! In-memory knowledge base for tests.
//!
//! Canned answers are registered against predicates over the query body;
//! the first predicate that accepts a query supplies its records and an
//! unmatched query returns no records. Every call is recorded.

use async_trait::async_trait;
use genomatch_common::{GenomatchError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::client::KnowledgeBase;

type QueryPredicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;
type RequestPredicate = Box<dyn Fn(&str, Option<&Value>) -> bool + Send + Sync>;

enum MockResponse {
    Ok(Value),
    Error { status: u16, message: String },
}

pub struct MockKnowledgeBase {
    queries: Vec<(QueryPredicate, Vec<Value>)>,
    requests: Vec<(RequestPredicate, MockResponse)>,
    query_log: Mutex<Vec<Value>>,
    request_log: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl MockKnowledgeBase {
    pub fn new() -> Self {
        Self {
            queries: Vec::new(),
            requests: Vec::new(),
            query_log: Mutex::new(Vec::new()),
            request_log: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Answer queries accepted by `predicate` with `records`.
    pub fn with_query<F>(mut self, predicate: F, records: Vec<Value>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.queries.push((Box::new(predicate), records));
        self
    }

    /// Answer vocabulary/ontology lookups of the term `name` in `class`.
    pub fn with_terms(self, class: &str, name: &str, records: Vec<Value>) -> Self {
        let (class, name) = (class.to_string(), name.to_string());
        self.with_query(move |q| names_term(q, &class, &name), records)
    }

    /// Answer feature lookups by name or source id.
    pub fn with_features(self, gene: &str, records: Vec<Value>) -> Self {
        let gene = gene.to_string();
        self.with_query(
            move |q| has_target(q, "Feature") && mentions(q, "name", &gene),
            records,
        )
    }

    /// Answer `similarTo` lookups seeded by a record id.
    pub fn with_similar(self, rid: &str, records: Vec<Value>) -> Self {
        let rid = rid.to_string();
        self.with_query(
            move |q| matches!(q.get("target"), Some(Value::Array(ids)) if ids.contains(&json!(rid))),
            records,
        )
    }

    /// Answer statement queries. Statements are returned for any batch; the
    /// caller keeps the ones conditioned on what it asked for.
    pub fn with_statements(self, records: Vec<Value>) -> Self {
        self.with_query(|q| q.get("target") == Some(&json!("Statement")), records)
    }

    pub fn with_category_variants(self, records: Vec<Value>) -> Self {
        self.with_query(|q| q.get("target") == Some(&json!("CategoryVariant")), records)
    }

    pub fn with_positional_variants(self, records: Vec<Value>) -> Self {
        self.with_query(|q| q.get("target") == Some(&json!("PositionalVariant")), records)
    }

    /// Answer a notation parse with the given parsed variant.
    pub fn with_parse(mut self, notation: &str, parsed: Value) -> Self {
        let notation = notation.to_string();
        self.requests.push((
            Box::new(move |path, body| is_parse_of(path, body, &notation)),
            MockResponse::Ok(json!({ "result": parsed })),
        ));
        self
    }

    /// Reject a notation parse with an API error.
    pub fn with_parse_error(mut self, notation: &str, status: u16) -> Self {
        let notation = notation.to_string();
        let message = format!("unable to parse {notation}");
        self.requests.push((
            Box::new(move |path, body| is_parse_of(path, body, &notation)),
            MockResponse::Error {
                status,
                message,
            },
        ));
        self
    }

    /// Answer a raw endpoint request by exact path.
    pub fn with_request(mut self, path: &str, value: Value) -> Self {
        let path = path.to_string();
        self.requests
            .push((Box::new(move |p, _| p == path), MockResponse::Ok(value)));
        self
    }

    /// Query bodies received so far, in order.
    pub fn queries(&self) -> Vec<Value> {
        self.query_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request paths received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_queries<F: Fn(&Value) -> bool>(&self, predicate: F) -> usize {
        self.queries().iter().filter(|q| predicate(q)).count()
    }
}

impl Default for MockKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeBase for MockKnowledgeBase {
    async fn query(&self, body: &Value) -> Result<Vec<Value>> {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.query_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(body.clone());
        Ok(self
            .queries
            .iter()
            .find(|(predicate, _)| predicate(body))
            .map(|(_, records)| records.clone())
            .unwrap_or_default())
    }

    async fn request(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.request_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
        match self.requests.iter().find(|(predicate, _)| predicate(path, body)) {
            Some((_, MockResponse::Ok(value))) => Ok(value.clone()),
            Some((_, MockResponse::Error { status, message })) => Err(GenomatchError::Api {
                status: *status,
                message: message.clone(),
            }),
            None => Err(GenomatchError::Api {
                status: 404,
                message: format!("no mock response for {path}"),
            }),
        }
    }

    fn url(&self) -> &str {
        "mock://graphkb"
    }

    fn request_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

// ── Query inspection helpers ────────────────────────────────────────────────

fn is_parse_of(path: &str, body: Option<&Value>, notation: &str) -> bool {
    path == "/parse"
        && body
            .and_then(|b| b.get("content"))
            .and_then(Value::as_str)
            == Some(notation)
}

/// True if any object in the query has `key` equal to the string `expected`.
pub fn mentions(value: &Value, key: &str, expected: &str) -> bool {
    match value {
        Value::Object(map) => {
            map.get(key).and_then(Value::as_str) == Some(expected)
                || map.values().any(|v| mentions(v, key, expected))
        }
        Value::Array(items) => items.iter().any(|v| mentions(v, key, expected)),
        _ => false,
    }
}

/// True if any (nested) target of the query is the class `class`.
pub fn has_target(value: &Value, class: &str) -> bool {
    mentions(value, "target", class)
}

/// True if the query looks up the term `name` of `class` by name.
pub fn names_term(value: &Value, class: &str, name: &str) -> bool {
    match value {
        Value::Object(map) => {
            let here = map.get("target").and_then(Value::as_str) == Some(class)
                && map.get("filters") == Some(&json!({ "name": name }));
            here || map.values().any(|v| names_term(v, class, name))
        }
        Value::Array(items) => items.iter().any(|v| names_term(v, class, name)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_rule_wins_and_calls_are_recorded() {
        let kb = MockKnowledgeBase::new()
            .with_query(|q| q["target"] == "Statement", vec![json!({"@rid": "#1:1"})])
            .with_query(|_| true, vec![json!({"@rid": "#2:2"})]);

        let statements = kb.query(&json!({"target": "Statement"})).await.unwrap();
        assert_eq!(statements, vec![json!({"@rid": "#1:1"})]);
        let other = kb.query(&json!({"target": "Feature"})).await.unwrap();
        assert_eq!(other, vec![json!({"@rid": "#2:2"})]);
        assert_eq!(kb.request_count(), 2);
        assert_eq!(kb.count_queries(|q| q["target"] == "Feature"), 1);
    }

    #[tokio::test]
    async fn test_unmatched_query_is_empty_and_unmatched_request_errors() {
        let kb = MockKnowledgeBase::new();
        assert!(kb.query(&json!({"target": "Feature"})).await.unwrap().is_empty());
        assert!(kb.request("/statements/1:1", None).await.is_err());
        assert_eq!(kb.requests(), vec!["/statements/1:1".to_string()]);
    }

    #[tokio::test]
    async fn test_parse_rules_match_on_content() {
        let kb = MockKnowledgeBase::new()
            .with_parse("KRAS:p.G12D", json!({"reference1": "KRAS"}))
            .with_parse_error("chr1:g.1T>", 400);

        let ok = kb
            .request("/parse", Some(&json!({"content": "KRAS:p.G12D"})))
            .await
            .unwrap();
        assert_eq!(ok["result"]["reference1"], "KRAS");
        let err = kb
            .request("/parse", Some(&json!({"content": "chr1:g.1T>"})))
            .await
            .unwrap_err();
        assert!(matches!(err, GenomatchError::Api { status: 400, .. }));
    }

    #[test]
    fn test_names_term_finds_nested_lookup() {
        let q = json!({
            "target": {
                "target": {"target": "Vocabulary", "filters": {"name": "amplification"}},
                "queryType": "descendants",
            },
            "queryType": "similarTo",
        });
        assert!(names_term(&q, "Vocabulary", "amplification"));
        assert!(!names_term(&q, "Disease", "amplification"));
        assert!(has_target(&q, "Vocabulary"));
    }
}
