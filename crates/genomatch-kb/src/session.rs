//! Run-scoped knowledge-base session.
//!
//! One `KbSession` lives for exactly one report-generation run. It owns the
//! caches for repeated lookups, so concurrent runs against different
//! knowledge-base sessions never share cached results.

use genomatch_common::{Ontology, Result, Statement};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::client::KnowledgeBase;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lookup caches keyed by lookup input.
#[derive(Default)]
pub struct RunCache {
    queries: Mutex<HashMap<String, Vec<Value>>>,
    statements_by_variant: Mutex<HashMap<String, Vec<Statement>>>,
    terms_sets: Mutex<HashMap<Vec<String>, HashSet<String>>>,
    preferred_gene_names: Mutex<HashMap<String, String>>,
    preferred_drugs: Mutex<HashMap<String, Ontology>>,
    disease_closures: Mutex<HashMap<String, HashSet<String>>>,
    approved_evidence_levels: Mutex<Option<HashSet<String>>>,
}

pub struct KbSession {
    kb: Arc<dyn KnowledgeBase>,
    cache: RunCache,
}

impl KbSession {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            kb,
            cache: RunCache::default(),
        }
    }

    pub fn kb(&self) -> &dyn KnowledgeBase {
        self.kb.as_ref()
    }

    pub fn url(&self) -> &str {
        self.kb.url()
    }

    pub fn request_count(&self) -> usize {
        self.kb.request_count()
    }

    /// Query without caching.
    pub async fn query(&self, body: &Value) -> Result<Vec<Value>> {
        self.kb.query(body).await
    }

    /// Query, reusing the result of an identical earlier query in this run.
    pub async fn cached_query(&self, body: &Value) -> Result<Vec<Value>> {
        let key = body.to_string();
        if let Some(hit) = guard(&self.cache.queries).get(&key) {
            return Ok(hit.clone());
        }
        let records = self.kb.query(body).await?;
        guard(&self.cache.queries).insert(key, records.clone());
        Ok(records)
    }

    pub async fn request(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.kb.request(path, body).await
    }

    // ── typed caches ────────────────────────────────────────────────────────

    pub(crate) fn cached_statements(&self, variant_rid: &str) -> Option<Vec<Statement>> {
        guard(&self.cache.statements_by_variant).get(variant_rid).cloned()
    }

    pub(crate) fn store_statements(&self, variant_rid: String, statements: Vec<Statement>) {
        guard(&self.cache.statements_by_variant).insert(variant_rid, statements);
    }

    pub(crate) fn cached_terms_set(&self, base_terms: &[String]) -> Option<HashSet<String>> {
        guard(&self.cache.terms_sets).get(base_terms).cloned()
    }

    pub(crate) fn store_terms_set(&self, base_terms: Vec<String>, terms: HashSet<String>) {
        guard(&self.cache.terms_sets).insert(base_terms, terms);
    }

    pub(crate) fn cached_gene_name(&self, gene: &str) -> Option<String> {
        guard(&self.cache.preferred_gene_names).get(gene).cloned()
    }

    pub(crate) fn store_gene_name(&self, gene: String, preferred: String) {
        guard(&self.cache.preferred_gene_names).insert(gene, preferred);
    }

    pub(crate) fn cached_drug(&self, rid: &str) -> Option<Ontology> {
        guard(&self.cache.preferred_drugs).get(rid).cloned()
    }

    pub(crate) fn store_drug(&self, rid: String, drug: Ontology) {
        guard(&self.cache.preferred_drugs).insert(rid, drug);
    }

    pub(crate) fn cached_disease_closure(&self, disease: &str) -> Option<HashSet<String>> {
        guard(&self.cache.disease_closures).get(disease).cloned()
    }

    pub(crate) fn store_disease_closure(&self, disease: String, closure: HashSet<String>) {
        debug!(disease = %disease, terms = closure.len(), "cached disease closure");
        guard(&self.cache.disease_closures).insert(disease, closure);
    }

    pub(crate) fn cached_approved_levels(&self) -> Option<HashSet<String>> {
        guard(&self.cache.approved_evidence_levels).clone()
    }

    pub(crate) fn store_approved_levels(&self, levels: HashSet<String>) {
        *guard(&self.cache.approved_evidence_levels) = Some(levels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKnowledgeBase;
    use serde_json::json;

    #[tokio::test]
    async fn test_cached_query_hits_kb_once() {
        let mock = Arc::new(
            MockKnowledgeBase::new().with_query(|_| true, vec![json!({"@rid": "#1:1"})]),
        );
        let session = KbSession::new(mock.clone());
        let body = json!({"target": "Source"});

        let first = session.cached_query(&body).await.unwrap();
        let second = session.cached_query(&body).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_caches() {
        let mock = Arc::new(MockKnowledgeBase::new());
        let first = KbSession::new(mock.clone());
        let second = KbSession::new(mock.clone());
        first.store_gene_name("ERBB2".into(), "ERBB2".into());
        assert_eq!(first.cached_gene_name("ERBB2").as_deref(), Some("ERBB2"));
        assert!(second.cached_gene_name("ERBB2").is_none());
    }
}
