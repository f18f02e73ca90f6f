//! Vocabulary and ontology closures.

use genomatch_common::{decode_records, Ontology, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::session::KbSession;

fn by_name(class: &str, name: &str) -> Value {
    json!({ "target": class, "filters": { "name": name } })
}

fn tree_query(class: &str, name: &str, direction: &str) -> Value {
    json!({
        "target": {
            "target": by_name(class, name),
            "queryType": direction,
            "edges": ["SubClassOf"],
        },
        "queryType": "similarTo",
        "treeEdges": [],
        "returnProperties": ["@rid", "@class", "name", "displayName", "sourceId", "sourceIdVersion", "deprecated"],
    })
}

/// A term plus everything above it in the subclass hierarchy (and their
/// equivalents), cut below `root_exclude` when given.
pub async fn equivalent_terms(
    session: &KbSession,
    name: &str,
    class: &str,
    root_exclude: Option<&str>,
) -> Result<Vec<Ontology>> {
    let parents: Vec<Ontology> =
        decode_records(session.cached_query(&tree_query(class, name, "ancestors")).await?)?;

    let Some(root) = root_exclude.filter(|r| !r.is_empty()) else {
        return Ok(parents);
    };
    let excluded: HashSet<String> =
        decode_records::<Ontology>(session.cached_query(&tree_query(class, root, "ancestors")).await?)?
            .into_iter()
            .map(|t| t.rid)
            .collect();
    Ok(parents
        .into_iter()
        .filter(|t| !excluded.contains(&t.rid))
        .collect())
}

/// The term, its equivalents and all of its descendants; with
/// `include_superclasses` the equivalent (ancestor) terms as well.
pub async fn term_tree(
    session: &KbSession,
    name: &str,
    class: &str,
    root_exclude: Option<&str>,
    include_superclasses: bool,
) -> Result<Vec<Ontology>> {
    let children: Vec<Ontology> =
        decode_records(session.cached_query(&tree_query(class, name, "descendants")).await?)?;
    let parents = if include_superclasses {
        equivalent_terms(session, name, class, root_exclude).await?
    } else {
        Vec::new()
    };

    // BTreeMap keeps the merged tree independent of fetch order.
    let mut terms: BTreeMap<String, Ontology> = BTreeMap::new();
    for term in children.into_iter().chain(parents) {
        terms.entry(term.rid.clone()).or_insert(term);
    }
    debug!(term = name, class, size = terms.len(), "resolved term tree");
    Ok(terms.into_values().collect())
}

/// Union of the descendant trees of several base vocabulary terms, as ids.
pub async fn terms_set(session: &KbSession, base_terms: &[&str]) -> Result<HashSet<String>> {
    let key: Vec<String> = base_terms.iter().map(|t| t.to_string()).collect();
    if let Some(hit) = session.cached_terms_set(&key) {
        return Ok(hit);
    }
    let mut terms = HashSet::new();
    for base in base_terms {
        for term in term_tree(session, base, "Vocabulary", None, false).await? {
            terms.insert(term.rid);
        }
    }
    session.store_terms_set(key, terms.clone());
    Ok(terms)
}

pub fn rid_set<'a>(records: impl IntoIterator<Item = &'a Ontology>) -> HashSet<String> {
    records.into_iter().map(|r| r.rid.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{names_term, MockKnowledgeBase};
    use crate::client::KnowledgeBase;
    use std::sync::Arc;

    fn term(rid: &str, name: &str) -> Value {
        json!({"@rid": rid, "@class": "Vocabulary", "name": name})
    }

    #[tokio::test]
    async fn test_term_tree_merges_descendants_and_ancestors() {
        let mock = MockKnowledgeBase::new()
            .with_query(
                |q| names_term(q, "Vocabulary", "amplification") && q["target"]["queryType"] == "descendants",
                vec![term("#1:1", "amplification")],
            )
            .with_query(
                |q| names_term(q, "Vocabulary", "amplification") && q["target"]["queryType"] == "ancestors",
                vec![term("#1:1", "amplification"), term("#1:2", "copy gain"), term("#1:3", "structural variant")],
            )
            .with_terms("Vocabulary", "structural variant", vec![term("#1:3", "structural variant")]);
        let session = KbSession::new(Arc::new(mock));

        let tree = term_tree(&session, "amplification", "Vocabulary", Some("structural variant"), true)
            .await
            .unwrap();
        let rids: Vec<&str> = tree.iter().map(|t| t.rid.as_str()).collect();
        assert_eq!(rids, vec!["#1:1", "#1:2"]);
    }

    #[tokio::test]
    async fn test_terms_set_is_cached_per_run() {
        let mock = Arc::new(
            MockKnowledgeBase::new()
                .with_terms("Vocabulary", "no sensitivity", vec![term("#5:1", "no sensitivity"), term("#5:2", "resistance")]),
        );
        let session = KbSession::new(mock.clone());

        let first = terms_set(&session, &["no sensitivity"]).await.unwrap();
        let calls = mock.request_count();
        let second = terms_set(&session, &["no sensitivity"]).await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("#5:2"));
        assert_eq!(mock.request_count(), calls);
    }

    #[tokio::test]
    async fn test_unknown_term_is_empty_tree() {
        let session = KbSession::new(Arc::new(MockKnowledgeBase::new()));
        let tree = term_tree(&session, "gain", "Vocabulary", None, true).await.unwrap();
        assert!(tree.is_empty());
    }
}
