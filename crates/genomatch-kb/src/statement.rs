//! Statement retrieval, inference and relevance categorisation.

use genomatch_common::{decode_records, GenomatchError, KbVariant, Ontology, RecordClass, Result, Statement};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use crate::constants::{APPROVED_EVIDENCE_LEVELS, FAILED_REVIEW_STATUS, STATEMENT_BATCH_SIZE, UNKNOWN_CATEGORY};
use crate::matching::VariantMatcher;
use crate::session::KbSession;
use crate::vocab::{rid_set, term_tree, terms_set};

pub const STATEMENT_RETURN_PROPERTIES: [&str; 33] = [
    "@rid",
    "@class",
    "displayNameTemplate",
    "sourceId",
    "reviewStatus",
    "source.@rid",
    "source.name",
    "source.displayName",
    "relevance.@rid",
    "relevance.@class",
    "relevance.name",
    "relevance.displayName",
    "subject.@rid",
    "subject.@class",
    "subject.name",
    "subject.displayName",
    "subject.biotype",
    "conditions.@rid",
    "conditions.@class",
    "conditions.name",
    "conditions.displayName",
    "conditions.biotype",
    "conditions.reference1",
    "conditions.reference2",
    "conditions.type",
    "evidence.@rid",
    "evidence.@class",
    "evidence.displayName",
    "evidenceLevel.@rid",
    "evidenceLevel.@class",
    "evidenceLevel.name",
    "evidenceLevel.displayName",
    "evidenceLevel.source",
];

// ── Run-level lookups ───────────────────────────────────────────────────────

/// Ids of the disease, its equivalents, descendants and ancestors.
///
/// Fails the run when the disease is unknown to the knowledge base.
pub async fn disease_closure(session: &KbSession, disease_name: &str) -> Result<HashSet<String>> {
    if let Some(hit) = session.cached_disease_closure(disease_name) {
        return Ok(hit);
    }
    let tree = term_tree(session, disease_name, "Disease", None, true).await?;
    if tree.is_empty() {
        return Err(GenomatchError::DiseaseNotFound(disease_name.to_string()));
    }
    let closure = rid_set(&tree);
    session.store_disease_closure(disease_name.to_string(), closure.clone());
    Ok(closure)
}

/// Ids of the evidence levels that indicate an approved therapy.
pub async fn approved_evidence_levels(session: &KbSession) -> Result<HashSet<String>> {
    if let Some(hit) = session.cached_approved_levels() {
        return Ok(hit);
    }
    let filters: Vec<_> = APPROVED_EVIDENCE_LEVELS
        .iter()
        .map(|(source, names)| {
            json!({
                "AND": [
                    { "source": { "target": "Source", "filters": { "name": source } } },
                    { "name": names, "operator": "IN" },
                ]
            })
        })
        .collect();
    let body = json!({ "target": "EvidenceLevel", "filters": { "OR": filters } });
    let levels: Vec<Ontology> = decode_records(session.query(&body).await?)?;
    let levels = rid_set(&levels);
    info!(levels = levels.len(), "loaded approved evidence levels");
    session.store_approved_levels(levels.clone());
    Ok(levels)
}

/// Classifies relevance terms into report categories.
#[derive(Debug, Clone, Default)]
pub struct RelevanceCategorizer {
    categories: Vec<(String, HashSet<String>)>,
}

impl RelevanceCategorizer {
    /// Resolve each category's base terms to their term trees, in order.
    pub async fn load(session: &KbSession, base_terms: &[(&str, &[&str])]) -> Result<Self> {
        let mut categories = Vec::with_capacity(base_terms.len());
        for (category, terms) in base_terms {
            categories.push((category.to_string(), terms_set(session, terms).await?));
        }
        Ok(Self { categories })
    }

    /// Build directly from (category, relevance ids) pairs.
    pub fn from_sets(categories: Vec<(String, HashSet<String>)>) -> Self {
        Self { categories }
    }

    /// First category whose tree contains the relevance id.
    pub fn categorize(&self, relevance_rid: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|(_, terms)| terms.contains(relevance_rid))
            .map(|(category, _)| category.as_str())
    }

    /// Like [`categorize`](Self::categorize), with the `unknown` fallback.
    pub fn category_or_unknown(&self, relevance_rid: &str) -> &str {
        self.categorize(relevance_rid).unwrap_or(UNKNOWN_CATEGORY)
    }
}

// ── Statement resolution ────────────────────────────────────────────────────

/// Statements reached from a set of matched variants.
#[derive(Debug, Clone, Default)]
pub struct ResolvedStatements {
    pub direct: Vec<Statement>,
    pub direct_variants: HashSet<String>,
    /// Second-pass statements not already in `direct`.
    pub inferred: Vec<Statement>,
    pub inferred_variants: HashSet<String>,
}

pub struct StatementResolver<'a> {
    session: &'a KbSession,
    include_failed_review: bool,
}

impl<'a> StatementResolver<'a> {
    pub fn new(session: &'a KbSession) -> Self {
        Self {
            session,
            include_failed_review: false,
        }
    }

    pub fn with_failed_review(mut self, include: bool) -> Self {
        self.include_failed_review = include;
        self
    }

    /// Statements conditioned on any of `variants`, ordered by id.
    ///
    /// Lookups are cached per variant for the run; uncached variants are
    /// fetched together in `CONTAINSANY` batches.
    pub async fn statements_for(&self, variants: &[KbVariant]) -> Result<Vec<Statement>> {
        let requested: BTreeSet<&str> = variants.iter().map(|v| v.rid.as_str()).collect();
        let uncached: Vec<String> = requested
            .iter()
            .filter(|rid| self.session.cached_statements(rid).is_none())
            .map(|rid| rid.to_string())
            .collect();

        for batch in uncached.chunks(STATEMENT_BATCH_SIZE) {
            let body = json!({
                "target": "Statement",
                "filters": { "conditions": batch, "operator": "CONTAINSANY" },
                "returnProperties": &STATEMENT_RETURN_PROPERTIES[..],
            });
            let mut fetched: Vec<Statement> = decode_records(self.session.query(&body).await?)?;
            if !self.include_failed_review {
                let before = fetched.len();
                fetched.retain(|s| s.review_status.as_deref() != Some(FAILED_REVIEW_STATUS));
                if fetched.len() < before {
                    debug!(dropped = before - fetched.len(), "dropped statements that failed review");
                }
            }
            for rid in batch {
                let conditioned: Vec<Statement> =
                    fetched.iter().filter(|s| s.has_condition(rid)).cloned().collect();
                self.session.store_statements(rid.clone(), conditioned);
            }
        }

        let mut statements: BTreeMap<String, Statement> = BTreeMap::new();
        for rid in requested {
            for statement in self.session.cached_statements(rid).unwrap_or_default() {
                statements.entry(statement.rid.clone()).or_insert(statement);
            }
        }
        Ok(statements.into_values().collect())
    }

    /// Category variants implied by the (subject, relevance) pairs of already
    /// matched statements whose subject is a feature or signature.
    pub async fn second_pass_variants(&self, statements: &[Statement]) -> Result<Vec<KbVariant>> {
        let pairs: BTreeSet<(String, String)> = statements
            .iter()
            .filter_map(|s| {
                let subject = s.subject.as_ref()?;
                matches!(subject.class, RecordClass::Feature | RecordClass::Signature).then(|| {
                    let relevance = s.relevance.name.clone().unwrap_or_else(|| s.relevance.display().to_string());
                    (subject.rid.clone(), relevance)
                })
            })
            .collect();

        let matcher = VariantMatcher::new(self.session);
        let mut inferred: BTreeMap<String, KbVariant> = BTreeMap::new();
        for (reference, relevance) in pairs {
            match matcher.match_category(&reference, &relevance, None).await {
                Ok(variants) => {
                    for variant in variants {
                        inferred.entry(variant.rid.clone()).or_insert(variant);
                    }
                }
                Err(GenomatchError::TermNotFound(_)) | Err(GenomatchError::FeatureNotFound(_)) => {
                    debug!(reference = %reference, relevance = %relevance, "no inferred category variant");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(inferred.into_values().collect())
    }

    /// First pass over the matched variants, then the inference pass.
    pub async fn resolve(&self, variants: &[KbVariant]) -> Result<ResolvedStatements> {
        if variants.is_empty() {
            return Ok(ResolvedStatements::default());
        }
        let direct = self.statements_for(variants).await?;
        let direct_ids: HashSet<&str> = direct.iter().map(|s| s.rid.as_str()).collect();

        let inferred_variants = self.second_pass_variants(&direct).await?;
        let inferred: Vec<Statement> = self
            .statements_for(&inferred_variants)
            .await?
            .into_iter()
            .filter(|s| !direct_ids.contains(s.rid.as_str()))
            .collect();

        Ok(ResolvedStatements {
            direct_variants: variants.iter().map(|v| v.rid.clone()).collect(),
            inferred_variants: inferred_variants.into_iter().map(|v| v.rid).collect(),
            direct,
            inferred,
        })
    }
}
