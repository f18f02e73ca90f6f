//! Matching observed variants to knowledge-base variant records.
//!
//! Two kinds of knowledge-base variants are matched:
//!   - category variants ("KRAS amplification"), by gene + category term tree
//!   - positional variants ("KRAS:p.G12D"), by parsing the notation and
//!     comparing breakpoints and sequences, plus the category variants
//!     implied by the parsed variant type

use genomatch_common::{decode_record, decode_records, GenomatchError, KbVariant, ParsedVariant, Position, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::constants::{
    AMBIGUOUS_AA, COPY_ROOT_TERM, EXPRESSION_ROOT_TERM, INPUT_COPY_CATEGORIES, INPUT_EXPRESSION_CATEGORIES,
};
use crate::features::require_features;
use crate::session::KbSession;
use crate::vocab::term_tree;

fn rids<T, F: Fn(&T) -> &str>(records: &[T], rid: F) -> Vec<String> {
    records.iter().map(|r| rid(r).to_string()).collect()
}

fn merge_by_rid(records: impl IntoIterator<Item = KbVariant>) -> Vec<KbVariant> {
    let mut merged: BTreeMap<String, KbVariant> = BTreeMap::new();
    for record in records {
        merged.entry(record.rid.clone()).or_insert(record);
    }
    merged.into_values().collect()
}

pub struct VariantMatcher<'a> {
    session: &'a KbSession,
}

impl<'a> VariantMatcher<'a> {
    pub fn new(session: &'a KbSession) -> Self {
        Self { session }
    }

    async fn category_types(&self, category: &str, root_exclude: Option<&str>) -> Result<Vec<String>> {
        let types = term_tree(self.session, category, "Vocabulary", root_exclude, true).await?;
        if types.is_empty() {
            return Err(GenomatchError::TermNotFound(format!(
                "unable to find the term/category ({category}) or any equivalent"
            )));
        }
        Ok(rids(&types, |t| &t.rid))
    }

    /// Category variants of `reference` (gene name or feature/signature id)
    /// whose type falls in the term tree of `category`.
    pub async fn match_category(
        &self,
        reference: &str,
        category: &str,
        root_exclude: Option<&str>,
    ) -> Result<Vec<KbVariant>> {
        let references = require_features(self.session, reference).await?;
        let types = self.category_types(category, root_exclude).await?;

        let body = json!({
            "target": "CategoryVariant",
            "filters": [
                { "reference1": rids(&references, |r| &r.rid), "operator": "IN" },
                { "type": types, "operator": "IN" },
            ],
        });
        let variants = decode_records(self.session.cached_query(&body).await?)?;
        Ok(merge_by_rid(variants))
    }

    pub async fn match_copy(&self, gene: &str, category: &str) -> Result<Vec<KbVariant>> {
        if !INPUT_COPY_CATEGORIES.contains(&category) {
            return Err(GenomatchError::TermNotFound(format!(
                "not a valid copy variant input category ({category})"
            )));
        }
        self.match_category(gene, category, Some(COPY_ROOT_TERM)).await
    }

    pub async fn match_expression(&self, gene: &str, category: &str) -> Result<Vec<KbVariant>> {
        if !INPUT_EXPRESSION_CATEGORIES.contains(&category) {
            return Err(GenomatchError::TermNotFound(format!(
                "not a valid expression variant input category ({category})"
            )));
        }
        self.match_category(gene, category, Some(EXPRESSION_ROOT_TERM)).await
    }

    /// Category variants of a named signature (e.g. microsatellite instability).
    pub async fn match_signature(&self, signature: &str) -> Result<Vec<KbVariant>> {
        let body = json!({
            "target": {
                "target": "CategoryVariant",
                "filters": {
                    "reference1": {
                        "target": "Signature",
                        "filters": { "OR": [{ "name": signature }, { "displayName": signature }] },
                    },
                },
            },
            "queryType": "similarTo",
            "returnProperties": ["@rid", "@class", "displayName"],
        });
        let variants = decode_records(self.session.cached_query(&body).await?)?;
        Ok(merge_by_rid(variants))
    }

    async fn parse(&self, notation: &str) -> Result<ParsedVariant> {
        let body = json!({ "content": notation, "requireFeatures": false });
        let response = match self.session.request("/parse", Some(&body)).await {
            Ok(response) => response,
            Err(GenomatchError::Api { status, message }) if (400..500).contains(&status) => {
                return Err(GenomatchError::MalformedNotation {
                    notation: notation.to_string(),
                    message,
                });
            }
            Err(err) => return Err(err),
        };
        let parsed: ParsedVariant = decode_record(response.get("result").cloned().unwrap_or(Value::Null))
            .map_err(|e| GenomatchError::MalformedNotation {
                notation: notation.to_string(),
                message: e.to_string(),
            })?;
        if parsed.break1_end.is_some() || parsed.break2_end.is_some() {
            return Err(GenomatchError::MalformedNotation {
                notation: notation.to_string(),
                message: "uncertain (range) positions are not supported".to_string(),
            });
        }
        Ok(parsed)
    }

    /// Positional and category variants matching one notation.
    pub async fn match_positional(&self, notation: &str) -> Result<Vec<KbVariant>> {
        let parsed = self.parse(notation).await?;

        let features = rids(&require_features(self.session, &parsed.reference1).await?, |f| &f.rid);
        let secondary = match parsed.reference2.as_deref() {
            Some(gene2) => Some(rids(&require_features(self.session, gene2).await?, |f| &f.rid)),
            None => None,
        };
        let types = self.category_types(&parsed.variant_type, None).await?;

        let reference2_filter = match &secondary {
            Some(ids) => json!({ "reference2": ids, "operator": "IN" }),
            None => json!({ "reference2": null }),
        };

        let positional_body = json!({
            "target": "PositionalVariant",
            "filters": [
                { "reference1": features, "operator": "IN" },
                reference2_filter.clone(),
                { "type": types, "operator": "IN" },
                { "break1Start.@class": parsed.break1_start.class },
            ],
        });
        let candidates: Vec<KbVariant> =
            decode_records(self.session.cached_query(&positional_body).await?)?;
        let total = candidates.len();
        let positional: Vec<KbVariant> = candidates
            .into_iter()
            .filter(|candidate| compare_positional_variants(&parsed, candidate))
            .collect();
        debug!(notation, candidates = total, matched = positional.len(), "compared positional variants");

        let category_body = json!({
            "target": "CategoryVariant",
            "filters": [
                { "reference1": features, "operator": "IN" },
                reference2_filter,
                { "type": types, "operator": "IN" },
            ],
        });
        let category: Vec<KbVariant> = decode_records(self.session.cached_query(&category_body).await?)?;

        Ok(merge_by_rid(positional.into_iter().chain(category)))
    }

    /// [`match_positional`](Self::match_positional), retrying once with a
    /// deletion rewrite when the notation is a substitution to nothing
    /// (`chr1:g.150951027T>`). A failed retry reports the original error.
    pub async fn match_positional_with_retry(&self, notation: &str) -> Result<Vec<KbVariant>> {
        match self.match_positional(notation).await {
            Err(err @ GenomatchError::MalformedNotation { .. }) => {
                let Some(rewritten) = rewrite_malformed_deletion(notation) else {
                    return Err(err);
                };
                warn!(notation, rewritten = %rewritten, "assuming malformed deletion");
                match self.match_positional(&rewritten).await {
                    Ok(matches) => Ok(matches),
                    Err(retry_err) => {
                        debug!(notation, rewritten = %rewritten, "rewritten deletion also failed: {}", retry_err);
                        Err(err)
                    }
                }
            }
            other => other,
        }
    }
}

/// `chr1:g.150951027T>` → `chr1:g.150951027del`.
pub fn rewrite_malformed_deletion(notation: &str) -> Option<String> {
    let chars: Vec<char> = notation.chars().collect();
    let n = chars.len();
    if n < 3 || chars[n - 1] != '>' {
        return None;
    }
    if !(notation.contains("g.") || notation.contains("c.")) {
        return None;
    }
    if !chars[n - 2].is_ascii_alphabetic() || !chars[n - 3].is_ascii_digit() {
        return None;
    }
    let prefix: String = chars[..n - 2].iter().collect();
    Some(format!("{prefix}del"))
}

/// Does `position` fall on `range_start` (or within `range_start..=range_end`)?
/// An unknown position overlaps everything.
pub fn positions_overlap(position: &Position, range_start: &Position, range_end: Option<&Position>) -> bool {
    if position.class.as_deref() == Some("CytobandPosition") {
        return false;
    }
    let Some(pos) = position.pos else {
        return true;
    };
    let start = range_start.pos;
    match range_end {
        Some(end) => {
            if matches!(start, Some(s) if pos < s) {
                return false;
            }
            !matches!(end.pos, Some(e) if pos > e)
        }
        None => start.map_or(true, |s| s == pos),
    }
}

fn sequences_agree(observed: &str, reference: &str) -> bool {
    if AMBIGUOUS_AA.contains(&observed) || AMBIGUOUS_AA.contains(&reference) {
        observed.len() == reference.len()
    } else {
        observed.eq_ignore_ascii_case(reference)
    }
}

/// Is the parsed observation an instance of the knowledge-base variant?
pub fn compare_positional_variants(observed: &ParsedVariant, reference: &KbVariant) -> bool {
    let Some(ref_start) = reference.break1_start.as_ref() else {
        return false;
    };
    if !positions_overlap(&observed.break1_start, ref_start, reference.break1_end.as_ref()) {
        return false;
    }

    if let Some(observed_break2) = observed.break2_start.as_ref() {
        let Some(ref_break2) = reference.break2_start.as_ref() else {
            return false;
        };
        if !positions_overlap(observed_break2, ref_break2, reference.break2_end.as_ref()) {
            return false;
        }
    }

    if let (Some(observed_seq), Some(ref_seq)) = (&observed.untemplated_seq, &reference.untemplated_seq) {
        if let (Some(a), Some(b)) = (observed.untemplated_seq_size, reference.untemplated_seq_size) {
            if a != b {
                return false;
            }
        }
        if !sequences_agree(observed_seq, ref_seq) {
            return false;
        }
    }

    if let (Some(observed_ref), Some(ref_ref)) = (&observed.ref_seq, &reference.ref_seq) {
        if !sequences_agree(observed_ref, ref_ref) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKnowledgeBase;
    use std::sync::Arc;

    fn pos(p: i64) -> Position {
        Position { class: Some("ProteinPosition".into()), pos: Some(p) }
    }

    #[test]
    fn test_rewrite_malformed_deletion() {
        assert_eq!(
            rewrite_malformed_deletion("chr1:g.150951027T>").as_deref(),
            Some("chr1:g.150951027del")
        );
        assert_eq!(rewrite_malformed_deletion("BRCA1:c.4837A>").as_deref(), Some("BRCA1:c.4837del"));
        assert_eq!(rewrite_malformed_deletion("chr1:g.150951027T>C"), None);
        assert_eq!(rewrite_malformed_deletion("KRAS:p.G12>"), None);
        assert_eq!(rewrite_malformed_deletion(">"), None);
    }

    #[test]
    fn test_positions_overlap() {
        assert!(positions_overlap(&pos(12), &pos(12), None));
        assert!(!positions_overlap(&pos(13), &pos(12), None));
        assert!(positions_overlap(&pos(15), &pos(10), Some(&pos(20))));
        assert!(!positions_overlap(&pos(21), &pos(10), Some(&pos(20))));
        assert!(positions_overlap(&Position::default(), &pos(10), None));
    }

    #[test]
    fn test_compare_positional_variants_sequences() {
        let observed = ParsedVariant {
            reference1: "KRAS".into(),
            variant_type: "missense mutation".into(),
            break1_start: pos(12),
            ref_seq: Some("G".into()),
            untemplated_seq: Some("D".into()),
            untemplated_seq_size: Some(1),
            ..Default::default()
        };
        let mut kb = KbVariant {
            rid: "#1:1".into(),
            break1_start: Some(pos(12)),
            ref_seq: Some("g".into()),
            untemplated_seq: Some("D".into()),
            ..Default::default()
        };
        assert!(compare_positional_variants(&observed, &kb));

        kb.untemplated_seq = Some("X".into());
        assert!(compare_positional_variants(&observed, &kb));

        kb.untemplated_seq = Some("C".into());
        assert!(!compare_positional_variants(&observed, &kb));

        kb.untemplated_seq = None;
        kb.break1_start = Some(pos(13));
        assert!(!compare_positional_variants(&observed, &kb));
    }

    fn copy_kb() -> MockKnowledgeBase {
        MockKnowledgeBase::new()
            .with_features("ERBB2", vec![json!({"@rid": "#3:1", "@class": "Feature", "name": "erbb2", "biotype": "gene"})])
            .with_terms("Vocabulary", "amplification", vec![json!({"@rid": "#7:1", "@class": "Vocabulary", "name": "amplification"})])
            .with_category_variants(vec![
                json!({"@rid": "#9:2", "@class": "CategoryVariant", "displayName": "ERBB2 amplification", "reference1": "#3:1", "type": "#7:1"}),
            ])
    }

    #[tokio::test]
    async fn test_match_copy_variant() {
        let session = KbSession::new(Arc::new(copy_kb()));
        let matches = VariantMatcher::new(&session).match_copy("ERBB2", "amplification").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].display(), "ERBB2 amplification");
    }

    #[tokio::test]
    async fn test_match_copy_rejects_unknown_category() {
        let session = KbSession::new(Arc::new(copy_kb()));
        let err = VariantMatcher::new(&session).match_copy("ERBB2", "gain").await.unwrap_err();
        assert!(matches!(err, GenomatchError::TermNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_gene_is_feature_not_found() {
        let session = KbSession::new(Arc::new(copy_kb()));
        let err = VariantMatcher::new(&session)
            .match_copy("NOTAGENE", "amplification")
            .await
            .unwrap_err();
        assert!(matches!(err, GenomatchError::FeatureNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_deletion_is_rewritten_and_retried() {
        let mock = MockKnowledgeBase::new()
            .with_parse_error("chr1:g.150951027T>", 400)
            .with_parse(
                "chr1:g.150951027del",
                json!({"reference1": "chr1", "type": "deletion", "break1Start": {"@class": "GenomicPosition", "pos": 150951027}}),
            )
            .with_features("chr1", vec![json!({"@rid": "#4:1", "@class": "Feature", "name": "chr1", "biotype": "chromosome"})])
            .with_terms("Vocabulary", "deletion", vec![json!({"@rid": "#7:9", "@class": "Vocabulary", "name": "deletion"})])
            .with_positional_variants(vec![
                json!({"@rid": "#8:1", "@class": "PositionalVariant", "displayName": "chr1:g.150951027del", "reference1": "#4:1",
                       "break1Start": {"@class": "GenomicPosition", "pos": 150951027}}),
            ]);
        let session = KbSession::new(Arc::new(mock));
        let matcher = VariantMatcher::new(&session);

        let retried = matcher.match_positional_with_retry("chr1:g.150951027T>").await.unwrap();
        let direct = matcher.match_positional("chr1:g.150951027del").await.unwrap();
        assert_eq!(retried, direct);
        assert_eq!(retried[0].rid, "#8:1");
    }

    #[tokio::test]
    async fn test_failed_retry_reports_original_error() {
        let mock = MockKnowledgeBase::new()
            .with_parse_error("chr1:g.150951027T>", 400)
            .with_parse_error("chr1:g.150951027del", 400);
        let session = KbSession::new(Arc::new(mock));
        let err = VariantMatcher::new(&session)
            .match_positional_with_retry("chr1:g.150951027T>")
            .await
            .unwrap_err();
        assert!(matches!(err, GenomatchError::MalformedNotation { ref notation, .. } if notation == "chr1:g.150951027T>"));
    }
}
