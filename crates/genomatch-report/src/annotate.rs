//! Per-type annotation of observed variants.
//!
//! For every row: VariantMatcher → StatementResolver (two passes) →
//! AlterationConverter, tagged with the row's key and type. Row-level
//! failures are logged and counted; only run-level failures abort.

use genomatch_common::{GenomatchError, IprVariant, KbMatch, KbVariant, Result, VariantType};
use genomatch_kb::constants::{
    MSI_CATEGORY, REPORTED_COPY_CATEGORIES, RELEVANCE_BASE_TERMS, TMB_HIGH_CATEGORY,
};
use genomatch_kb::statement::{approved_evidence_levels, disease_closure};
use genomatch_kb::{KbSession, RelevanceCategorizer, StatementResolver, VariantMatcher};
use std::collections::BTreeSet;
use tracing::{debug, error, info};

use crate::alterations::{AlterationConverter, ConversionContext, MatchOrigin};

/// Matches of one annotation batch plus its skip/error accounting.
#[derive(Debug, Clone, Default)]
pub struct AnnotationOutcome {
    pub matches: Vec<KbMatch>,
    pub skipped: usize,
    pub errors: usize,
    pub problem_genes: BTreeSet<String>,
}

impl AnnotationOutcome {
    fn log_summary(&self, label: &str, rows: usize) {
        if self.skipped > 0 {
            info!("skipped matching {} {} rows", self.skipped, label);
        }
        if !self.problem_genes.is_empty() {
            error!(
                "gene finding failures for {} {:?} ({} genes)",
                label,
                self.problem_genes,
                self.problem_genes.len()
            );
        }
        if self.errors > 0 {
            error!("skipped {} {} rows due to errors", self.errors, label);
        }
        info!("matched {} {} rows to {} knowledge-base annotations", rows, label, self.matches.len());
    }
}

pub struct Annotator<'a> {
    session: &'a KbSession,
    context: ConversionContext,
}

impl<'a> Annotator<'a> {
    /// Resolve the run-level lookups. Any failure here is fatal for the run.
    pub async fn new(session: &'a KbSession, disease_name: &str) -> Result<Self> {
        let disease_matches = disease_closure(session, disease_name).await?;
        let approved_evidence_levels = approved_evidence_levels(session).await?;
        let categorizer = RelevanceCategorizer::load(session, &RELEVANCE_BASE_TERMS).await?;
        info!(disease = disease_name, closure = disease_matches.len(), "annotation context ready");
        Ok(Self::with_context(
            session,
            ConversionContext {
                disease_matches,
                approved_evidence_levels,
                categorizer,
            },
        ))
    }

    pub fn with_context(session: &'a KbSession, context: ConversionContext) -> Self {
        Self { session, context }
    }

    pub fn context(&self) -> &ConversionContext {
        &self.context
    }

    /// Statements of the matched variants (direct and inferred) as report rows.
    pub async fn statement_matches(
        &self,
        variants: &[KbVariant],
        key: &str,
        variant_type: VariantType,
    ) -> Result<Vec<KbMatch>> {
        if variants.is_empty() {
            return Ok(Vec::new());
        }
        let resolved = StatementResolver::new(self.session).resolve(variants).await?;
        let converter = AlterationConverter::new(&self.context);

        let direct = MatchOrigin { key, variant_type, inferred: false };
        let inferred = MatchOrigin { inferred: true, ..direct };
        let mut rows = Vec::new();
        for statement in &resolved.direct {
            rows.extend(converter.convert(statement, &resolved.direct_variants, direct));
        }
        for statement in &resolved.inferred {
            rows.extend(converter.convert(statement, &resolved.inferred_variants, inferred));
        }
        Ok(rows)
    }

    fn record_failure(outcome: &mut AnnotationOutcome, gene: &str, what: &str, err: GenomatchError) -> Result<()> {
        match err {
            GenomatchError::FeatureNotFound(msg) => {
                debug!(gene, variant = what, "unrecognized gene: {}", msg);
                outcome.problem_genes.insert(gene.to_string());
                Ok(())
            }
            err if err.is_row_recoverable() => {
                error!(gene, variant = what, "failed to match variants: {}", err);
                outcome.errors += 1;
                Ok(())
            }
            err => Err(err),
        }
    }

    pub async fn annotate_expression(&self, rows: &[IprVariant]) -> Result<AnnotationOutcome> {
        info!("starting annotation of {} expression category variants", rows.len());
        let matcher = VariantMatcher::new(self.session);
        let mut outcome = AnnotationOutcome::default();

        for row in rows {
            let gene = row.gene().unwrap_or_default();
            if row.variant.is_empty() {
                outcome.skipped += 1;
                debug!(gene, key = %row.key, "skipping expression row without a category");
                continue;
            }
            let result = match matcher.match_expression(gene, &row.variant).await {
                Ok(variants) => self.statement_matches(&variants, &row.key, row.variant_type).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(matches) => outcome.matches.extend(matches),
                Err(err) => Self::record_failure(&mut outcome, gene, &row.variant, err)?,
            }
        }
        outcome.log_summary("expression", rows.len());
        Ok(outcome)
    }

    pub async fn annotate_copy(&self, rows: &[IprVariant]) -> Result<AnnotationOutcome> {
        info!("starting annotation of {} copy category variants", rows.len());
        let matcher = VariantMatcher::new(self.session);
        let mut outcome = AnnotationOutcome::default();

        for row in rows {
            let gene = row.gene().unwrap_or_default();
            if !REPORTED_COPY_CATEGORIES.contains(&row.variant.as_str()) {
                outcome.skipped += 1;
                debug!(gene, key = %row.key, "dropping copy change '{}' - not a reported copy category", row.variant);
                continue;
            }
            let result = match matcher.match_copy(gene, &row.variant).await {
                Ok(variants) => self.statement_matches(&variants, &row.key, row.variant_type).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(matches) => outcome.matches.extend(matches),
                Err(err) => Self::record_failure(&mut outcome, gene, &row.variant, err)?,
            }
        }
        outcome.log_summary("copy variant", rows.len());
        Ok(outcome)
    }

    /// Small mutations and structural variants. Every notation of a row is
    /// tried; the batch output holds each distinct match once.
    pub async fn annotate_positional(&self, rows: &[IprVariant]) -> Result<AnnotationOutcome> {
        let matcher = VariantMatcher::new(self.session);
        let mut outcome = AnnotationOutcome::default();
        let mut unique: BTreeSet<KbMatch> = BTreeSet::new();

        for row in rows {
            if row.gene().is_none() && (row.gene1().is_none() || row.gene2().is_none()) {
                outcome.skipped += 1;
                debug!(key = %row.key, "skipping single gene structural variant");
                continue;
            }

            for notation in row.positional_representations() {
                let result = match matcher.match_positional_with_retry(notation).await {
                    Ok(variants) => self.statement_matches(&variants, &row.key, row.variant_type).await,
                    Err(err) => Err(err),
                };
                match result {
                    Ok(matches) => unique.extend(matches),
                    Err(GenomatchError::FeatureNotFound(msg)) => {
                        debug!(variant = notation, "failed to match positional variant: {}", msg);
                        outcome.errors += 1;
                        outcome.problem_genes.extend(problem_genes_for(row, &msg));
                    }
                    Err(err) if err.is_row_recoverable() => {
                        error!(variant = notation, key = %row.key, "failed to match positional variant: {}", err);
                        outcome.errors += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        outcome.matches = unique.into_iter().collect();
        let types: BTreeSet<&str> = outcome.matches.iter().map(|m| m.variant_type.as_str()).collect();
        let types: Vec<&str> = types.into_iter().collect();
        outcome.log_summary(&format!("{} positional", types.join(", ")), rows.len());
        Ok(outcome)
    }

    /// Matches to a signature category (MSI, TMB). Rows are keyed by the
    /// category label itself.
    pub async fn annotate_signature(&self, category: &str, variant_type: VariantType) -> Result<Vec<KbMatch>> {
        let variants = VariantMatcher::new(self.session).match_signature(category).await?;
        let matches = self.statement_matches(&variants, category, variant_type).await?;
        info!(category, matches = matches.len(), "annotated signature");
        Ok(matches)
    }

    pub async fn annotate_msi(&self) -> Result<Vec<KbMatch>> {
        self.annotate_signature(MSI_CATEGORY, VariantType::Msi).await
    }

    pub async fn annotate_tmb(&self) -> Result<Vec<KbMatch>> {
        self.annotate_signature(TMB_HIGH_CATEGORY, VariantType::Tmb).await
    }
}

/// Which of the row's genes an unrecognised-feature error is about.
fn problem_genes_for(row: &IprVariant, message: &str) -> Vec<String> {
    if let Some(gene) = row.gene() {
        return vec![gene.to_string()];
    }
    let mentioned: Vec<String> = [row.gene1(), row.gene2()]
        .into_iter()
        .flatten()
        .filter(|g| message.contains(&format!("({g})")))
        .take(1)
        .map(str::to_string)
        .collect();
    if !mentioned.is_empty() {
        return mentioned;
    }
    row.genes().into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use genomatch_kb::MockKnowledgeBase;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn copy_row(key: &str, gene: &str, category: &str) -> IprVariant {
        let mut row = IprVariant::new(key, VariantType::Cnv);
        row.gene = Some(gene.into());
        row.variant = category.into();
        row.kb_category = Some(category.into());
        row
    }

    fn kb() -> MockKnowledgeBase {
        MockKnowledgeBase::new()
            .with_features("ERBB2", vec![json!({"@rid": "#3:1", "@class": "Feature", "name": "erbb2", "biotype": "gene"})])
            .with_terms("Vocabulary", "amplification", vec![json!({"@rid": "#7:1", "@class": "Vocabulary", "name": "amplification"})])
            .with_category_variants(vec![json!({"@rid": "#9:1", "@class": "CategoryVariant", "displayName": "ERBB2 amplification", "reference1": "#3:1"})])
            .with_statements(vec![json!({
                "@rid": "#100:1",
                "relevance": {"@rid": "#147:1", "@class": "Vocabulary", "displayName": "sensitivity"},
                "subject": {"@rid": "#122:1", "@class": "Therapy", "displayName": "trastuzumab"},
                "conditions": [
                    {"@rid": "#9:1", "@class": "CategoryVariant", "displayName": "ERBB2 amplification"},
                    {"@rid": "#138:12", "@class": "Disease", "displayName": "breast cancer"},
                ],
                "evidence": [],
                "evidenceLevel": [{"@rid": "approved1", "displayName": "FDA"}],
            })])
    }

    fn context() -> ConversionContext {
        ConversionContext {
            disease_matches: HashSet::from(["#138:12".to_string()]),
            approved_evidence_levels: HashSet::from(["approved1".to_string()]),
            categorizer: RelevanceCategorizer::from_sets(vec![(
                "therapeutic".into(),
                HashSet::from(["#147:1".to_string()]),
            )]),
        }
    }

    #[tokio::test]
    async fn test_copy_allow_list() {
        let session = KbSession::new(Arc::new(kb()));
        let annotator = Annotator::with_context(&session, context());

        let outcome = annotator
            .annotate_copy(&[copy_row("c1", "ERBB2", "amplification"), copy_row("c2", "ERBB2", "gain")])
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.variant, "c1");
        assert_eq!(m.variant_type, VariantType::Cnv);
        assert!(m.approved_therapy);
        assert!(m.matched_cancer);
        assert_eq!(m.context.as_deref(), Some("trastuzumab"));
    }

    #[tokio::test]
    async fn test_unknown_gene_is_recorded_not_fatal() {
        let session = KbSession::new(Arc::new(kb()));
        let annotator = Annotator::with_context(&session, context());

        let outcome = annotator
            .annotate_copy(&[copy_row("c1", "NOTAGENE", "amplification"), copy_row("c2", "ERBB2", "amplification")])
            .await
            .unwrap();
        assert_eq!(outcome.problem_genes, BTreeSet::from(["NOTAGENE".to_string()]));
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].variant, "c2");
    }

    #[tokio::test]
    async fn test_single_gene_structural_variant_is_skipped() {
        let session = KbSession::new(Arc::new(kb()));
        let annotator = Annotator::with_context(&session, context());
        let mut sv = IprVariant::new("sv1", VariantType::Sv);
        sv.gene1 = Some("EML4".into());
        sv.variant = "(EML4,?):fusion(e.13,e.?)".into();

        let outcome = annotator.annotate_positional(&[sv]).await.unwrap();
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.matches.is_empty());
        assert_eq!(session.request_count(), 0);
    }

    fn mutation_row(key: &str, variant: &str, hgvs_protein: &str) -> IprVariant {
        let mut row = IprVariant::new(key, VariantType::Mut);
        row.gene = Some("KRAS".into());
        row.variant = variant.into();
        row.hgvs_protein = Some(hgvs_protein.into());
        row
    }

    fn kras_g12d() -> serde_json::Value {
        json!({
            "reference1": "KRAS",
            "type": "substitution",
            "break1Start": {"@class": "ProteinPosition", "pos": 12},
            "refSeq": "G",
            "untemplatedSeq": "D",
        })
    }

    fn kras_kb() -> MockKnowledgeBase {
        MockKnowledgeBase::new()
            .with_parse("KRAS:p.G12D", kras_g12d())
            .with_parse("KRAS:p.Gly12Asp", kras_g12d())
            .with_parse(
                "NM_004985.5:c.35G>A",
                json!({
                    "reference1": "NM_004985.5",
                    "type": "substitution",
                    "break1Start": {"@class": "CdsPosition", "pos": 35},
                    "refSeq": "G",
                    "untemplatedSeq": "A",
                }),
            )
            .with_features("KRAS", vec![json!({"@rid": "#3:5", "@class": "Feature", "name": "kras", "biotype": "gene"})])
            .with_terms("Vocabulary", "substitution", vec![json!({"@rid": "#7:3", "@class": "Vocabulary", "name": "substitution"})])
            .with_positional_variants(vec![json!({
                "@rid": "#8:1",
                "@class": "PositionalVariant",
                "displayName": "KRAS:p.G12D",
                "reference1": "#3:5",
                "break1Start": {"@class": "ProteinPosition", "pos": 12},
                "refSeq": "G",
                "untemplatedSeq": "D",
            })])
            .with_statements(vec![json!({
                "@rid": "#100:5",
                "relevance": {"@rid": "#147:1", "@class": "Vocabulary", "displayName": "resistance"},
                "subject": {"@rid": "#122:4", "@class": "Therapy", "displayName": "cetuximab"},
                "conditions": [
                    {"@rid": "#8:1", "@class": "PositionalVariant", "displayName": "KRAS:p.G12D"},
                    {"@rid": "#138:12", "@class": "Disease", "displayName": "colorectal cancer"},
                ],
                "evidence": [],
                "evidenceLevel": [{"@rid": "approved1", "displayName": "FDA"}],
            })])
    }

    #[tokio::test]
    async fn test_representations_reaching_one_statement_yield_one_row() {
        let session = KbSession::new(Arc::new(kras_kb()));
        let annotator = Annotator::with_context(&session, context());

        let outcome = annotator
            .annotate_positional(&[mutation_row("m1", "KRAS:p.G12D", "KRAS:p.Gly12Asp")])
            .await
            .unwrap();
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!((m.variant.as_str(), m.kb_statement_id.as_str()), ("m1", "#100:5"));
        assert_eq!(m.kb_variant_id, "#8:1");
        assert!(!m.kb_data.inferred);
    }

    #[tokio::test]
    async fn test_unknown_feature_in_one_representation_keeps_the_others() {
        let session = KbSession::new(Arc::new(kras_kb()));
        let annotator = Annotator::with_context(&session, context());

        let outcome = annotator
            .annotate_positional(&[mutation_row("m1", "NM_004985.5:c.35G>A", "KRAS:p.G12D")])
            .await
            .unwrap();
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.problem_genes, BTreeSet::from(["KRAS".to_string()]));
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].kb_statement_id, "#100:5");
    }

    #[tokio::test]
    async fn test_second_pass_rows_are_marked_inferred() {
        let mock = MockKnowledgeBase::new()
            .with_statements(vec![
                json!({
                    "@rid": "#100:1",
                    "relevance": {"@rid": "#10:5", "@class": "Vocabulary", "name": "oncogenic"},
                    "subject": {"@rid": "#3:1", "@class": "Feature", "displayName": "ERBB2"},
                    "conditions": [
                        {"@rid": "#9:1", "@class": "PositionalVariant", "displayName": "ERBB2:p.S310F"},
                        {"@rid": "#3:1", "@class": "Feature", "displayName": "ERBB2"},
                    ],
                }),
                json!({
                    "@rid": "#100:3",
                    "relevance": {"@rid": "#147:1", "@class": "Vocabulary", "displayName": "sensitivity"},
                    "subject": {"@rid": "#122:1", "@class": "Therapy", "displayName": "neratinib"},
                    "conditions": [
                        {"@rid": "#9:5", "@class": "CategoryVariant", "displayName": "ERBB2 oncogenic mutation"},
                        {"@rid": "#138:12", "@class": "Disease", "displayName": "breast cancer"},
                    ],
                }),
            ])
            .with_similar("#3:1", vec![json!({"@rid": "#3:1", "@class": "Feature", "name": "erbb2"})])
            .with_terms("Vocabulary", "oncogenic", vec![json!({"@rid": "#10:5", "@class": "Vocabulary", "name": "oncogenic"})])
            .with_category_variants(vec![json!({"@rid": "#9:5", "@class": "CategoryVariant", "displayName": "ERBB2 oncogenic mutation"})]);
        let session = KbSession::new(Arc::new(mock));
        let annotator = Annotator::with_context(&session, context());
        let observed = KbVariant { rid: "#9:1".into(), ..Default::default() };

        let rows = annotator.statement_matches(&[observed], "m1", VariantType::Mut).await.unwrap();
        let direct: Vec<&str> = rows.iter().filter(|m| !m.kb_data.inferred).map(|m| m.kb_statement_id.as_str()).collect();
        let inferred: Vec<&KbMatch> = rows.iter().filter(|m| m.kb_data.inferred).collect();
        assert_eq!(direct, vec!["#100:1"]);
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].kb_statement_id, "#100:3");
        assert_eq!(inferred[0].kb_variant_id, "#9:5");
        assert!(!direct.contains(&inferred[0].kb_statement_id.as_str()));
        assert!(rows.iter().all(|m| m.variant == "m1"));
    }

    #[test]
    fn test_problem_genes_for_fusion() {
        let mut sv = IprVariant::new("sv1", VariantType::Sv);
        sv.gene1 = Some("EML4".into());
        sv.gene2 = Some("ALK".into());
        assert_eq!(problem_genes_for(&sv, "unable to find the gene (ALK)"), vec!["ALK".to_string()]);
        assert_eq!(problem_genes_for(&sv, "unable to find the gene"), vec!["EML4".to_string(), "ALK".to_string()]);
    }
}
