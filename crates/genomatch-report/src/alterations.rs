//! Statement → alteration (kbMatch) conversion.
//!
//! Conversion is a pure function of the statement and the run context; the
//! statement is never modified, so converting twice yields identical rows.

use genomatch_common::{KbData, KbMatch, Statement, VariantType};
use genomatch_kb::RelevanceCategorizer;
use std::collections::HashSet;
use tracing::debug;

/// Run-level facts every conversion needs, resolved once at run start.
#[derive(Debug, Clone, Default)]
pub struct ConversionContext {
    /// Disease ids equivalent to (or below / above) the report disease.
    pub disease_matches: HashSet<String>,
    /// Evidence level ids counted as an approved therapy.
    pub approved_evidence_levels: HashSet<String>,
    pub categorizer: RelevanceCategorizer,
}

/// The observed variant an alteration is attributed to.
#[derive(Debug, Clone, Copy)]
pub struct MatchOrigin<'a> {
    pub key: &'a str,
    pub variant_type: VariantType,
    pub inferred: bool,
}

fn sorted_join<'a>(values: impl Iterator<Item = &'a str>, delimiter: &str) -> String {
    let mut values: Vec<&str> = values.collect();
    values.sort_unstable();
    values.dedup();
    values.join(delimiter)
}

pub struct AlterationConverter<'a> {
    context: &'a ConversionContext,
}

impl<'a> AlterationConverter<'a> {
    pub fn new(context: &'a ConversionContext) -> Self {
        Self { context }
    }

    pub fn is_disease_match(&self, statement: &Statement) -> bool {
        statement
            .disease_conditions()
            .any(|d| self.context.disease_matches.contains(&d.rid))
    }

    pub fn is_approved(&self, statement: &Statement) -> bool {
        statement
            .evidence_level
            .iter()
            .any(|level| self.context.approved_evidence_levels.contains(&level.rid))
    }

    /// One row per variant condition of the statement that was matched.
    ///
    /// Prognostic statements outside the report disease produce no rows.
    pub fn convert(&self, statement: &Statement, matched_variants: &HashSet<String>, origin: MatchOrigin<'_>) -> Vec<KbMatch> {
        let category = self.context.categorizer.category_or_unknown(&statement.relevance.rid);
        let matched_cancer = self.is_disease_match(statement);

        if category == "prognostic" && !matched_cancer {
            debug!(statement = %statement.rid, "dropping prognostic statement outside the report disease");
            return Vec::new();
        }

        let approved_therapy = self.is_approved(statement);
        let disease = sorted_join(statement.disease_conditions().map(|d| d.display()), ";");
        let evidence_level = sorted_join(statement.evidence_level.iter().map(|e| e.display()), ";");
        let reference = sorted_join(statement.evidence.iter().map(|e| e.display()), ";");
        let external_source = statement
            .source
            .as_ref()
            .and_then(|s| s.record())
            .map(|s| s.display().to_string());

        statement
            .variant_conditions()
            .filter(|variant| matched_variants.contains(&variant.rid))
            .map(|variant| KbMatch {
                variant: origin.key.to_string(),
                variant_type: origin.variant_type,
                approved_therapy,
                category: category.to_string(),
                context: statement.subject.as_ref().map(|s| s.display().to_string()),
                kb_context_id: statement.subject.as_ref().map(|s| s.rid.clone()),
                disease: disease.clone(),
                evidence_level: evidence_level.clone(),
                kb_statement_id: statement.rid.clone(),
                kb_variant: variant.display().to_string(),
                kb_variant_id: variant.rid.clone(),
                matched_cancer,
                reference: reference.clone(),
                relevance: statement.relevance.display().to_string(),
                kb_relevance_id: statement.relevance.rid.clone(),
                external_source: external_source.clone(),
                external_statement_id: statement.source_id.clone(),
                review_status: statement.review_status.clone(),
                kb_data: KbData { inferred: origin.inferred },
            })
            .collect()
    }
}
