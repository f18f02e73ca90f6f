//! Rows produced by matching and aggregation, in report upload shape.

use serde::{Deserialize, Serialize};

use crate::variants::VariantType;

/// Extra annotation attached to a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KbData {
    /// Reached through the second (inference) matching pass.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inferred: bool,
}

/// One observed variant matched to one knowledge-base statement.
///
/// Equality is over every field; duplicate detection relies on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbMatch {
    /// Key of the observed variant this match belongs to.
    pub variant: String,
    pub variant_type: VariantType,
    pub approved_therapy: bool,
    pub category: String,
    pub context: Option<String>,
    pub kb_context_id: Option<String>,
    pub disease: String,
    pub evidence_level: String,
    pub kb_statement_id: String,
    pub kb_variant: String,
    pub kb_variant_id: String,
    pub matched_cancer: bool,
    pub reference: String,
    pub relevance: String,
    pub kb_relevance_id: String,
    pub external_source: Option<String>,
    pub external_statement_id: Option<String>,
    pub review_status: Option<String>,
    #[serde(default)]
    pub kb_data: KbData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAlteration {
    pub gene_variant: String,
    /// Number of matches supporting this alteration.
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounts {
    #[serde(rename = "smallMutations")]
    pub small_mutations: usize,
    #[serde(rename = "CNVs")]
    pub cnvs: usize,
    #[serde(rename = "SVs")]
    pub svs: usize,
    #[serde(rename = "expressionOutliers")]
    pub expression_outliers: usize,
    #[serde(rename = "variantsUnknown")]
    pub variants_unknown: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TherapeuticOptionType {
    Chemoresistance,
    Therapeutic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapeuticOption {
    pub gene: String,
    #[serde(rename = "type")]
    pub option_type: TherapeuticOptionType,
    pub therapy: String,
    pub variant: String,
    pub context: String,
    pub evidence_level: String,
    pub notes: String,
    pub rank: usize,
}

/// Gene-level flags; genes with no flag set are not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneInfo {
    pub name: String,
    #[serde(default)]
    pub kb_statement_related: bool,
    #[serde(default)]
    pub known_fusion_partner: bool,
    #[serde(default)]
    pub known_small_mutation: bool,
    #[serde(default)]
    pub oncogene: bool,
    #[serde(default)]
    pub tumour_suppressor: bool,
    #[serde(default)]
    pub cancer_gene_list_match: bool,
    #[serde(default)]
    pub therapeutic_associated: bool,
}

impl GeneInfo {
    pub fn is_flagged(&self) -> bool {
        self.kb_statement_related
            || self.known_fusion_partner
            || self.known_small_mutation
            || self.oncogene
            || self.tumour_suppressor
            || self.cancer_gene_list_match
            || self.therapeutic_associated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub key: String,
    pub path: String,
}
