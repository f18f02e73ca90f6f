//! Match filters: configured category filters and multi-variant statement
//! completeness.

use genomatch_common::{decode_records, Condition, GenomatchError, KbMatch, Result};
use genomatch_kb::vocab::terms_set;
use genomatch_kb::KbSession;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Match fields a filter condition may test.
pub const FILTERABLE_FIELDS: [&str; 16] = [
    "variant",
    "variantType",
    "approvedTherapy",
    "category",
    "context",
    "disease",
    "evidenceLevel",
    "kbStatementId",
    "kbVariant",
    "kbVariantId",
    "matchedCancer",
    "reference",
    "relevance",
    "externalSource",
    "externalStatementId",
    "reviewStatus",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub values: Vec<Value>,
}

impl FieldCondition {
    pub fn new(field: &str, values: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            values: values.iter().map(|v| json!(v)).collect(),
        }
    }

    fn holds_for(&self, m: &KbMatch) -> bool {
        self.values.contains(&field_value(m, &self.field))
    }
}

/// Drops a match when every `require_all_of` field has an allowed value and
/// every `exclude_all_of` field has a value outside its list.
///
/// e.g. drop cancer predisposition matches not sourced from a given registry:
/// require `category` in [cancer predisposition], exclude `externalSource` in [CGL].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KbMatchFilter {
    #[serde(default)]
    pub require_all_of: Vec<FieldCondition>,
    #[serde(default)]
    pub exclude_all_of: Vec<FieldCondition>,
}

impl KbMatchFilter {
    pub fn require(mut self, field: &str, values: &[&str]) -> Self {
        self.require_all_of.push(FieldCondition::new(field, values));
        self
    }

    pub fn exclude(mut self, field: &str, values: &[&str]) -> Self {
        self.exclude_all_of.push(FieldCondition::new(field, values));
        self
    }

    /// Reject conditions on fields a match does not have.
    pub fn validate(&self) -> Result<()> {
        for condition in self.require_all_of.iter().chain(&self.exclude_all_of) {
            if !FILTERABLE_FIELDS.contains(&condition.field.as_str()) {
                return Err(GenomatchError::Config(format!(
                    "kb match filter on unknown field '{}'",
                    condition.field
                )));
            }
        }
        Ok(())
    }

    pub fn drops(&self, m: &KbMatch) -> bool {
        self.require_all_of.iter().all(|c| c.holds_for(m))
            && self.exclude_all_of.iter().all(|c| !c.holds_for(m))
    }
}

fn optional(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |v| json!(v))
}

fn field_value(m: &KbMatch, field: &str) -> Value {
    match field {
        "variant" => json!(m.variant),
        "variantType" => json!(m.variant_type.as_str()),
        "approvedTherapy" => json!(m.approved_therapy),
        "category" => json!(m.category),
        "context" => optional(&m.context),
        "disease" => json!(m.disease),
        "evidenceLevel" => json!(m.evidence_level),
        "kbStatementId" => json!(m.kb_statement_id),
        "kbVariant" => json!(m.kb_variant),
        "kbVariantId" => json!(m.kb_variant_id),
        "matchedCancer" => json!(m.matched_cancer),
        "reference" => json!(m.reference),
        "relevance" => json!(m.relevance),
        "externalSource" => optional(&m.external_source),
        "externalStatementId" => optional(&m.external_statement_id),
        "reviewStatus" => optional(&m.review_status),
        _ => Value::Null,
    }
}

/// Split matches into (kept, dropped); a match is dropped by any filter that drops it.
pub fn filter_kb_matches(matches: Vec<KbMatch>, filters: &[KbMatchFilter]) -> (Vec<KbMatch>, Vec<KbMatch>) {
    if filters.is_empty() {
        return (matches, Vec::new());
    }
    info!(filters = filters.len(), "filtering knowledge-base matches");
    matches.into_iter().partition(|m| {
        match filters.iter().find(|f| f.drops(m)) {
            Some(filter) => {
                info!(statement = %m.kb_statement_id, kb_variant = %m.kb_variant, ?filter, "dropping filtered match");
                false
            }
            None => true,
        }
    })
}

// ── Multi-variant statements ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatementConditions {
    #[serde(rename = "@rid")]
    rid: String,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Drop matches to statements that need more variants than were matched.
///
/// Variant conditions whose type falls under `excluded_types` (e.g.
/// wildtype) are not required.
pub async fn multi_variant_filtering(
    session: &KbSession,
    matches: Vec<KbMatch>,
    excluded_types: &[&str],
) -> Result<Vec<KbMatch>> {
    if matches.is_empty() {
        return Ok(matches);
    }
    let statement_rids: Vec<&str> = {
        let mut rids: Vec<&str> = matches.iter().map(|m| m.kb_statement_id.as_str()).collect();
        rids.sort_unstable();
        rids.dedup();
        rids
    };
    let matched_variants: HashSet<&str> = matches.iter().map(|m| m.kb_variant_id.as_str()).collect();

    let body = json!({
        "target": "Statement",
        "filters": { "@rid": statement_rids, "operator": "IN" },
        "history": true,
        "returnProperties": ["@rid", "conditions.@rid", "conditions.@class", "conditions.type"],
    });
    let statements: Vec<StatementConditions> = decode_records(session.query(&body).await?)?;

    let excluded = match excluded_types.iter().any(|t| !t.is_empty()) {
        true => terms_set(session, excluded_types).await?,
        false => HashSet::new(),
    };

    let complete: HashMap<String, bool> = statements
        .into_iter()
        .map(|statement| {
            let is_complete = statement
                .conditions
                .iter()
                .filter_map(Condition::as_variant)
                .filter(|v| {
                    v.variant_type
                        .as_ref()
                        .map_or(true, |t| !excluded.contains(t.rid()))
                })
                .all(|v| matched_variants.contains(v.rid.as_str()));
            (statement.rid, is_complete)
        })
        .collect();

    let before = matches.len();
    let kept: Vec<KbMatch> = matches
        .into_iter()
        .filter(|m| {
            let keep = complete.get(&m.kb_statement_id).copied().unwrap_or(false);
            if !keep {
                debug!(statement = %m.kb_statement_id, variant = %m.variant, "dropping match to incompletely matched statement");
            }
            keep
        })
        .collect();
    info!("multi-variant filtering kept {} of {} matches", kept.len(), before);
    Ok(kept)
}
