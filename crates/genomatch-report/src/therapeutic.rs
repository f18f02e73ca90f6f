//! Therapeutic options table.

use genomatch_common::{IprVariant, KbMatch, Result, TherapeuticOption, TherapeuticOptionType};
use genomatch_kb::constants::RESISTANCE_BASE_TERMS;
use genomatch_kb::features::preferred_drug_representation;
use genomatch_kb::vocab::terms_set;
use genomatch_kb::KbSession;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::aggregate::{create_variant_name_tuple, find_variant};

const OPTION_DELIMITER: &str = " / ";

/// (gene, type, therapy, variant)
type OptionKey = (String, TherapeuticOptionType, String, String);

#[derive(Default)]
struct OptionGroup {
    evidence_levels: BTreeSet<String>,
    contexts: BTreeSet<String>,
}

fn delimited(values: BTreeSet<String>, delimiter: &str) -> String {
    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(delimiter)
}

/// Group therapeutic matches by (gene, type, therapy, variant) and rank each
/// type separately, starting at 0.
pub async fn create_therapeutic_options(
    session: &KbSession,
    matches: &[KbMatch],
    variants: &[IprVariant],
) -> Result<Vec<TherapeuticOption>> {
    let resistance_markers = terms_set(session, &RESISTANCE_BASE_TERMS).await?;
    let mut groups: BTreeMap<OptionKey, OptionGroup> = BTreeMap::new();

    for m in matches {
        if m.category != "therapeutic" || m.relevance == "eligibility" {
            continue;
        }
        let Some(context_id) = m.kb_context_id.as_deref() else {
            warn!(statement = %m.kb_statement_id, "therapeutic match without a therapy");
            continue;
        };
        let variant = match find_variant(variants, m.variant_type, &m.variant) {
            Ok(variant) => variant,
            Err(err) => {
                warn!(statement = %m.kb_statement_id, "skipping therapeutic option: {}", err);
                continue;
            }
        };
        let option_type = if resistance_markers.contains(&m.kb_relevance_id) {
            TherapeuticOptionType::Chemoresistance
        } else {
            TherapeuticOptionType::Therapeutic
        };
        let drug = preferred_drug_representation(session, context_id).await?;
        let (gene, variant_label) = create_variant_name_tuple(variant);

        let group = groups
            .entry((gene, option_type, drug.display().to_string(), variant_label))
            .or_default();
        group.evidence_levels.insert(m.evidence_level.clone());
        group.contexts.insert(m.relevance.clone());
    }

    let mut ranks: BTreeMap<TherapeuticOptionType, usize> = BTreeMap::new();
    let options: Vec<TherapeuticOption> = groups
        .into_iter()
        .map(|((gene, option_type, therapy, variant), group)| {
            let rank = ranks.entry(option_type).or_default();
            let option = TherapeuticOption {
                gene,
                option_type,
                therapy,
                variant,
                context: delimited(group.contexts, OPTION_DELIMITER),
                evidence_level: delimited(group.evidence_levels, OPTION_DELIMITER),
                notes: String::new(),
                rank: *rank,
            };
            *rank += 1;
            option
        })
        .collect();
    info!(options = options.len(), "created therapeutic options");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use genomatch_common::{KbData, VariantType};
    use genomatch_kb::MockKnowledgeBase;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn therapeutic_match(key: &str, drug: &str, relevance: (&str, &str), evidence_level: &str) -> KbMatch {
        KbMatch {
            variant: key.into(),
            variant_type: VariantType::Mut,
            approved_therapy: false,
            category: "therapeutic".into(),
            context: Some("drug".into()),
            kb_context_id: Some(drug.into()),
            disease: "lung cancer".into(),
            evidence_level: evidence_level.into(),
            kb_statement_id: format!("#100:{evidence_level}"),
            kb_variant: "EGFR mutation".into(),
            kb_variant_id: "#9:1".into(),
            matched_cancer: true,
            reference: String::new(),
            relevance: relevance.1.into(),
            kb_relevance_id: relevance.0.into(),
            external_source: None,
            external_statement_id: None,
            review_status: None,
            kb_data: KbData::default(),
        }
    }

    fn session() -> KbSession {
        let mock = MockKnowledgeBase::new()
            .with_terms("Vocabulary", "no sensitivity", vec![json!({"@rid": "#147:9", "@class": "Vocabulary", "name": "no sensitivity"})])
            .with_similar("#20:1", vec![json!({"@rid": "#20:1", "@class": "Therapy", "displayName": "erlotinib"})])
            .with_similar("#20:2", vec![json!({"@rid": "#20:2", "@class": "Therapy", "displayName": "gefitinib"})]);
        KbSession::new(Arc::new(mock))
    }

    fn variants() -> Vec<IprVariant> {
        let mut row = IprVariant::new("m1", VariantType::Mut);
        row.gene = Some("EGFR".into());
        row.variant = "EGFR:p.L858R".into();
        vec![row]
    }

    #[tokio::test]
    async fn test_evidence_levels_are_aggregated_per_option() {
        let matches = vec![
            therapeutic_match("m1", "#20:1", ("#147:1", "sensitivity"), "CIViC B"),
            therapeutic_match("m1", "#20:1", ("#147:1", "sensitivity"), "CIViC A"),
        ];
        let options = create_therapeutic_options(&session(), &matches, &variants()).await.unwrap();
        assert_eq!(
            options,
            vec![TherapeuticOption {
                gene: "EGFR".into(),
                option_type: TherapeuticOptionType::Therapeutic,
                therapy: "erlotinib".into(),
                variant: "p.L858R".into(),
                context: "sensitivity".into(),
                evidence_level: "CIViC A / CIViC B".into(),
                notes: String::new(),
                rank: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_chemoresistance_groups_first_with_per_type_ranks() {
        let matches = vec![
            therapeutic_match("m1", "#20:2", ("#147:1", "sensitivity"), "1"),
            therapeutic_match("m1", "#20:1", ("#147:1", "sensitivity"), "2"),
            therapeutic_match("m1", "#20:1", ("#147:9", "no sensitivity"), "3"),
            therapeutic_match("m1", "#20:2", ("#147:5", "eligibility"), "4"),
        ];
        let options = create_therapeutic_options(&session(), &matches, &variants()).await.unwrap();
        let summary: Vec<(&str, TherapeuticOptionType, usize)> =
            options.iter().map(|o| (o.therapy.as_str(), o.option_type, o.rank)).collect();
        assert_eq!(
            summary,
            vec![
                ("erlotinib", TherapeuticOptionType::Chemoresistance, 0),
                ("erlotinib", TherapeuticOptionType::Therapeutic, 0),
                ("gefitinib", TherapeuticOptionType::Therapeutic, 1),
            ]
        );
    }
}
