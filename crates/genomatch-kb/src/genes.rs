//! Gene-level annotation flags for the `genes` report section.

use genomatch_common::{decode_records, Condition, GeneInfo, KbVariant, Ontology, RecordClass, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::info;

use crate::constants::{CANCER_GENE_LIST_SOURCE, ONCOGENE, ONCOKB_SOURCE, RELEVANCE_BASE_TERMS, TUMOUR_SUPPRESSIVE};
use crate::features::equivalent_features;
use crate::session::KbSession;
use crate::vocab::{rid_set, terms_set};

#[derive(Debug, Deserialize)]
struct StatementGenes {
    subject: Option<Ontology>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Default)]
struct GeneFlags {
    kb_statement_related: HashSet<String>,
    known_fusion_partner: HashSet<String>,
    known_small_mutation: HashSet<String>,
    oncogene: HashSet<String>,
    tumour_suppressor: HashSet<String>,
    cancer_gene_list_match: HashSet<String>,
    therapeutic_associated: HashSet<String>,
}

async fn oncokb_genes(session: &KbSession, relevance: &str) -> Result<HashSet<String>> {
    let body = json!({
        "target": "Statement",
        "filters": [
            { "source": { "target": "Source", "filters": { "name": ONCOKB_SOURCE } } },
            { "relevance": { "target": "Vocabulary", "filters": { "name": relevance } } },
        ],
        "returnProperties": ["subject.@rid", "subject.@class", "subject.biotype"],
    });
    let statements: Vec<StatementGenes> = decode_records(session.cached_query(&body).await?)?;
    Ok(statements
        .into_iter()
        .filter_map(|s| s.subject)
        .filter(Ontology::is_gene)
        .map(|g| g.rid)
        .collect())
}

async fn cancer_gene_list(session: &KbSession) -> Result<HashSet<String>> {
    let body = json!({
        "target": "Feature",
        "filters": [
            { "source": { "target": "Source", "filters": { "name": CANCER_GENE_LIST_SOURCE } } },
            { "biotype": "gene" },
        ],
        "returnProperties": ["@rid"],
    });
    let genes: Vec<Ontology> = decode_records(session.cached_query(&body).await?)?;
    Ok(rid_set(&genes))
}

async fn therapeutic_genes(session: &KbSession) -> Result<HashSet<String>> {
    let therapeutic_terms = RELEVANCE_BASE_TERMS
        .iter()
        .find(|(category, _)| *category == "therapeutic")
        .map(|(_, terms)| *terms)
        .unwrap_or_default();
    let relevance: Vec<String> = terms_set(session, therapeutic_terms).await?.into_iter().collect();
    if relevance.is_empty() {
        return Ok(HashSet::new());
    }
    let body = json!({
        "target": "Statement",
        "filters": { "relevance": relevance, "operator": "IN" },
        "returnProperties": [
            "subject.@rid", "subject.@class", "subject.biotype",
            "conditions.@rid", "conditions.@class", "conditions.biotype",
            "conditions.reference1", "conditions.reference2",
        ],
    });
    let statements: Vec<StatementGenes> = decode_records(session.cached_query(&body).await?)?;

    let mut genes = HashSet::new();
    for statement in statements {
        if let Some(subject) = statement.subject.filter(Ontology::is_gene) {
            genes.insert(subject.rid);
        }
        for condition in statement.conditions {
            match condition {
                Condition::Variant(variant) => {
                    genes.extend(
                        [variant.reference1, variant.reference2]
                            .into_iter()
                            .flatten()
                            .map(|r| r.rid().to_string()),
                    );
                }
                Condition::Other(other) if other.is_gene() => {
                    genes.insert(other.rid);
                }
                _ => {}
            }
        }
    }
    Ok(genes)
}

async fn variant_flags(session: &KbSession, gene_names: &[&str], flags: &mut GeneFlags) -> Result<()> {
    let by_name = json!({ "target": "Feature", "filters": { "name": gene_names, "operator": "IN" } });
    let body: Value = json!({
        "target": "Variant",
        "filters": { "OR": [{ "reference1": by_name }, { "reference2": by_name }] },
        "returnProperties": ["@rid", "@class", "reference1", "reference2"],
    });
    let variants: Vec<KbVariant> = decode_records(session.cached_query(&body).await?)?;

    for variant in variants {
        let reference1 = variant.reference1.as_ref().map(|r| r.rid().to_string());
        let reference2 = variant.reference2.as_ref().map(|r| r.rid().to_string());
        if let Some(r1) = &reference1 {
            flags.kb_statement_related.insert(r1.clone());
        }
        match (reference1, reference2) {
            (r1, Some(r2)) => {
                flags.kb_statement_related.insert(r2.clone());
                flags.known_fusion_partner.insert(r2);
                flags.known_fusion_partner.extend(r1);
            }
            (Some(r1), None) if variant.class == RecordClass::PositionalVariant => {
                flags.known_small_mutation.insert(r1);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Flags for every gene linked to an observed variant. Genes with no flag
/// set are omitted.
pub async fn gene_information(session: &KbSession, gene_names: &BTreeSet<String>) -> Result<Vec<GeneInfo>> {
    if gene_names.is_empty() {
        return Ok(Vec::new());
    }
    let names: Vec<&str> = gene_names.iter().map(String::as_str).collect();

    info!(genes = names.len(), "fetching variant related genes list");
    let mut flags = GeneFlags::default();
    variant_flags(session, &names, &mut flags).await?;
    info!("fetching oncogene and tumour suppressor lists");
    flags.oncogene = oncokb_genes(session, ONCOGENE).await?;
    flags.tumour_suppressor = oncokb_genes(session, TUMOUR_SUPPRESSIVE).await?;
    info!("fetching cancer gene list");
    flags.cancer_gene_list_match = cancer_gene_list(session).await?;
    info!("fetching therapeutic associated genes");
    flags.therapeutic_associated = therapeutic_genes(session).await?;

    let mut result = Vec::new();
    for name in names {
        let equivalent = rid_set(&equivalent_features(session, name).await?);
        let hit = |set: &HashSet<String>| !equivalent.is_disjoint(set);
        let info = GeneInfo {
            name: name.to_string(),
            kb_statement_related: hit(&flags.kb_statement_related),
            known_fusion_partner: hit(&flags.known_fusion_partner),
            known_small_mutation: hit(&flags.known_small_mutation),
            oncogene: hit(&flags.oncogene),
            tumour_suppressor: hit(&flags.tumour_suppressor),
            cancer_gene_list_match: hit(&flags.cancer_gene_list_match),
            therapeutic_associated: hit(&flags.therapeutic_associated),
        };
        if info.is_flagged() {
            result.push(info);
        }
    }
    info!(flagged = result.len(), "set gene annotation flags");
    Ok(result)
}
