//! Feature (gene / transcript / protein) and therapy disambiguation.

use genomatch_common::{decode_records, GenomatchError, Ontology, Result};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, error, warn};

use crate::constants::PREFERRED_GENE_SOURCE;
use crate::session::KbSession;

fn lazy_rid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#?-?\d+:-?\d+$").expect("valid record id regex"))
}

/// True for record ids such as `#12:345`.
pub fn is_rid(value: &str) -> bool {
    lazy_rid_regex().is_match(value)
}

/// Normalise a record id to the `#cluster:position` form.
pub fn to_rid(value: &str) -> String {
    if value.starts_with('#') {
        value.to_string()
    } else {
        format!("#{value}")
    }
}

/// Features named (or source-id'd) `gene`, plus their equivalents.
///
/// Versioned identifiers such as `ENSG00000133703.11` or `NM_033360.4`
/// also match unversioned records.
pub async fn equivalent_features(session: &KbSession, gene: &str) -> Result<Vec<Ontology>> {
    let body = if is_rid(gene) {
        json!({ "target": [to_rid(gene)], "queryType": "similarTo" })
    } else {
        let mut filters = Vec::new();
        let mut name = gene;
        if let Some((base, version)) = gene.split_once('.') {
            if !base.is_empty() && !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
                name = base;
                filters.push(json!({ "OR": [{ "sourceIdVersion": version }, { "sourceIdVersion": null }] }));
            }
        }
        filters.push(json!({ "OR": [{ "sourceId": name }, { "name": name }] }));
        json!({
            "target": { "target": "Feature", "filters": filters },
            "queryType": "similarTo",
        })
    };
    decode_records(session.cached_query(&body).await?)
}

/// Like [`equivalent_features`] but an empty answer is an unrecognised gene.
pub async fn require_features(session: &KbSession, gene: &str) -> Result<Vec<Ontology>> {
    let features = equivalent_features(session, gene).await?;
    if features.is_empty() {
        return Err(GenomatchError::FeatureNotFound(format!(
            "unable to find the gene ({gene}) or any equivalent representations"
        )));
    }
    Ok(features)
}

async fn source_rid(session: &KbSession, name: &str) -> Result<Option<String>> {
    let sources: Vec<Ontology> = decode_records(
        session
            .cached_query(&json!({ "target": "Source", "filters": { "name": name } }))
            .await?,
    )?;
    Ok(sources.into_iter().next().map(|s| s.rid))
}

/// Display name of the preferred (HGNC, non-deprecated) gene record for a
/// gene name or feature id. Empty when no gene record exists.
pub async fn preferred_gene_name(session: &KbSession, gene: &str) -> Result<String> {
    if let Some(hit) = session.cached_gene_name(gene) {
        return Ok(hit);
    }

    let mut genes: Vec<Ontology> = equivalent_features(session, gene)
        .await?
        .into_iter()
        .filter(|f| f.is_gene() && !f.deprecated)
        .collect();

    let preferred = if genes.is_empty() {
        error!(gene, "no genes found");
        String::new()
    } else {
        if let Some(source) = source_rid(session, PREFERRED_GENE_SOURCE).await? {
            let from_source: Vec<Ontology> = genes
                .iter()
                .filter(|g| g.source.as_ref().map(|s| s.rid()) == Some(source.as_str()))
                .cloned()
                .collect();
            if from_source.is_empty() {
                debug!(gene, source = PREFERRED_GENE_SOURCE, "no gene from preferred source");
            } else {
                genes = from_source;
            }
        }
        genes.sort_by_key(|g| g.display().to_string());
        genes.dedup_by(|a, b| a.display() == b.display());
        if genes.len() > 1 {
            warn!(
                gene,
                using = genes[0].display(),
                "multiple preferred gene names found; ignoring {:?}",
                genes[1..].iter().map(|g| g.display()).collect::<Vec<_>>()
            );
        }
        genes[0].display().to_string()
    };

    session.store_gene_name(gene.to_string(), preferred.clone());
    Ok(preferred)
}

/// Sort key ranking alternative representations of the same concept:
/// non-deprecated, non-alias, independent, best-sorted source first.
pub fn ontology_preference_key(
    record: &Ontology,
    source_sort: &HashMap<String, i64>,
) -> (bool, bool, bool, i64, String, String, String) {
    let sort = record
        .source
        .as_ref()
        .and_then(|s| s.record().and_then(|r| r.sort).or_else(|| source_sort.get(s.rid()).copied()))
        .unwrap_or(99_999);
    (
        record.deprecated,
        record.alias,
        record.dependency.is_some(),
        sort,
        record.source_id.clone().unwrap_or_default(),
        record.source_id_version.clone().unwrap_or_default(),
        record.name.clone().unwrap_or_default(),
    )
}

async fn source_sort_order(session: &KbSession) -> Result<HashMap<String, i64>> {
    let sources: Vec<Ontology> = decode_records(
        session
            .cached_query(&json!({ "target": "Source", "returnProperties": ["@rid", "sort"] }))
            .await?,
    )?;
    Ok(sources
        .into_iter()
        .filter_map(|s| s.sort.map(|sort| (s.rid, sort)))
        .collect())
}

/// Preferred representation of a therapy among all its equivalents.
pub async fn preferred_drug_representation(session: &KbSession, drug_rid: &str) -> Result<Ontology> {
    if let Some(hit) = session.cached_drug(drug_rid) {
        return Ok(hit);
    }
    let source_sort = source_sort_order(session).await?;
    let body: Value = json!({ "target": [drug_rid], "queryType": "similarTo", "treeEdges": [] });
    let mut drugs: Vec<Ontology> = decode_records(session.cached_query(&body).await?)?;
    drugs.sort_by_key(|d| ontology_preference_key(d, &source_sort));

    let drug = drugs.into_iter().next().ok_or_else(|| {
        GenomatchError::FeatureNotFound(format!("no therapy record for {drug_rid}"))
    })?;
    session.store_drug(drug_rid.to_string(), drug.clone());
    Ok(drug)
}
