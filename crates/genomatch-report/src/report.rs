//! Report assembly: annotate every variant section, filter and summarise the
//! matches, and merge the results into the report content document.

use chrono::Local;
use genomatch_common::{GenomatchError, IprVariant, KbMatch, Result, VariantType};
use genomatch_kb::constants::{DEFAULT_EXCLUDED_VARIANT_TYPES, MSI_CATEGORY, TMB_HIGH_CATEGORY, TMB_HIGH_THRESHOLD};
use genomatch_kb::genes::gene_information;
use genomatch_kb::KbSession;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::aggregate::{create_key_alterations, filter_structural_variants, select_expression_plots};
use crate::annotate::Annotator;
use crate::filters::{filter_kb_matches, multi_variant_filtering, KbMatchFilter};
use crate::inputs::{check_variant_links, clean_unsupported_content, preprocess_variants, trim_empty_values};
use crate::reconcile::germline_kb_matches;
use crate::summary::auto_analyst_comments;
use crate::therapeutic::create_therapeutic_options;
use crate::upload::ReportUploader;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub generate_therapeutics: bool,
    pub generate_comments: bool,
    pub match_germline: bool,
    pub multi_variant_filter: bool,
    /// Variant types never required by multi-variant statements.
    pub excluded_variant_types: Vec<String>,
    pub kb_match_filters: Vec<KbMatchFilter>,
    pub upload: bool,
    pub output_json_path: Option<PathBuf>,
    /// Write the output document even when the upload succeeded.
    pub always_write_output_json: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            generate_therapeutics: false,
            generate_comments: true,
            match_germline: true,
            multi_variant_filter: true,
            excluded_variant_types: DEFAULT_EXCLUDED_VARIANT_TYPES.iter().map(|t| t.to_string()).collect(),
            kb_match_filters: Vec::new(),
            upload: true,
            output_json_path: None,
            always_write_output_json: false,
        }
    }
}

/// `kbVersion` stamp: time matching completed.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn section_rows<'c>(content: &'c Map<String, Value>, section: &str) -> &'c [Value] {
    match content.get(section) {
        Some(Value::Array(rows)) => rows,
        _ => &[],
    }
}

fn rows_to_values<T: Serialize>(rows: &[T]) -> Result<Vec<Value>> {
    rows.iter()
        .map(|row| Ok(trim_empty_values(serde_json::to_value(row)?)))
        .collect()
}

fn has_msi(content: &Map<String, Value>) -> bool {
    section_rows(content, "msi")
        .iter()
        .any(|row| row.get("kbCategory").and_then(Value::as_str) == Some(MSI_CATEGORY))
}

/// Combined SNV + indel mutation burden, when reported.
fn tumour_mutation_burden(content: &Map<String, Value>) -> Option<f64> {
    let burden = content.get("tmburMutationBurden")?;
    let snv = burden.get("genomeSnvTmb").and_then(Value::as_f64)?;
    let indel = burden.get("genomeIndelTmb").and_then(Value::as_f64)?;
    Some(snv + indel)
}

fn signature_row(category: &str, variant_type: VariantType) -> IprVariant {
    let mut row = IprVariant::new(category, variant_type);
    row.variant = category.to_string();
    row.kb_category = Some(category.to_string());
    row
}

/// Run the matching for one report and build the upload document.
///
/// With an uploader the document is uploaded; on upload failure (or always,
/// when configured) it is written to `output_json_path` first and the upload
/// error is returned afterwards.
pub async fn create_report(
    session: &KbSession,
    uploader: Option<&dyn ReportUploader>,
    content: Value,
    options: &ReportOptions,
) -> Result<Value> {
    let Value::Object(content) = content else {
        return Err(GenomatchError::InvalidInput("report content must be a JSON object".into()));
    };
    let disease_name = content
        .get("kbDiseaseMatch")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| GenomatchError::InvalidInput("report content is missing kbDiseaseMatch".into()))?
        .to_string();
    for filter in &options.kb_match_filters {
        filter.validate()?;
    }

    let small_mutations = preprocess_variants(section_rows(&content, "smallMutations"), VariantType::Mut)?;
    let copy_variants = preprocess_variants(section_rows(&content, "copyVariants"), VariantType::Cnv)?;
    let structural_variants = preprocess_variants(section_rows(&content, "structuralVariants"), VariantType::Sv)?;
    let expression_variants = preprocess_variants(section_rows(&content, "expressionVariants"), VariantType::Exp)?;
    info!(
        small_mutations = small_mutations.len(),
        copy_variants = copy_variants.len(),
        structural_variants = structural_variants.len(),
        expression_variants = expression_variants.len(),
        "loaded report variants"
    );

    let genes_with_variants: BTreeSet<String> =
        check_variant_links(&small_mutations, &expression_variants, &copy_variants, &structural_variants);

    let annotator = Annotator::new(session, &disease_name).await?;
    let mut alterations: Vec<KbMatch> = Vec::new();

    info!("annotating small mutations");
    alterations.extend(annotator.annotate_positional(&small_mutations).await?.matches);
    info!("annotating structural variants");
    alterations.extend(annotator.annotate_positional(&structural_variants).await?.matches);
    info!("annotating copy variants");
    alterations.extend(annotator.annotate_copy(&copy_variants).await?.matches);
    info!("annotating expression variants");
    alterations.extend(annotator.annotate_expression(&expression_variants).await?.matches);

    let mut signature_variants = Vec::new();
    if has_msi(&content) {
        info!("annotating microsatellite instability");
        alterations.extend(annotator.annotate_msi().await?);
        signature_variants.push(signature_row(MSI_CATEGORY, VariantType::Msi));
    }
    match tumour_mutation_burden(&content) {
        Some(burden) if burden >= TMB_HIGH_THRESHOLD => {
            info!(burden, "annotating high tumour mutation burden");
            alterations.extend(annotator.annotate_tmb().await?);
            signature_variants.push(signature_row(TMB_HIGH_CATEGORY, VariantType::Tmb));
        }
        Some(burden) => info!(burden, "tumour mutation burden below threshold"),
        None => {}
    }

    let all_variants: Vec<IprVariant> = expression_variants
        .iter()
        .chain(&copy_variants)
        .chain(&structural_variants)
        .chain(&small_mutations)
        .chain(&signature_variants)
        .cloned()
        .collect();

    if options.multi_variant_filter {
        let excluded: Vec<&str> = options.excluded_variant_types.iter().map(String::as_str).collect();
        alterations = multi_variant_filtering(session, alterations, &excluded).await?;
    }
    if options.match_germline {
        alterations = germline_kb_matches(alterations, &all_variants);
    }
    let (kept, dropped) = filter_kb_matches(alterations, &options.kb_match_filters);
    if !dropped.is_empty() {
        info!(dropped = dropped.len(), "dropped matches by configured filters");
    }
    let alterations = kept;

    let (key_alterations, variant_counts) = create_key_alterations(&alterations, &all_variants);

    info!("fetching gene annotations");
    let genes = gene_information(session, &genes_with_variants).await?;

    let targets = if options.generate_therapeutics {
        info!("generating therapeutic options");
        create_therapeutic_options(session, &alterations, &all_variants).await?
    } else {
        Vec::new()
    };

    let comments = if options.generate_comments {
        info!("generating analyst comments");
        auto_analyst_comments(session, &alterations, &disease_name, &all_variants).await?
    } else {
        String::new()
    };

    let linked = |v: &&IprVariant| v.gene().is_some_and(|g| genes_with_variants.contains(g));
    let linked_copy: Vec<&IprVariant> = copy_variants.iter().filter(linked).collect();
    let linked_expression: Vec<&IprVariant> = expression_variants.iter().filter(linked).collect();
    let images = select_expression_plots(&alterations, &all_variants);
    let reported_svs = filter_structural_variants(structural_variants, &alterations, &genes);

    let mut output = content;
    output.insert("kbMatches".into(), Value::Array(rows_to_values(&alterations)?));
    output.insert("copyVariants".into(), Value::Array(rows_to_values(&linked_copy)?));
    output.insert("smallMutations".into(), Value::Array(rows_to_values(&small_mutations)?));
    output.insert("expressionVariants".into(), Value::Array(rows_to_values(&linked_expression)?));
    output.insert("structuralVariants".into(), Value::Array(rows_to_values(&reported_svs)?));
    output.insert("kbDiseaseMatch".into(), json!(disease_name));
    output.insert("kbUrl".into(), json!(session.url()));
    output.insert("kbVersion".into(), json!(timestamp()));
    output.insert("genes".into(), serde_json::to_value(&genes)?);
    output.insert("genomicAlterationsIdentified".into(), serde_json::to_value(&key_alterations)?);
    output.insert("variantCounts".into(), serde_json::to_value(&variant_counts)?);
    output.insert("analystComments".into(), json!({ "comments": comments }));
    output.insert("therapeuticTarget".into(), serde_json::to_value(&targets)?);
    match output.entry("images").or_insert_with(|| json!([])) {
        Value::Array(existing) => existing.extend(images.iter().map(|i| json!(i))),
        other => warn!(images = %other, "content images is not a list; expression plots not added"),
    }

    let mut output = Value::Object(output);
    clean_unsupported_content(&mut output);

    let mut uploaded = false;
    let mut upload_error = None;
    if let Some(uploader) = uploader.filter(|_| options.upload) {
        info!(url = uploader.url(), "uploading report");
        match uploader.upload_report(&output).await {
            Ok(acknowledgment) => {
                info!(%acknowledgment, "report uploaded");
                if let (Value::Object(doc), Value::Object(ack)) = (&mut output, acknowledgment) {
                    doc.extend(ack);
                }
                uploaded = true;
            }
            Err(err) => {
                error!("report upload failed: {}", err);
                upload_error = Some(err);
            }
        }
    }

    if let Some(path) = &options.output_json_path {
        if options.always_write_output_json || !uploaded {
            info!(path = %path.display(), "writing report upload json");
            tokio::fs::write(path, serde_json::to_string(&output)?).await?;
        }
    }
    info!("made {} requests to graphkb", session.request_count());

    match upload_error {
        Some(err) => Err(err),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tumour_mutation_burden() {
        let content = json!({"tmburMutationBurden": {"genomeSnvTmb": 8.5, "genomeIndelTmb": 2.0}});
        let Value::Object(content) = content else { unreachable!() };
        assert_eq!(tumour_mutation_burden(&content), Some(10.5));
        assert!(tumour_mutation_burden(&Map::new()).is_none());
    }

    #[test]
    fn test_msi_detection() {
        let Value::Object(content) = json!({"msi": [{"kbCategory": "microsatellite instability", "score": 30}]}) else {
            unreachable!()
        };
        assert!(has_msi(&content));
        assert!(!has_msi(&Map::new()));
    }

    #[test]
    fn test_default_options() {
        let options = ReportOptions::default();
        assert!(options.match_germline);
        assert!(options.multi_variant_filter);
        assert_eq!(options.excluded_variant_types, vec!["wildtype".to_string()]);
    }
}
