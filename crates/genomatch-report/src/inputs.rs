//! Input preprocessing and output clean-up of report content sections.

use genomatch_common::{GenomatchError, IprVariant, Result, VariantType};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, warn};

/// Variant sections of the report content, with the type each row gets.
pub const VARIANT_SECTIONS: [(&str, VariantType); 4] = [
    ("smallMutations", VariantType::Mut),
    ("copyVariants", VariantType::Cnv),
    ("expressionVariants", VariantType::Exp),
    ("structuralVariants", VariantType::Sv),
];

/// Fields kept on output rows even when empty.
const KEEP_EMPTY: [&str; 2] = ["gene1", "gene2"];

fn text(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// `(gene1,gene2):fusion(e.exon1,e.exon2)`; unknown parts are `?`.
pub fn create_graphkb_sv_notation(row: &IprVariant) -> Result<String> {
    let mut genes = (row.gene1(), row.gene2());
    let mut exons = (IprVariant::exon_label(&row.exon1), IprVariant::exon_label(&row.exon2));
    if genes.0.is_none() {
        genes = (genes.1, genes.0);
        exons = (exons.1, exons.0);
    }
    let Some(gene1) = genes.0 else {
        return Err(GenomatchError::InvalidInput(format!(
            "both genes cannot be blank for a structural variant {}. At least 1 gene must be entered",
            row.key
        )));
    };
    Ok(format!(
        "({},{}):fusion(e.{},e.{})",
        gene1,
        genes.1.unwrap_or("?"),
        exons.0,
        exons.1
    ))
}

fn default_variant(row: &IprVariant) -> Result<String> {
    Ok(match row.variant_type {
        VariantType::Cnv | VariantType::Exp => row.kb_category().unwrap_or_default().to_string(),
        VariantType::Sv => create_graphkb_sv_notation(row)?,
        VariantType::Mut => match (row.gene(), row.protein_change.as_deref().filter(|p| !p.is_empty())) {
            (Some(gene), Some(change)) => format!("{gene}:{change}"),
            _ => [&row.hgvs_protein, &row.hgvs_cds, &row.hgvs_genomic]
                .into_iter()
                .find_map(|h| h.as_deref().filter(|h| !h.is_empty()))
                .unwrap_or_default()
                .to_string(),
        },
        VariantType::Msi | VariantType::Tmb => row.kb_category().unwrap_or_default().to_string(),
    })
}

/// Type the rows of one content section and fill in their `variant` notation.
///
/// Rows without a `key` are rejected.
pub fn preprocess_variants(rows: &[Value], variant_type: VariantType) -> Result<Vec<IprVariant>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let Some(object) = row.as_object() else {
            return Err(GenomatchError::InvalidInput(format!(
                "{variant_type} row {index} is not an object"
            )));
        };
        let Some(key) = text(object, "key") else {
            return Err(GenomatchError::InvalidInput(format!(
                "{variant_type} row {index} is missing the required 'key' field"
            )));
        };
        if !seen.insert(key.clone()) {
            warn!(key = %key, variant_type = %variant_type, "duplicate variant key");
        }

        let mut object = object.clone();
        object.insert("key".into(), Value::String(key));
        object.insert("variantType".into(), Value::String(variant_type.as_str().into()));
        let mut variant: IprVariant = serde_json::from_value(Value::Object(object))
            .map_err(|e| GenomatchError::InvalidInput(format!("{variant_type} row {index}: {e}")))?;
        if variant.variant.is_empty() {
            variant.variant = default_variant(&variant)?;
        }
        result.push(variant);
    }
    Ok(result)
}

/// Genes with an observed variant. Copy/expression genes lacking the
/// complementary data are reported at debug level.
pub fn check_variant_links(
    small_mutations: &[IprVariant],
    expression_variants: &[IprVariant],
    copy_variants: &[IprVariant],
    structural_variants: &[IprVariant],
) -> BTreeSet<String> {
    let copy_genes: HashSet<&str> = copy_variants.iter().filter_map(IprVariant::gene).collect();
    let expression_genes: HashSet<&str> = expression_variants.iter().filter_map(IprVariant::gene).collect();
    let mut genes_with_variants: BTreeSet<String> = BTreeSet::new();
    let mut missing_genes: BTreeSet<&str> = BTreeSet::new();
    let mut missing_messages: BTreeSet<String> = BTreeSet::new();

    for variant in copy_variants {
        let Some(gene) = variant.gene() else {
            error!(key = %variant.key, "copy_variant data cannot be applied to an empty gene name");
            continue;
        };
        if !variant.variant.is_empty() {
            genes_with_variants.insert(gene.to_string());
            if !expression_genes.is_empty() && !expression_genes.contains(gene) {
                missing_genes.insert(gene);
                missing_messages.insert(format!("gene ({gene}) has a copy variant but is missing expression information"));
            }
        }
    }

    for variant in expression_variants {
        let Some(gene) = variant.gene() else {
            error!(key = %variant.key, "expression_variant data cannot be applied to an empty gene name");
            continue;
        };
        if !variant.variant.is_empty() {
            genes_with_variants.insert(gene.to_string());
            if !copy_genes.is_empty() && !copy_genes.contains(gene) {
                missing_genes.insert(gene);
                missing_messages.insert(format!("gene ({gene}) has an expression variant but is missing copy number information"));
            }
        }
    }

    for variant in small_mutations {
        let Some(gene) = variant.gene() else {
            error!(key = %variant.key, "small_mutation data cannot be applied to an empty gene name");
            continue;
        };
        if !copy_genes.is_empty() && !copy_genes.contains(gene) {
            missing_genes.insert(gene);
            missing_messages.insert(format!("gene ({gene}) has a small mutation but is missing copy number information"));
        }
        if !expression_genes.is_empty() && !expression_genes.contains(gene) {
            missing_genes.insert(gene);
            missing_messages.insert(format!("gene ({gene}) has a small mutation but is missing expression information"));
        }
        genes_with_variants.insert(gene.to_string());
    }

    for variant in structural_variants {
        for gene in [variant.gene1(), variant.gene2()].into_iter().flatten() {
            if !copy_genes.contains(gene) {
                missing_genes.insert(gene);
                missing_messages.insert(format!("gene ({gene}) has a structural variant but is missing copy number information"));
            }
            if !expression_genes.contains(gene) {
                missing_genes.insert(gene);
                missing_messages.insert(format!("gene ({gene}) has a structural variant but is missing expression information"));
            }
            genes_with_variants.insert(gene.to_string());
        }
    }

    if !missing_messages.is_empty() {
        warn!("missing information for {} genes", missing_genes.len());
        for message in &missing_messages {
            debug!("{}", message);
        }
    }
    genes_with_variants
}

/// Drop null and empty-string values from an output row.
pub fn trim_empty_values(row: Value) -> Value {
    match row {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, value)| {
                    KEEP_EMPTY.contains(&key.as_str()) || !(value.is_null() || value.as_str() == Some(""))
                })
                .collect(),
        ),
        other => other,
    }
}

/// Remove fields used while matching that the reporting service does not accept.
pub fn clean_unsupported_content(document: &mut Value) {
    for (section, _) in VARIANT_SECTIONS {
        if let Some(Value::Array(rows)) = document.get_mut(section) {
            for row in rows.iter_mut().filter_map(Value::as_object_mut) {
                for column in ["variant", "variantType", "histogramImage"] {
                    row.remove(column);
                }
            }
        }
    }
    if let Some(Value::Array(rows)) = document.get_mut("kbMatches") {
        for row in rows.iter_mut().filter_map(Value::as_object_mut) {
            row.remove("kbContextId");
            row.remove("kbRelevanceId");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_preprocess_sets_type_and_variant() {
        let rows = vec![
            json!({"key": "m1", "gene": "KRAS", "proteinChange": "p.G12D"}),
            json!({"key": "m2", "gene": "TP53", "hgvsCds": "ENST00000269305:c.817C>T"}),
        ];
        let result = preprocess_variants(&rows, VariantType::Mut).unwrap();
        assert_eq!(result[0].variant, "KRAS:p.G12D");
        assert_eq!(result[0].variant_type, VariantType::Mut);
        assert_eq!(result[1].variant, "ENST00000269305:c.817C>T");

        let copies = preprocess_variants(&[json!({"key": "c1", "gene": "ERBB2", "kbCategory": "amplification"})], VariantType::Cnv)
            .unwrap();
        assert_eq!(copies[0].variant, "amplification");
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let err = preprocess_variants(&[json!({"gene": "KRAS"})], VariantType::Mut).unwrap_err();
        assert!(matches!(err, GenomatchError::InvalidInput(_)));
    }

    #[test]
    fn test_sv_notation() {
        let mut sv = IprVariant::new("sv1", VariantType::Sv);
        sv.gene1 = Some("EML4".into());
        sv.gene2 = Some("ALK".into());
        sv.exon1 = Some(json!(13.0));
        sv.exon2 = Some(json!("20"));
        assert_eq!(create_graphkb_sv_notation(&sv).unwrap(), "(EML4,ALK):fusion(e.13,e.20)");

        sv.gene1 = None;
        assert_eq!(create_graphkb_sv_notation(&sv).unwrap(), "(ALK,?):fusion(e.20,e.13)");

        sv.gene2 = None;
        assert!(create_graphkb_sv_notation(&sv).is_err());
    }

    #[test]
    fn test_variant_links() {
        let mutation = preprocess_variants(&[json!({"key": "m1", "gene": "KRAS", "proteinChange": "p.G12D"})], VariantType::Mut).unwrap();
        let copies = preprocess_variants(
            &[
                json!({"key": "c1", "gene": "KRAS", "kbCategory": "amplification"}),
                json!({"key": "c2", "gene": "PTEN"}),
            ],
            VariantType::Cnv,
        )
        .unwrap();
        let fusion = preprocess_variants(&[json!({"key": "s1", "gene1": "EML4", "gene2": "ALK"})], VariantType::Sv).unwrap();

        let genes = check_variant_links(&mutation, &[], &copies, &fusion);
        assert_eq!(
            genes.into_iter().collect::<Vec<_>>(),
            vec!["ALK".to_string(), "EML4".to_string(), "KRAS".to_string()]
        );
    }

    #[test]
    fn test_trim_and_clean() {
        assert_eq!(
            trim_empty_values(json!({"gene": "", "gene1": "", "gene2": null, "key": "k", "note": null})),
            json!({"gene1": "", "gene2": null, "key": "k"})
        );

        let mut document = json!({
            "smallMutations": [{"key": "m1", "variant": "KRAS:p.G12D", "variantType": "mut", "gene": "KRAS"}],
            "kbMatches": [{"variant": "m1", "kbContextId": "#1:1", "kbRelevanceId": "#2:2", "category": "therapeutic"}],
        });
        clean_unsupported_content(&mut document);
        assert_eq!(
            document,
            json!({
                "smallMutations": [{"key": "m1", "gene": "KRAS"}],
                "kbMatches": [{"variant": "m1", "category": "therapeutic"}],
            })
        );
    }
}
