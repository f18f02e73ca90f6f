//! Report summaries computed from the final match list: key alterations,
//! variant counts, structural variant selection and expression plots.

use genomatch_common::{
    GeneInfo, GenomatchError, ImageDefinition, IprVariant, KbMatch, KeyAlteration, Result, VariantCounts, VariantType,
};
use genomatch_kb::constants::{is_germline_category, UNKNOWN_CATEGORY};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{error, warn};

/// The observed variant a match was made for.
pub fn find_variant<'v>(variants: &'v [IprVariant], variant_type: VariantType, key: &str) -> Result<&'v IprVariant> {
    variants
        .iter()
        .find(|v| v.key == key && v.variant_type == variant_type)
        .ok_or_else(|| {
            GenomatchError::InvalidInput(format!("expected variant ({key}, {variant_type}) does not exist"))
        })
}

/// (gene label, variant label) as shown in the therapeutic options table.
pub fn create_variant_name_tuple(variant: &IprVariant) -> (String, String) {
    let mut gene = variant.gene().or(variant.gene1()).unwrap_or_default().to_string();
    match variant.variant_type {
        VariantType::Exp => return (gene, variant.expression_state.clone().unwrap_or_default()),
        VariantType::Cnv => return (gene, variant.cnv_state.clone().unwrap_or_default()),
        _ => {}
    }
    let variant_label = match variant.variant.split_once(':') {
        Some((_, rest)) => rest.to_string(),
        None => variant.variant.clone(),
    };
    if let Some(gene2) = variant.gene2() {
        gene = if gene.is_empty() { gene2.to_string() } else { format!("{gene}, {gene2}") };
    }
    (gene, variant_label)
}

fn key_alteration_label(m: &KbMatch, variant: &IprVariant) -> String {
    let gene = variant.gene().unwrap_or_default();
    match variant.variant_type {
        VariantType::Exp => format!("{} ({})", gene, variant.expression_state.as_deref().unwrap_or_default()),
        VariantType::Cnv => format!("{} ({})", gene, variant.cnv_state.as_deref().unwrap_or_default()),
        _ if is_germline_category(&m.category) && variant.is_germline() => format!("germline {}", variant.variant),
        _ => variant.variant.clone(),
    }
}

/// One key alteration per distinct label with its match count, plus the
/// number of matched variants per type.
///
/// Matches in the `unknown` category and signature matches are not summarised.
pub fn create_key_alterations(matches: &[KbMatch], variants: &[IprVariant]) -> (Vec<KeyAlteration>, VariantCounts) {
    let mut labels: BTreeMap<String, usize> = BTreeMap::new();
    let mut counted: BTreeMap<VariantType, BTreeSet<&str>> = BTreeMap::new();
    let mut skipped_types: BTreeSet<VariantType> = BTreeSet::new();

    for m in matches {
        if m.category == UNKNOWN_CATEGORY {
            continue;
        }
        if matches!(m.variant_type, VariantType::Msi | VariantType::Tmb) {
            if skipped_types.insert(m.variant_type) {
                warn!(variant_type = %m.variant_type, variant = %m.variant, "no summary key alterations for this variant type");
            }
            continue;
        }
        let variant = match find_variant(variants, m.variant_type, &m.variant) {
            Ok(variant) => variant,
            Err(err) => {
                error!(variant = %m.variant, "no variant match found: {}", err);
                continue;
            }
        };
        counted.entry(m.variant_type).or_default().insert(variant.key.as_str());
        *labels.entry(key_alteration_label(m, variant)).or_default() += 1;
    }

    let count_of = |t: VariantType| counted.get(&t).map_or(0, BTreeSet::len);
    let all_counted: HashSet<&str> = counted.values().flatten().copied().collect();
    let counts = VariantCounts {
        small_mutations: count_of(VariantType::Mut),
        cnvs: count_of(VariantType::Cnv),
        svs: count_of(VariantType::Sv),
        expression_outliers: count_of(VariantType::Exp),
        variants_unknown: variants.iter().filter(|v| !all_counted.contains(v.key.as_str())).count(),
    };
    let key_alterations = labels
        .into_iter()
        .map(|(gene_variant, count)| KeyAlteration { gene_variant, count })
        .collect();
    (key_alterations, counts)
}

/// Structural variants worth reporting: matched, involving a known fusion
/// partner, or called with high quality.
pub fn filter_structural_variants(
    structural_variants: Vec<IprVariant>,
    matches: &[KbMatch],
    genes: &[GeneInfo],
) -> Vec<IprVariant> {
    let matched: HashSet<&str> = matches
        .iter()
        .filter(|m| m.variant_type == VariantType::Sv)
        .map(|m| m.variant.as_str())
        .collect();
    let fusion_genes: HashSet<&str> = genes
        .iter()
        .filter(|g| g.known_fusion_partner)
        .map(|g| g.name.as_str())
        .collect();

    structural_variants
        .into_iter()
        .filter(|sv| {
            matched.contains(sv.key.as_str())
                || sv.gene1().is_some_and(|g| fusion_genes.contains(g))
                || sv.gene2().is_some_and(|g| fusion_genes.contains(g))
                || sv.high_quality.unwrap_or(false)
        })
        .collect()
}

/// Expression density images for genes of variants with a therapeutic match.
pub fn select_expression_plots(matches: &[KbMatch], variants: &[IprVariant]) -> Vec<ImageDefinition> {
    let selected: HashSet<(VariantType, &str)> = matches
        .iter()
        .filter(|m| m.category == "therapeutic")
        .map(|m| (m.variant_type, m.variant.as_str()))
        .collect();

    let mut selected_genes: BTreeSet<&str> = BTreeSet::new();
    let mut images_by_gene: BTreeMap<&str, ImageDefinition> = BTreeMap::new();
    for variant in variants {
        if selected.contains(&(variant.variant_type, variant.key.as_str())) {
            selected_genes.extend(variant.genes());
        }
        if let Some(path) = variant.histogram_image.as_deref().filter(|p| !p.is_empty()) {
            let gene = variant.gene().unwrap_or_default();
            images_by_gene.insert(
                gene,
                ImageDefinition { key: format!("expDensity.{gene}"), path: path.to_string() },
            );
        }
    }
    selected_genes
        .into_iter()
        .filter_map(|gene| images_by_gene.remove(gene))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use genomatch_common::KbData;
    use pretty_assertions::assert_eq;

    fn kb_match(key: &str, variant_type: VariantType, category: &str) -> KbMatch {
        KbMatch {
            variant: key.into(),
            variant_type,
            approved_therapy: false,
            category: category.into(),
            context: None,
            kb_context_id: None,
            disease: String::new(),
            evidence_level: String::new(),
            kb_statement_id: "#100:1".into(),
            kb_variant: "kb variant".into(),
            kb_variant_id: "#9:1".into(),
            matched_cancer: false,
            reference: String::new(),
            relevance: "sensitivity".into(),
            kb_relevance_id: "#147:1".into(),
            external_source: None,
            external_statement_id: None,
            review_status: None,
            kb_data: KbData::default(),
        }
    }

    fn small_mutation(key: &str, gene: &str, variant: &str) -> IprVariant {
        let mut row = IprVariant::new(key, VariantType::Mut);
        row.gene = Some(gene.into());
        row.variant = variant.into();
        row
    }

    fn copy_variant(key: &str, gene: &str, state: &str) -> IprVariant {
        let mut row = IprVariant::new(key, VariantType::Cnv);
        row.gene = Some(gene.into());
        row.cnv_state = Some(state.into());
        row
    }

    #[test]
    fn test_key_alterations_and_counts() {
        let mut germline = small_mutation("m2", "BRCA1", "BRCA1:p.E1660*");
        germline.germline = Some(true);
        let variants = vec![
            small_mutation("m1", "KRAS", "KRAS:p.G12D"),
            germline,
            copy_variant("c1", "ERBB2", "Amplification"),
            copy_variant("c2", "CDKN2A", "Deep Deletion"),
        ];
        let matches = vec![
            kb_match("m1", VariantType::Mut, "therapeutic"),
            kb_match("m1", VariantType::Mut, "diagnostic"),
            kb_match("m2", VariantType::Mut, "cancer predisposition"),
            kb_match("c1", VariantType::Cnv, "therapeutic"),
            kb_match("c2", VariantType::Cnv, UNKNOWN_CATEGORY),
            kb_match("missing", VariantType::Mut, "therapeutic"),
            kb_match("microsatellite instability", VariantType::Msi, "therapeutic"),
        ];

        let (alterations, counts) = create_key_alterations(&matches, &variants);
        assert_eq!(
            alterations,
            vec![
                KeyAlteration { gene_variant: "ERBB2 (Amplification)".into(), count: 1 },
                KeyAlteration { gene_variant: "KRAS:p.G12D".into(), count: 2 },
                KeyAlteration { gene_variant: "germline BRCA1:p.E1660*".into(), count: 1 },
            ]
        );
        assert_eq!(
            counts,
            VariantCounts { small_mutations: 2, cnvs: 1, svs: 0, expression_outliers: 0, variants_unknown: 1 }
        );
    }

    #[test]
    fn test_variant_name_tuple() {
        assert_eq!(
            create_variant_name_tuple(&small_mutation("m1", "KRAS", "KRAS:p.G12D")),
            ("KRAS".to_string(), "p.G12D".to_string())
        );
        assert_eq!(
            create_variant_name_tuple(&copy_variant("c1", "ERBB2", "Amplification")),
            ("ERBB2".to_string(), "Amplification".to_string())
        );
        let mut fusion = IprVariant::new("sv1", VariantType::Sv);
        fusion.gene1 = Some("EML4".into());
        fusion.gene2 = Some("ALK".into());
        fusion.variant = "(EML4,ALK):fusion(e.13,e.20)".into();
        assert_eq!(
            create_variant_name_tuple(&fusion),
            ("EML4, ALK".to_string(), "fusion(e.13,e.20)".to_string())
        );
    }

    #[test]
    fn test_filter_structural_variants() {
        let sv = |key: &str, gene1: &str, gene2: &str, high_quality: bool| {
            let mut row = IprVariant::new(key, VariantType::Sv);
            row.gene1 = Some(gene1.into());
            row.gene2 = Some(gene2.into());
            row.high_quality = Some(high_quality);
            row
        };
        let genes = vec![GeneInfo { name: "ALK".into(), known_fusion_partner: true, ..Default::default() }];
        let kept = filter_structural_variants(
            vec![sv("sv1", "A", "B", false), sv("sv2", "EML4", "ALK", false), sv("sv3", "C", "D", true), sv("sv4", "E", "F", false)],
            &[kb_match("sv1", VariantType::Sv, "therapeutic")],
            &genes,
        );
        let keys: Vec<&str> = kept.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["sv1", "sv2", "sv3"]);
    }

    #[test]
    fn test_expression_plots_only_for_therapeutic_genes() {
        let mut exp = IprVariant::new("e1", VariantType::Exp);
        exp.gene = Some("ERBB2".into());
        exp.histogram_image = Some("/images/erbb2.png".into());
        let mut other = IprVariant::new("e2", VariantType::Exp);
        other.gene = Some("TP53".into());
        other.histogram_image = Some("/images/tp53.png".into());

        let images = select_expression_plots(
            &[kb_match("e1", VariantType::Exp, "therapeutic"), kb_match("e2", VariantType::Exp, "biological")],
            &[exp, other],
        );
        assert_eq!(
            images,
            vec![ImageDefinition { key: "expDensity.ERBB2".into(), path: "/images/erbb2.png".into() }]
        );
    }
}
