//! Observed (input) variant rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    /// Small mutation (SNV / indel).
    Mut,
    /// Copy number variant.
    Cnv,
    /// Expression outlier.
    Exp,
    /// Structural variant / fusion.
    Sv,
    /// Microsatellite instability signature.
    Msi,
    /// Tumour mutation burden signature.
    Tmb,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Mut => "mut",
            VariantType::Cnv => "cnv",
            VariantType::Exp => "exp",
            VariantType::Sv => "sv",
            VariantType::Msi => "msi",
            VariantType::Tmb => "tmb",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed variant row of the report content.
///
/// Fields the pipeline reads are typed; everything else rides along in
/// `extra` and is written back to the output document untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IprVariant {
    pub key: String,
    pub variant_type: VariantType,
    #[serde(default)]
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub germline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnv_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgvs_protein: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgvs_cds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgvs_genomic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exon1: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exon2: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_quality: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram_image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl IprVariant {
    /// Minimal row, mostly useful for building fixtures and synthetic signature rows.
    pub fn new(key: impl Into<String>, variant_type: VariantType) -> Self {
        Self {
            key: key.into(),
            variant_type,
            variant: String::new(),
            gene: None,
            gene1: None,
            gene2: None,
            germline: None,
            kb_category: None,
            expression_state: None,
            cnv_state: None,
            protein_change: None,
            hgvs_protein: None,
            hgvs_cds: None,
            hgvs_genomic: None,
            exon1: None,
            exon2: None,
            high_quality: None,
            histogram_image: None,
            extra: Map::new(),
        }
    }

    pub fn gene(&self) -> Option<&str> {
        non_empty(&self.gene)
    }

    pub fn gene1(&self) -> Option<&str> {
        non_empty(&self.gene1)
    }

    pub fn gene2(&self) -> Option<&str> {
        non_empty(&self.gene2)
    }

    pub fn kb_category(&self) -> Option<&str> {
        non_empty(&self.kb_category)
    }

    /// Every gene this row refers to.
    pub fn genes(&self) -> Vec<&str> {
        [self.gene(), self.gene1(), self.gene2()].into_iter().flatten().collect()
    }

    pub fn is_germline(&self) -> bool {
        self.germline.unwrap_or(false)
    }

    /// The notations a positional row can be matched by, in preference order, without repeats.
    pub fn positional_representations(&self) -> Vec<&str> {
        let mut result: Vec<&str> = Vec::new();
        let candidates = [
            Some(self.variant.as_str()).filter(|s| !s.is_empty()),
            non_empty(&self.hgvs_protein),
            non_empty(&self.hgvs_cds),
            non_empty(&self.hgvs_genomic),
        ];
        for candidate in candidates.into_iter().flatten() {
            if !result.contains(&candidate) {
                result.push(candidate);
            }
        }
        result
    }

    /// Exon number as written in fusion notation ("?" when unknown).
    pub fn exon_label(exon: &Option<Value>) -> String {
        let label = match exon {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| n.to_string()),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let label = label.strip_suffix(".0").map(str::to_string).unwrap_or(label);
        if label.is_empty() {
            "?".to_string()
        } else {
            label
        }
    }

    pub fn has_exons(&self) -> bool {
        [&self.exon1, &self.exon2]
            .into_iter()
            .any(|e| !matches!(e, None | Some(Value::Null)) && Self::exon_label(e) != "?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_fields_round_trip() {
        let row: IprVariant = serde_json::from_value(json!({
            "key": "k1",
            "variantType": "mut",
            "gene": "KRAS",
            "variant": "KRAS:p.G12D",
            "tumourAltCount": 37,
            "zygosity": "het",
        }))
        .unwrap();
        assert_eq!(row.extra.get("tumourAltCount"), Some(&json!(37)));

        let back = serde_json::to_value(&row).unwrap();
        assert_eq!(back["zygosity"], json!("het"));
        assert_eq!(back["variantType"], json!("mut"));
        assert!(back.get("gene1").is_none());
    }

    #[test]
    fn test_positional_representations_skip_blank_and_repeats() {
        let mut row = IprVariant::new("k1", VariantType::Mut);
        row.variant = "KRAS:p.G12D".into();
        row.hgvs_protein = Some("KRAS:p.G12D".into());
        row.hgvs_cds = Some("".into());
        row.hgvs_genomic = Some("chr12:g.25245350C>T".into());
        assert_eq!(row.positional_representations(), vec!["KRAS:p.G12D", "chr12:g.25245350C>T"]);
    }

    #[test]
    fn test_exon_label() {
        assert_eq!(IprVariant::exon_label(&Some(json!(2))), "2");
        assert_eq!(IprVariant::exon_label(&Some(json!("14.0"))), "14");
        assert_eq!(IprVariant::exon_label(&Some(json!(""))), "?");
        assert_eq!(IprVariant::exon_label(&None), "?");
    }

    #[test]
    fn test_genes_ignore_empty_strings() {
        let mut row = IprVariant::new("sv1", VariantType::Sv);
        row.gene1 = Some("EML4".into());
        row.gene2 = Some("".into());
        assert_eq!(row.genes(), vec!["EML4"]);
    }
}
