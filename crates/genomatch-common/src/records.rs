//! Knowledge-base record types.
//!
//! Records arrive from the knowledge base as loosely shaped JSON documents
//! keyed by `@rid` / `@class`. They are decoded here into explicit types once,
//! at the boundary, so the matching core never indexes into raw maps.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{GenomatchError, Result};

// ── Record class ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordClass {
    PositionalVariant,
    CategoryVariant,
    CatalogueVariant,
    Disease,
    Feature,
    Signature,
    Therapy,
    Vocabulary,
    EvidenceLevel,
    Source,
    Statement,
    Other(String),
}

impl RecordClass {
    pub fn as_str(&self) -> &str {
        match self {
            RecordClass::PositionalVariant => "PositionalVariant",
            RecordClass::CategoryVariant => "CategoryVariant",
            RecordClass::CatalogueVariant => "CatalogueVariant",
            RecordClass::Disease => "Disease",
            RecordClass::Feature => "Feature",
            RecordClass::Signature => "Signature",
            RecordClass::Therapy => "Therapy",
            RecordClass::Vocabulary => "Vocabulary",
            RecordClass::EvidenceLevel => "EvidenceLevel",
            RecordClass::Source => "Source",
            RecordClass::Statement => "Statement",
            RecordClass::Other(name) => name,
        }
    }

    /// Classes that can appear as the variant conditions of a statement.
    pub fn is_variant(&self) -> bool {
        matches!(
            self,
            RecordClass::PositionalVariant | RecordClass::CategoryVariant | RecordClass::CatalogueVariant
        )
    }
}

impl Default for RecordClass {
    fn default() -> Self {
        RecordClass::Other(String::new())
    }
}

impl From<String> for RecordClass {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PositionalVariant" => RecordClass::PositionalVariant,
            "CategoryVariant" => RecordClass::CategoryVariant,
            "CatalogueVariant" => RecordClass::CatalogueVariant,
            "Disease" => RecordClass::Disease,
            "Feature" => RecordClass::Feature,
            "Signature" => RecordClass::Signature,
            "Therapy" => RecordClass::Therapy,
            "Vocabulary" => RecordClass::Vocabulary,
            "EvidenceLevel" => RecordClass::EvidenceLevel,
            "Source" => RecordClass::Source,
            "Statement" => RecordClass::Statement,
            _ => RecordClass::Other(value),
        }
    }
}

impl From<RecordClass> for String {
    fn from(value: RecordClass) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Links ───────────────────────────────────────────────────────────────────

/// A reference to another record: either its bare id or the embedded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Id(String),
    Record(Box<Ontology>),
}

impl Link {
    pub fn rid(&self) -> &str {
        match self {
            Link::Id(rid) => rid,
            Link::Record(record) => &record.rid,
        }
    }

    pub fn record(&self) -> Option<&Ontology> {
        match self {
            Link::Id(_) => None,
            Link::Record(record) => Some(record),
        }
    }
}

// ── Ontology terms ──────────────────────────────────────────────────────────

/// Any ontology-like record: features, diseases, therapies, vocabulary,
/// evidence levels, sources and signatures all share this shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ontology {
    #[serde(rename = "@rid")]
    pub rid: String,
    #[serde(rename = "@class", default)]
    pub class: RecordClass,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub source_id: Option<String>,
    pub source_id_version: Option<String>,
    pub source: Option<Link>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deprecated: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alias: bool,
    pub dependency: Option<Link>,
    pub biotype: Option<String>,
    pub description: Option<String>,
    pub sort: Option<i64>,
}

impl Ontology {
    /// Human readable label, falling back to the name then the id.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.rid)
    }

    pub fn is_gene(&self) -> bool {
        self.biotype.as_deref() == Some("gene")
    }
}

// ── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "@class")]
    pub class: Option<String>,
    pub pos: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbVariant {
    #[serde(rename = "@rid")]
    pub rid: String,
    #[serde(rename = "@class", default)]
    pub class: RecordClass,
    pub display_name: Option<String>,
    pub reference1: Option<Link>,
    pub reference2: Option<Link>,
    #[serde(rename = "type")]
    pub variant_type: Option<Link>,
    pub break1_start: Option<Position>,
    pub break1_end: Option<Position>,
    pub break2_start: Option<Position>,
    pub break2_end: Option<Position>,
    pub ref_seq: Option<String>,
    pub untemplated_seq: Option<String>,
    pub untemplated_seq_size: Option<i64>,
}

impl KbVariant {
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.rid)
    }
}

/// Result of the knowledge base notation parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedVariant {
    pub reference1: String,
    pub reference2: Option<String>,
    #[serde(rename = "type")]
    pub variant_type: String,
    pub break1_start: Position,
    pub break1_end: Option<Position>,
    pub break2_start: Option<Position>,
    pub break2_end: Option<Position>,
    pub ref_seq: Option<String>,
    pub untemplated_seq: Option<String>,
    pub untemplated_seq_size: Option<i64>,
}

// ── Statement conditions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Variant(KbVariant),
    Disease(Ontology),
    Other(Ontology),
}

impl Condition {
    pub fn rid(&self) -> &str {
        match self {
            Condition::Variant(v) => &v.rid,
            Condition::Disease(o) | Condition::Other(o) => &o.rid,
        }
    }

    pub fn class(&self) -> &RecordClass {
        match self {
            Condition::Variant(v) => &v.class,
            Condition::Disease(o) | Condition::Other(o) => &o.class,
        }
    }

    pub fn display(&self) -> &str {
        match self {
            Condition::Variant(v) => v.display(),
            Condition::Disease(o) | Condition::Other(o) => o.display(),
        }
    }

    pub fn as_variant(&self) -> Option<&KbVariant> {
        match self {
            Condition::Variant(v) => Some(v),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        let class = RecordClass::from(
            value.get("@class").and_then(Value::as_str).unwrap_or_default().to_string(),
        );
        if class.is_variant() {
            serde_json::from_value(value).map(Condition::Variant).map_err(D::Error::custom)
        } else if class == RecordClass::Disease {
            serde_json::from_value(value).map(Condition::Disease).map_err(D::Error::custom)
        } else {
            serde_json::from_value(value).map(Condition::Other).map_err(D::Error::custom)
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Condition::Variant(v) => v.serialize(serializer),
            Condition::Disease(o) | Condition::Other(o) => o.serialize(serializer),
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "@rid")]
    pub rid: String,
    pub relevance: Ontology,
    pub subject: Option<Ontology>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conditions: Vec<Condition>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence: Vec<Ontology>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evidence_level: Vec<Ontology>,
    pub source: Option<Link>,
    pub source_id: Option<String>,
    pub review_status: Option<String>,
    pub display_name_template: Option<String>,
}

impl Statement {
    pub fn variant_conditions(&self) -> impl Iterator<Item = &KbVariant> {
        self.conditions.iter().filter_map(Condition::as_variant)
    }

    pub fn disease_conditions(&self) -> impl Iterator<Item = &Ontology> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Disease(d) => Some(d),
            _ => None,
        })
    }

    pub fn has_condition(&self, rid: &str) -> bool {
        self.conditions.iter().any(|c| c.rid() == rid)
    }
}

// ── Boundary decoding ───────────────────────────────────────────────────────

/// Decode a single raw record, naming the offending record id on failure.
pub fn decode_record<T: DeserializeOwned>(record: Value) -> Result<T> {
    let rid = record
        .get("@rid")
        .and_then(Value::as_str)
        .unwrap_or("<no @rid>")
        .to_string();
    serde_json::from_value(record).map_err(|e| GenomatchError::InvalidRecord {
        rid,
        message: e.to_string(),
    })
}

pub fn decode_records<T: DeserializeOwned>(records: Vec<Value>) -> Result<Vec<T>> {
    records.into_iter().map(decode_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_is_tagged_by_class() {
        let conditions: Vec<Condition> = serde_json::from_value(json!([
            {"@rid": "#1:1", "@class": "PositionalVariant", "displayName": "KRAS:p.G12D", "reference1": "#5:1"},
            {"@rid": "#2:1", "@class": "Disease", "displayName": "colorectal cancer"},
            {"@rid": "#3:1", "@class": "Feature", "name": "kras", "biotype": "gene"},
        ]))
        .unwrap();

        assert!(matches!(conditions[0], Condition::Variant(_)));
        assert!(matches!(conditions[1], Condition::Disease(_)));
        assert!(matches!(conditions[2], Condition::Other(_)));
        assert_eq!(conditions[0].as_variant().unwrap().reference1.as_ref().unwrap().rid(), "#5:1");
    }

    #[test]
    fn test_statement_null_evidence_level_is_empty() {
        let statement: Statement = decode_record(json!({
            "@rid": "#100:1",
            "relevance": {"@rid": "#9:1", "displayName": "sensitivity"},
            "subject": null,
            "conditions": [],
            "evidence": [],
            "evidenceLevel": null,
        }))
        .unwrap();
        assert!(statement.evidence_level.is_empty());
        assert!(statement.subject.is_none());
    }

    #[test]
    fn test_missing_rid_is_invalid_record() {
        let err = decode_record::<Ontology>(json!({"@class": "Feature", "name": "kras"})).unwrap_err();
        assert!(matches!(err, GenomatchError::InvalidRecord { ref rid, .. } if rid == "<no @rid>"));
    }

    #[test]
    fn test_link_accepts_id_or_embedded_record() {
        let linked: Link = serde_json::from_value(json!("#12:3")).unwrap();
        assert_eq!(linked.rid(), "#12:3");
        let embedded: Link = serde_json::from_value(json!({"@rid": "#12:4", "name": "hgnc"})).unwrap();
        assert_eq!(embedded.rid(), "#12:4");
        assert_eq!(embedded.record().unwrap().name.as_deref(), Some("hgnc"));
    }

    #[test]
    fn test_display_fallbacks() {
        let named = Ontology { rid: "#1:1".into(), name: Some("kras".into()), ..Default::default() };
        assert_eq!(named.display(), "kras");
        let bare = Ontology { rid: "#1:2".into(), ..Default::default() };
        assert_eq!(bare.display(), "#1:2");
    }
}
