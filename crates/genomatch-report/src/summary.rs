//! Automatically generated analyst comments.
//!
//! Statements sharing a sentence template are merged into one sentence, then
//! sentences are sectioned by gene and ordered diagnostic → biological →
//! therapeutic/prognostic → other → resistance.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genomatch_common::{
    decode_record, decode_records, Condition, GenomatchError, IprVariant, KbMatch, Ontology, RecordClass, Result,
    Statement,
};
use genomatch_kb::constants::{ENTREZ_GENE_SOURCE, RELEVANCE_BASE_TERMS, RESISTANCE_BASE_TERMS, RESISTANCE_CATEGORY};
use genomatch_kb::features::{ontology_preference_key, preferred_drug_representation, preferred_gene_name};
use genomatch_kb::statement::disease_closure;
use genomatch_kb::{KbSession, RelevanceCategorizer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::inputs::create_graphkb_sv_notation;

pub const OTHER_DISEASES: &str = "other disease types";
pub const ENTREZ_GENE_URL: &str = "https://www.ncbi.nlm.nih.gov/gene";
pub const GRAPHKB_GUI: &str = "https://graphkb.bcgsc.ca";

/// Used when a statement carries no template of its own.
const DEFAULT_TEMPLATE: &str =
    "{conditions:variant} is associated with {relevance} to {subject} in {conditions:disease} ({evidence})";

const COMMENTS_HEADER: &str = "<h3>The comments below were automatically generated from matches to GraphKB and have not been manually reviewed</h3>";

// ── Text helpers ────────────────────────────────────────────────────────────

/// `a`, `a, and b`, `a, b, and c`.
pub fn natural_join(words: &[String]) -> String {
    match words {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// The fields of a record the sentence templates need.
#[derive(Debug, Clone, Copy)]
struct Term<'a> {
    rid: &'a str,
    class: &'a RecordClass,
    display: &'a str,
}

impl<'a> From<&'a Condition> for Term<'a> {
    fn from(condition: &'a Condition) -> Self {
        Term { rid: condition.rid(), class: condition.class(), display: condition.display() }
    }
}

impl<'a> From<&'a Ontology> for Term<'a> {
    fn from(record: &'a Ontology) -> Self {
        Term { rid: &record.rid, class: &record.class, display: record.display() }
    }
}

fn natural_join_records(terms: &[Term<'_>]) -> String {
    let words: BTreeSet<&str> = terms.iter().map(|t| t.display).collect();
    let words: Vec<String> = words.into_iter().map(str::to_string).collect();
    natural_join(&words)
}

/// Link to one record, or a table of several, in the GraphKB web client.
pub fn create_graphkb_link(record_ids: &[String], record_class: &str) -> String {
    let ids: BTreeSet<&str> = record_ids.iter().map(String::as_str).collect();
    if ids.len() == 1 {
        let id = ids.iter().next().map(|id| id.replace('#', "")).unwrap_or_default();
        return format!("{GRAPHKB_GUI}/view/{record_class}/{id}");
    }
    let targets: Vec<String> = ids.iter().map(|id| json!(id).to_string()).collect();
    let complex = STANDARD.encode(format!("{{\"target\": [{}]}}", targets.join(", ")));
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("complex", &complex)
        .append_pair("@class", record_class)
        .finish();
    format!("{GRAPHKB_GUI}/data/table?{query}")
}

fn merge_diseases(diseases: &[Term<'_>], disease_matches: &HashSet<String>) -> String {
    let unmatched: HashSet<&str> = diseases
        .iter()
        .map(|d| d.rid)
        .filter(|rid| !disease_matches.contains(*rid))
        .collect();
    if unmatched.len() >= 2 && diseases.iter().all(|d| *d.class == RecordClass::Disease) {
        let matched: BTreeSet<&str> = diseases
            .iter()
            .filter(|d| disease_matches.contains(d.rid))
            .map(|d| d.display)
            .collect();
        let mut words: Vec<String> = matched.into_iter().map(str::to_string).collect();
        words.push(OTHER_DISEASES.to_string());
        natural_join(&words)
    } else {
        natural_join_records(diseases)
    }
}

/// Fill a sentence template from the (possibly merged) parts of one or more statements.
fn substitute_sentence_template(
    template: &str,
    conditions: &[Term<'_>],
    subjects: &[Term<'_>],
    relevance: &Ontology,
    evidence: &[Ontology],
    statement_rids: &[String],
    disease_matches: &HashSet<String>,
) -> String {
    let is_variant = |t: &&Term<'_>| t.class.is_variant();
    let is_disease = |t: &&Term<'_>| *t.class == RecordClass::Disease;

    let subject_ids: HashSet<&str> = if template.contains("{subject}") {
        subjects.iter().map(|s| s.rid).collect()
    } else {
        HashSet::new()
    };
    let keep = |t: &&Term<'_>| !subject_ids.contains(t.rid);

    let disease_conditions: Vec<Term<'_>> = conditions.iter().filter(is_disease).filter(keep).copied().collect();
    let variant_conditions: Vec<Term<'_>> = conditions.iter().filter(is_variant).filter(keep).copied().collect();
    let mut other_conditions: Vec<Term<'_>> = conditions
        .iter()
        .filter(|t| !is_variant(t) && !is_disease(t))
        .filter(keep)
        .copied()
        .collect();

    let mut result = template.replace("{relevance}", relevance.display());
    if template.contains("{subject}") {
        result = result.replace("{subject}", &merge_diseases(subjects, disease_matches));
    }
    if template.contains("{conditions:disease}") {
        result = result.replace("{conditions:disease}", &merge_diseases(&disease_conditions, disease_matches));
    } else {
        other_conditions.extend(disease_conditions);
    }
    if template.contains("{conditions:variant}") {
        result = result.replace("{conditions:variant}", &natural_join_records(&variant_conditions));
    } else {
        other_conditions.extend(variant_conditions);
    }
    result = result.replace("{conditions}", &natural_join_records(&other_conditions));

    if template.contains("{evidence}") {
        let names: BTreeSet<&str> = evidence.iter().map(Ontology::display).collect();
        let mut evidence_text = names.into_iter().collect::<Vec<_>>().join(", ");
        if !statement_rids.is_empty() {
            let link = create_graphkb_link(statement_rids, "Statement");
            evidence_text = format!(r#"<a href="{link}" target="_blank" rel="noopener">{evidence_text}</a>"#);
        }
        result = result.replace("{evidence}", &evidence_text);
    }
    result
}

/// One sentence per group of statements differing only in disease and evidence,
/// keyed by statement id. Therapy subjects are swapped for their preferred name.
async fn aggregate_statements(
    session: &KbSession,
    statements: Vec<Statement>,
    disease_matches: &HashSet<String>,
) -> Result<HashMap<String, String>> {
    let mut groups: BTreeMap<Vec<String>, Vec<Statement>> = BTreeMap::new();

    for mut statement in statements {
        let subject_rid = statement.subject.as_ref().map(|s| s.rid.clone());
        let mut key: BTreeSet<String> = statement
            .conditions
            .iter()
            .filter(|c| *c.class() != RecordClass::Disease && Some(c.rid()) != subject_rid.as_deref())
            .map(|c| c.display().to_string())
            .collect();
        match statement.subject.as_ref().map(|s| (s.class.clone(), s.rid.clone())) {
            None | Some((RecordClass::Disease, _)) => {}
            Some((class, rid)) => {
                if class == RecordClass::Therapy {
                    statement.subject = Some(preferred_drug_representation(session, &rid).await?);
                }
                key.extend(statement.subject.as_ref().map(|s| s.display().to_string()));
            }
        }
        key.insert(statement.relevance.display().to_string());
        key.insert(statement.display_name_template.clone().unwrap_or_default());
        groups.entry(key.into_iter().collect()).or_default().push(statement);
    }

    let mut sentences = HashMap::new();
    for group in groups.into_values() {
        let first = &group[0];
        let template = first.display_name_template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let conditions: Vec<Term<'_>> = group.iter().flat_map(|s| s.conditions.iter().map(Term::from)).collect();
        let subjects: Vec<Term<'_>> = group.iter().filter_map(|s| s.subject.as_ref().map(Term::from)).collect();
        let evidence: Vec<Ontology> = group.iter().flat_map(|s| s.evidence.iter().cloned()).collect();
        let rids: Vec<String> = group.iter().map(|s| s.rid.clone()).collect();

        let sentence = substitute_sentence_template(
            template,
            &conditions,
            &subjects,
            &first.relevance,
            &evidence,
            &rids,
            disease_matches,
        );
        for rid in rids {
            sentences.insert(rid, sentence.clone());
        }
    }
    Ok(sentences)
}

// ── Variant display ─────────────────────────────────────────────────────────

/// Short, human readable description of an observed variant.
pub fn display_variant(variant: &IprVariant) -> Result<String> {
    let gene = match (variant.gene(), variant.gene1(), variant.gene2()) {
        (Some(gene), _, _) => gene.to_string(),
        (None, Some(gene1), Some(gene2)) => format!("({gene1},{gene2})"),
        _ => String::new(),
    };
    if let Some(category) = variant.kb_category() {
        return Ok(format!("{category} of {gene}"));
    }
    if variant.has_exons() {
        return create_graphkb_sv_notation(variant);
    }
    let hgvs = [&variant.protein_change, &variant.hgvs_protein, &variant.hgvs_cds, &variant.hgvs_genomic]
        .into_iter()
        .find_map(|h| h.as_deref().filter(|h| !h.is_empty()));
    match hgvs {
        Some(hgvs) if !gene.is_empty() => Ok(format!("{gene}:{hgvs}")),
        _ if !variant.variant.is_empty() => Ok(variant.variant.clone()),
        _ => Err(GenomatchError::InvalidInput(format!(
            "unable to form a display variant of {}",
            variant.key
        ))),
    }
}

/// The sentence introducing the observed variants of a gene section.
pub fn display_variants(gene_name: &str, variants: &[&IprVariant]) -> String {
    let mut shown: BTreeSet<String> = BTreeSet::new();
    for variant in variants {
        match display_variant(variant) {
            Ok(text) if text.contains(gene_name) => {
                shown.insert(text);
            }
            Ok(_) => {}
            Err(err) => warn!("{}", err),
        }
    }
    let shown: Vec<String> = shown.into_iter().collect();
    let text = natural_join(&shown);
    match shown.len() {
        0 => String::new(),
        1 => {
            let mut chars = text.chars();
            let first: String = chars.next().map(|c| c.to_uppercase().collect()).unwrap_or_default();
            format!("{first}{} was observed in this case.", chars.as_str())
        }
        _ => format!("Multiple variants of the gene {gene_name} were observed in this case: {text}"),
    }
}

// ── Sections ────────────────────────────────────────────────────────────────

async fn entrez_description(session: &KbSession, gene_name: &str) -> Result<Option<(String, String)>> {
    let body = json!({
        "target": "Feature",
        "filters": {
            "AND": [
                { "source": { "target": "Source", "filters": { "name": ENTREZ_GENE_SOURCE } } },
                { "name": gene_name },
                { "biotype": "gene" },
            ]
        },
    });
    let mut genes: Vec<Ontology> = decode_records(session.cached_query(&body).await?)?;
    genes.sort_by_key(|g| ontology_preference_key(g, &HashMap::new()));
    Ok(genes.into_iter().next().and_then(|gene| {
        let description = gene.description.filter(|d| !d.is_empty())?;
        let short: Vec<&str> = description.split(". ").take(2).collect();
        Some((short.join(". "), gene.source_id.unwrap_or_default()))
    }))
}

/// HTML of one gene section; empty when no observed variant of the gene is involved.
async fn create_section_html(
    session: &KbSession,
    categorizer: &RelevanceCategorizer,
    gene_name: &str,
    sentences_by_statement: &BTreeMap<&str, &str>,
    statements: &HashMap<String, Statement>,
    variants: &[&IprVariant],
) -> Result<String> {
    let variants_text = display_variants(gene_name, variants);
    if variants_text.is_empty() {
        debug!(gene = gene_name, "no observed variant linked to this gene section");
        return Ok(String::new());
    }

    let mut output = vec![format!("<h2>{gene_name}</h2>")];
    if let Some((description, source_id)) = entrez_description(session, gene_name).await? {
        output.push(format!(
            "\n<blockquote class=\"entrez_description\" cite=\"{ENTREZ_GENE_URL}/{source_id}\">\n    {description}.\n</blockquote>\n<p>\n    {variants_text}\n</p>\n"
        ));
    }

    let mut sentence_categories: BTreeMap<&str, &str> = BTreeMap::new();
    for (rid, sentence) in sentences_by_statement {
        let category = statements
            .get(*rid)
            .and_then(|s| categorizer.categorize(&s.relevance.rid))
            .unwrap_or("");
        sentence_categories.insert(*sentence, category);
    }

    let in_section = |wanted: &dyn Fn(&str) -> bool| -> BTreeSet<&str> {
        sentence_categories
            .iter()
            .filter(|(_, category)| wanted(category))
            .map(|(sentence, _)| *sentence)
            .collect()
    };
    let ordered = [
        in_section(&|c| c == "diagnostic"),
        in_section(&|c| c == "biological"),
        in_section(&|c| c == "therapeutic" || c == "prognostic"),
        in_section(&|c| !["diagnostic", "biological", "therapeutic", "prognostic", RESISTANCE_CATEGORY].contains(&c)),
        in_section(&|c| c == RESISTANCE_CATEGORY),
    ];

    let mut used: HashSet<&str> = HashSet::new();
    for section in ordered {
        let content: Vec<&str> = section.iter().copied().filter(|s| !used.contains(s)).collect();
        output.push(format!("<p>{}</p>", content.join(". ")));
        used.extend(section);
    }
    Ok(output.join("\n"))
}

/// Statement ids by the preferred name of each gene they reference.
async fn section_statements_by_genes(
    session: &KbSession,
    statements: &HashMap<String, Statement>,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut genes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut ordered: Vec<&Statement> = statements.values().collect();
    ordered.sort_by(|a, b| a.rid.cmp(&b.rid));

    for statement in ordered {
        for condition in &statement.conditions {
            let references: Vec<&str> = match condition {
                Condition::Variant(variant) => [&variant.reference1, &variant.reference2]
                    .into_iter()
                    .flatten()
                    .map(|r| r.rid())
                    .collect(),
                Condition::Disease(record) | Condition::Other(record) if record.is_gene() => vec![record.rid.as_str()],
                _ => Vec::new(),
            };
            for reference in references {
                let gene = preferred_gene_name(session, reference).await?;
                if gene.is_empty() {
                    continue;
                }
                genes.entry(gene).or_default().insert(statement.rid.clone());
            }
        }
    }
    Ok(genes)
}

/// Narrative HTML comments for the matched statements of a report.
pub async fn auto_analyst_comments(
    session: &KbSession,
    matches: &[KbMatch],
    disease_name: &str,
    variants: &[IprVariant],
) -> Result<String> {
    let variants_by_key: HashMap<&str, &IprVariant> = variants.iter().map(|v| (v.key.as_str(), v)).collect();
    let mut keys_by_statement: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for m in matches {
        keys_by_statement.entry(m.kb_statement_id.as_str()).or_default().insert(m.variant.as_str());
    }

    let disease_matches = disease_closure(session, disease_name).await?;
    let mut bases: Vec<(&str, &[&str])> = RELEVANCE_BASE_TERMS.to_vec();
    bases.push((RESISTANCE_CATEGORY, &RESISTANCE_BASE_TERMS[..]));
    let categorizer = RelevanceCategorizer::load(session, &bases).await?;

    let mut statements: HashMap<String, Statement> = HashMap::new();
    let mut by_template: BTreeMap<String, Vec<Statement>> = BTreeMap::new();
    for rid in keys_by_statement.keys() {
        let response = session
            .request(&format!("/statements/{}?neighbors=1", rid.replace('#', "")), None)
            .await?;
        let statement: Statement = decode_record(response.get("result").cloned().unwrap_or(Value::Null))?;
        by_template
            .entry(statement.display_name_template.clone().unwrap_or_default())
            .or_default()
            .push(statement.clone());
        statements.insert(statement.rid.clone(), statement);
    }

    let mut sentences: HashMap<String, String> = HashMap::new();
    for group in by_template.into_values() {
        sentences.extend(aggregate_statements(session, group, &disease_matches).await?);
    }

    let mut sections: Vec<(String, BTreeSet<String>)> =
        section_statements_by_genes(session, &statements).await?.into_iter().collect();
    sections.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut output = vec![COMMENTS_HEADER.to_string()];
    for (gene, statement_rids) in sections {
        let mut section_variants: BTreeMap<&str, &IprVariant> = BTreeMap::new();
        for rid in &statement_rids {
            for key in keys_by_statement.get(rid.as_str()).into_iter().flatten() {
                match variants_by_key.get(key) {
                    Some(variant) => {
                        section_variants.insert(*key, *variant);
                    }
                    None => warn!(statement = %rid, variant = %key, "no specific variant matched"),
                }
            }
        }
        let section_sentences: BTreeMap<&str, &str> = statement_rids
            .iter()
            .filter_map(|rid| sentences.get(rid).map(|s| (rid.as_str(), s.as_str())))
            .collect();
        let section_variants: Vec<&IprVariant> = section_variants.into_values().collect();
        output.push(
            create_section_html(session, &categorizer, &gene, &section_sentences, &statements, &section_variants)
                .await?,
        );
    }
    info!(statements = statements.len(), "generated analyst comments");
    Ok(output.join("\n"))
}
