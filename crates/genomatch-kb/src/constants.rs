//! Fixed vocabularies and thresholds used when matching against GraphKB.

pub const DEFAULT_GRAPHKB_URL: &str = "https://graphkb-api.bcgsc.ca/api";

/// Page size for paginated `/query` calls.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Statement ids per `CONTAINSANY` request.
pub const STATEMENT_BATCH_SIZE: usize = 500;

pub const FAILED_REVIEW_STATUS: &str = "failed";

pub const PREFERRED_GENE_SOURCE: &str = "hgnc";
pub const ENTREZ_GENE_SOURCE: &str = "entrez gene";
pub const ONCOKB_SOURCE: &str = "oncokb";
pub const CANCER_GENE_LIST_SOURCE: &str = "cancer gene census";

pub const ONCOGENE: &str = "oncogenic";
pub const TUMOUR_SUPPRESSIVE: &str = "tumour suppressive";

/// Residues that only constrain sequence length when compared.
pub const AMBIGUOUS_AA: [&str; 3] = ["x", "?", "X"];

// ── Copy number / expression categories ─────────────────────────────────────

pub const AMPLIFICATION: &str = "amplification";
pub const COPY_GAIN: &str = "copy gain";
pub const COPY_LOSS: &str = "copy loss";
pub const DEEP_DELETION: &str = "deep deletion";
pub const LOW_LEVEL_COPY_GAIN: &str = "low level copy gain";
pub const SHALLOW_DELETION: &str = "shallow deletion";

pub const INPUT_COPY_CATEGORIES: [&str; 6] = [
    AMPLIFICATION,
    COPY_GAIN,
    COPY_LOSS,
    DEEP_DELETION,
    LOW_LEVEL_COPY_GAIN,
    SHALLOW_DELETION,
];

/// Copy changes that are matched and reported; everything else is dropped.
pub const REPORTED_COPY_CATEGORIES: [&str; 2] = [AMPLIFICATION, DEEP_DELETION];

pub const INPUT_EXPRESSION_CATEGORIES: [&str; 2] = ["increased expression", "reduced expression"];

/// Term trees for copy and expression variants stop below these roots.
pub const COPY_ROOT_TERM: &str = "structural variant";
pub const EXPRESSION_ROOT_TERM: &str = "biological";

// ── Signatures ──────────────────────────────────────────────────────────────

pub const MSI_CATEGORY: &str = "microsatellite instability";
pub const TMB_HIGH_CATEGORY: &str = "high mutation burden";
pub const TMB_HIGH_THRESHOLD: f64 = 10.0;

// ── Relevance categorisation ────────────────────────────────────────────────

/// (category, base relevance terms), tried in order.
pub const RELEVANCE_BASE_TERMS: [(&str, &[&str]); 6] = [
    ("therapeutic", &["therapeutic efficacy", "eligibility"]),
    ("diagnostic", &["diagnostic indicator"]),
    ("prognostic", &["prognostic indicator"]),
    (
        "pharmacogenomic",
        &["increased toxicity", "decreased toxicity", "increased dose", "decreased dose"],
    ),
    ("cancer predisposition", &["pathogenic", "likely pathogenic"]),
    ("biological", &["functional effect", "tumourigenesis", "predisposing"]),
];

/// Categories that only apply to germline observations.
pub const GERMLINE_BASE_TERMS: [&str; 2] = ["pharmacogenomic", "cancer predisposition"];

pub const RESISTANCE_CATEGORY: &str = "resistance";
pub const RESISTANCE_BASE_TERMS: [&str; 1] = ["no sensitivity"];

pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Variant types whose conditions never block a multi-variant statement.
pub const DEFAULT_EXCLUDED_VARIANT_TYPES: [&str; 1] = ["wildtype"];

/// Evidence levels counted as an approved therapy, by source name.
pub const APPROVED_EVIDENCE_LEVELS: [(&str, &[&str]); 5] = [
    ("oncokb", &["1", "r1"]),
    ("profyle", &["t1"]),
    (
        "cancer genome interpreter",
        &[
            "cpic guideline",
            "european leukemianet guidelines",
            "fda guidelines",
            "nccn guidelines",
            "nccn/cap guidelines",
        ],
    ),
    ("moa", &["fda-approved"]),
    ("civic", &["a"]),
];

pub fn is_germline_category(category: &str) -> bool {
    GERMLINE_BASE_TERMS.contains(&category)
}
