//! Germline / somatic reconciliation of matched statements.

use genomatch_common::{IprVariant, KbMatch};
use genomatch_kb::constants::is_germline_category;
use std::collections::HashMap;
use tracing::{error, info};

/// Keep germline-category matches only when the observed variant is germline.
///
/// A match whose variant key cannot be found is kept and logged. Matches in
/// any other category pass through untouched.
pub fn germline_kb_matches(matches: Vec<KbMatch>, variants: &[IprVariant]) -> Vec<KbMatch> {
    let mut by_key: HashMap<&str, Vec<&IprVariant>> = HashMap::new();
    for variant in variants {
        by_key.entry(variant.key.as_str()).or_default().push(variant);
    }

    let germline_matches = matches.iter().filter(|m| is_germline_category(&m.category)).count();
    if germline_matches == 0 {
        return matches;
    }
    info!(matches = germline_matches, "checking germline status of germline category matches");

    matches
        .into_iter()
        .filter(|m| {
            if !is_germline_category(&m.category) {
                return true;
            }
            match by_key.get(m.variant.as_str()) {
                Some(found) if found.iter().any(|v| v.is_germline()) => {
                    info!(statement = %m.kb_statement_id, kb_variant = %m.kb_variant, category = %m.category, "germline match");
                    true
                }
                Some(_) => {
                    info!(statement = %m.kb_statement_id, kb_variant = %m.kb_variant, category = %m.category, "dropping somatic match");
                    false
                }
                None => {
                    error!(
                        statement = %m.kb_statement_id,
                        kb_variant = %m.kb_variant,
                        variant = %m.variant,
                        "germline check failed: no observed variant with this key"
                    );
                    true
                }
            }
        })
        .collect()
}
