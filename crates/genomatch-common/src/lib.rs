//! genomatch-common. Shared errors, knowledge-base records and report rows used across all genomatch crates.

pub mod error;
pub mod kb_match;
pub mod records;
pub mod variants;

// Re-export commonly used types
pub use error::{GenomatchError, Result};
pub use kb_match::{
    GeneInfo, ImageDefinition, KbData, KbMatch, KeyAlteration, TherapeuticOption, TherapeuticOptionType,
    VariantCounts,
};
pub use records::{
    decode_record, decode_records, Condition, KbVariant, Link, Ontology, ParsedVariant, Position, RecordClass,
    Statement,
};
pub use variants::{IprVariant, VariantType};
