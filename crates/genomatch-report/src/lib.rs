//! Report assembly on top of the knowledge-base matcher: annotation of the
//! report content sections, match filtering, summary tables, analyst
//! comments and upload.

pub mod aggregate;
pub mod alterations;
pub mod annotate;
pub mod filters;
pub mod inputs;
pub mod reconcile;
pub mod report;
pub mod summary;
pub mod therapeutic;
pub mod upload;

pub use alterations::{AlterationConverter, ConversionContext, MatchOrigin};
pub use annotate::{AnnotationOutcome, Annotator};
pub use filters::{filter_kb_matches, multi_variant_filtering, FieldCondition, KbMatchFilter};
pub use report::{create_report, ReportOptions};
pub use upload::{IprClient, MockReportUploader, ReportUploader, DEFAULT_IPR_URL};
