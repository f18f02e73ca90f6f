//! genomatch-kb. GraphKB access: client, run-scoped session, variant matching and statement resolution.

pub mod client;
pub mod constants;
pub mod features;
pub mod genes;
pub mod matching;
pub mod mock;
pub mod session;
pub mod statement;
pub mod vocab;

// Re-export commonly used types
pub use client::{GraphKbClient, KnowledgeBase};
pub use matching::VariantMatcher;
pub use mock::MockKnowledgeBase;
pub use session::KbSession;
pub use statement::{RelevanceCategorizer, ResolvedStatements, StatementResolver};
