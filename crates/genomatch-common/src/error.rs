use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenomatchError {
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Malformed variant notation ({notation}): {message}")]
    MalformedNotation { notation: String, message: String },

    #[error("Unknown term: {0}")]
    TermNotFound(String),

    #[error("Failed to match disease ({0}) to the knowledge base")]
    DiseaseNotFound(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid knowledge-base record {rid}: {message}")]
    InvalidRecord { rid: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Report upload failed: {0}")]
    Upload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenomatchError {
    /// Errors that only invalidate the variant row being annotated.
    ///
    /// Everything else (missing disease, bad configuration, IO) aborts the run.
    pub fn is_row_recoverable(&self) -> bool {
        matches!(
            self,
            GenomatchError::FeatureNotFound(_)
                | GenomatchError::MalformedNotation { .. }
                | GenomatchError::TermNotFound(_)
                | GenomatchError::Http(_)
                | GenomatchError::Api { .. }
                | GenomatchError::InvalidRecord { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GenomatchError>;
