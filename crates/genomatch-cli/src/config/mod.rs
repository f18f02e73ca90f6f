//! Configuration loading for genomatch.
//! Reads genomatch.toml from the current directory or the path in GENOMATCH_CONFIG.
//! Credentials may also come from GENOMATCH_USERNAME / GENOMATCH_PASSWORD.

use genomatch_kb::constants::{DEFAULT_EXCLUDED_VARIANT_TYPES, DEFAULT_GRAPHKB_URL, DEFAULT_QUERY_LIMIT};
use genomatch_report::{KbMatchFilter, ReportOptions, DEFAULT_IPR_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "genomatch.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub graphkb: GraphKbConfig,
    #[serde(default)]
    pub ipr: IprConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Shared by GraphKB and IPR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphKbConfig {
    #[serde(default = "default_graphkb_url")]
    pub url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_graphkb_url() -> String { DEFAULT_GRAPHKB_URL.to_string() }
fn default_page_size()   -> usize  { DEFAULT_QUERY_LIMIT }
fn default_max_retries() -> u32    { 3 }

impl Default for GraphKbConfig {
    fn default() -> Self {
        Self {
            url: default_graphkb_url(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IprConfig {
    #[serde(default = "default_ipr_url")]
    pub url: String,
    #[serde(default = "bool_true")]
    pub upload: bool,
}

fn default_ipr_url() -> String { DEFAULT_IPR_URL.to_string() }
fn bool_true()       -> bool   { true }

impl Default for IprConfig {
    fn default() -> Self {
        Self { url: default_ipr_url(), upload: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub generate_therapeutics: bool,
    #[serde(default = "bool_true")]
    pub generate_comments: bool,
    #[serde(default = "bool_true")]
    pub match_germline: bool,
    #[serde(default = "bool_true")]
    pub multi_variant_filter: bool,
    #[serde(default = "default_excluded_variant_types")]
    pub excluded_variant_types: Vec<String>,
    pub output_json_path: Option<PathBuf>,
    #[serde(default)]
    pub always_write_output_json: bool,
    #[serde(default)]
    pub kb_match_filters: Vec<KbMatchFilter>,
}

fn default_excluded_variant_types() -> Vec<String> {
    DEFAULT_EXCLUDED_VARIANT_TYPES.iter().map(|t| t.to_string()).collect()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            generate_therapeutics: false,
            generate_comments: true,
            match_germline: true,
            multi_variant_filter: true,
            excluded_variant_types: default_excluded_variant_types(),
            output_json_path: None,
            always_write_output_json: false,
            kb_match_filters: Vec::new(),
        }
    }
}

mod tests;

impl Config {
    /// Load configuration from `path`, else GENOMATCH_CONFIG, else genomatch.toml.
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("GENOMATCH_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Config file not found: {}\n\
                         Copy genomatch.example.toml to genomatch.toml and edit it.",
                        path.display()
                    );
                }
                Self::from_file(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(username) = std::env::var("GENOMATCH_USERNAME") {
            self.credentials.username = username;
        }
        if let Ok(password) = std::env::var("GENOMATCH_PASSWORD") {
            self.credentials.password = Some(password);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for filter in &self.report.kb_match_filters {
            filter.validate()?;
        }
        Ok(())
    }
}

impl ReportConfig {
    pub fn options(&self, upload: bool) -> ReportOptions {
        ReportOptions {
            generate_therapeutics: self.generate_therapeutics,
            generate_comments: self.generate_comments,
            match_germline: self.match_germline,
            multi_variant_filter: self.multi_variant_filter,
            excluded_variant_types: self.excluded_variant_types.clone(),
            kb_match_filters: self.kb_match_filters.clone(),
            upload,
            output_json_path: self.output_json_path.clone(),
            always_write_output_json: self.always_write_output_json,
        }
    }
}
