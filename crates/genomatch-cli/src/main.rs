//! genomatch: match a report's variants against GraphKB and upload the
//! annotated report to IPR.

mod config;

use anyhow::Context;
use clap::Parser;
use genomatch_kb::{GraphKbClient, KbSession};
use genomatch_report::{create_report, IprClient, ReportUploader};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "genomatch", version, about = "Annotate a genomic report with GraphKB matches")]
struct Args {
    /// Report content JSON (variant sections, kbDiseaseMatch, ...)
    #[arg(long)]
    content: PathBuf,

    /// Config file; defaults to GENOMATCH_CONFIG or ./genomatch.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    graphkb_url: Option<String>,

    #[arg(long)]
    ipr_url: Option<String>,

    /// Log filter used when RUST_LOG is unset, e.g. "genomatch=debug,info"
    #[arg(long)]
    log_level: Option<String>,

    /// Generate the therapeutic options table
    #[arg(long)]
    therapeutics: bool,

    #[arg(long)]
    skip_comments: bool,

    /// Where to write the upload JSON when the upload fails
    #[arg(long)]
    output_json_path: Option<PathBuf>,

    /// Write the upload JSON even when the upload succeeds
    #[arg(long)]
    always_write_output_json: bool,

    /// Build the report without uploading it
    #[arg(long)]
    no_upload: bool,
}

fn init_logging(level: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("genomatch=debug,info"))),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    info!("genomatch {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(username) = args.username {
        config.credentials.username = username;
    }
    if let Some(password) = args.password {
        config.credentials.password = Some(password);
    }
    if let Some(url) = args.graphkb_url {
        config.graphkb.url = url;
    }
    if let Some(url) = args.ipr_url {
        config.ipr.url = url;
    }
    if args.therapeutics {
        config.report.generate_therapeutics = true;
    }
    if args.skip_comments {
        config.report.generate_comments = false;
    }
    if args.output_json_path.is_some() {
        config.report.output_json_path = args.output_json_path;
    }
    if args.always_write_output_json {
        config.report.always_write_output_json = true;
    }
    let upload = config.ipr.upload && !args.no_upload;

    let username = config.credentials.username.clone();
    let password = SecretString::from(
        config
            .credentials
            .password
            .clone()
            .context("no password configured (set credentials.password or GENOMATCH_PASSWORD)")?,
    );
    if username.is_empty() {
        anyhow::bail!("no username configured (set credentials.username or GENOMATCH_USERNAME)");
    }

    let raw = std::fs::read_to_string(&args.content)
        .with_context(|| format!("reading {}", args.content.display()))?;
    let content: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.content.display()))?;

    let mut client = GraphKbClient::new(Some(&config.graphkb.url))?
        .with_page_size(config.graphkb.page_size)
        .with_max_retries(config.graphkb.max_retries);
    client.login(&username, &password).await?;
    let session = KbSession::new(Arc::new(client));

    let uploader = if upload {
        Some(IprClient::new(Some(&config.ipr.url), &username, password)?)
    } else {
        if config.report.output_json_path.is_none() {
            warn!("upload disabled and no output_json_path set; the report will not be kept");
        }
        None
    };

    let options = config.report.options(upload);
    let report = create_report(
        &session,
        uploader.as_ref().map(|u| u as &dyn ReportUploader),
        content,
        &options,
    )
    .await?;

    let matches = report["kbMatches"].as_array().map_or(0, Vec::len);
    info!(matches, "report complete");
    Ok(())
}
