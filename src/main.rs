//! EdInsight - LLM-powered EDINET filing analyzer
//!
//! A CLI tool that searches, downloads and analyzes regulatory
//! filings, producing a multi-aspect analytical report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, no usable content, etc.)
//!   2 - Report produced, but some pipeline nodes failed

mod cache;
mod cli;
mod config;
mod extract;
mod llm;
mod models;
mod pipeline;
mod registry;
mod report;

use anyhow::{bail, Context, Result};
use cache::{build_download_path, CacheIndex};
use chrono::Utc;
use cli::{Args, CacheCommand, Command, OutputFormat};
use config::Config;
use extract::{ExtractStrategy, ExtractionCascade};
use indicatif::{ProgressBar, ProgressStyle};
use llm::{create_provider, ProviderOptions};
use models::{CompositeReport, DownloadKind, Filing};
use pipeline::{AnalysisPipeline, Collaborators};
use registry::client::RegistryOptions;
use registry::{search_filings, EdinetClient, FilingFilter, SearchOrder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("EdInsight v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .edinsight.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".edinsight.toml");

    if path.exists() {
        eprintln!("⚠️  .edinsight.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .edinsight.toml")?;

    println!("✅ Created .edinsight.toml with default settings.");
    println!("   Edit it to set your registry API key, model, and cache directory.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .edinsight.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Dispatch the parsed command. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let quiet = args.quiet;
    match args.command {
        Command::Analyze {
            doc_id,
            prior_doc_id,
            strategy,
            format,
            output,
        } => run_analyze(&config, &doc_id, prior_doc_id.as_deref(), strategy, format, output).await,
        Command::Search {
            edinet_code,
            sec_code,
            company,
            type_codes,
            from,
            to,
            order,
            limit,
            json,
        } => {
            let filter = build_filter(edinet_code, sec_code, company, type_codes, from, to, order, limit);
            run_search(&config, filter, json, quiet).await
        }
        Command::Download { doc_id, kind, date } => {
            run_download(&config, &doc_id, kind, date).await
        }
        Command::Cache { command } => run_cache(&config, command),
        Command::InitConfig => unreachable!("handled before logging setup"),
    }
}

fn registry_options(config: &Config) -> Result<RegistryOptions> {
    if config.registry.api_key.trim().is_empty() {
        bail!(
            "registry API key is not set. Provide it via --api-key, \
             EDINSIGHT_API_KEY, or the [registry] section of .edinsight.toml"
        );
    }
    Ok(RegistryOptions {
        base_url: config.registry.base_url.clone(),
        api_key: config.registry.api_key.clone(),
        timeout_seconds: config.registry.timeout_seconds,
    })
}

fn provider_options(config: &Config) -> ProviderOptions {
    ProviderOptions {
        kind: config.model.provider,
        model: config.model.name.clone(),
        base_url: config.model.base_url.clone(),
        api_key: config.model.api_key.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
    }
}

/// Run the full analysis pipeline and write the report.
async fn run_analyze(
    config: &Config,
    doc_id: &str,
    prior_doc_id: Option<&str>,
    strategy: Option<ExtractStrategy>,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> Result<i32> {
    let start_time = Instant::now();
    let strategy = strategy.unwrap_or(config.parser.strategy);

    println!("🔎 Analyzing filing: {}", doc_id);
    if let Some(prior) = prior_doc_id {
        println!("   Comparing against prior filing: {}", prior);
    }

    // Composition root: every collaborator is built once, here.
    let provider = create_provider(&provider_options(config))?;
    println!(
        "🤖 Provider: {} ({})",
        provider.provider_name(),
        provider.model_name()
    );

    let client = Arc::new(EdinetClient::new(registry_options(config)?)?);
    let cache = Arc::new(CacheIndex::new(config.cache.dir.clone()));
    let cascade = Arc::new(ExtractionCascade::new(
        Some(provider.clone()),
        config.parser.ocr_command.clone(),
    ));

    let pipeline = AnalysisPipeline::new(Collaborators {
        fetcher: client,
        cache,
        provider,
        cascade,
        download_dir: config.cache.dir.clone(),
        strategy,
    })?;

    println!("\n🔬 Running analysis pipeline...\n");
    let state = pipeline.run(doc_id, prior_doc_id).await;
    let duration = start_time.elapsed().as_secs_f64();

    let Some(report) = state.report.as_ref() else {
        for err in &state.errors {
            eprintln!("   ⚠️  {}", err);
        }
        bail!("analysis produced no report for {}", doc_id);
    };

    let rendered = match format {
        OutputFormat::Markdown => report::generate_markdown_report(report),
        OutputFormat::Json => report::generate_json_report(report)?,
    };

    let output_path = output.unwrap_or_else(|| PathBuf::from(&config.general.output));
    std::fs::write(&output_path, &rendered)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_analysis_summary(report, &state.completed_nodes, duration);
    println!("\n✅ Report saved to: {}", output_path.display());

    if !state.errors.is_empty() {
        eprintln!("\n⚠️  Completed with {} node error(s):", state.errors.len());
        for err in &state.errors {
            eprintln!("   - {}", err);
        }
        return Ok(2);
    }
    Ok(0)
}

fn print_analysis_summary(report: &CompositeReport, completed: &[String], duration: f64) {
    println!("\n📊 Analysis Summary:");
    println!("   Business summary:   {}", report.business_summary.status_label());
    println!("   Risk analysis:      {}", report.risk_analysis.status_label());
    println!("   Financial analysis: {}", report.financial_analysis.status_label());
    println!("   Period comparison:  {}", report.period_comparison.status_label());
    println!("   Completed nodes:    {}", completed.join(", "));
    println!("   Duration:           {:.1}s", duration);
}

#[allow(clippy::too_many_arguments)]
fn build_filter(
    edinet_code: Option<String>,
    sec_code: Option<String>,
    company: Option<String>,
    type_codes: Option<Vec<String>>,
    from: Option<chrono::NaiveDate>,
    to: Option<chrono::NaiveDate>,
    order: SearchOrder,
    limit: Option<usize>,
) -> FilingFilter {
    let end_date = to.unwrap_or_else(|| Utc::now().date_naive());
    let start_date = from.unwrap_or(end_date);
    FilingFilter {
        edinet_code,
        sec_code,
        company_name: company,
        doc_type_codes: type_codes,
        start_date,
        end_date,
        order,
        max_count: limit,
    }
}

/// Search the registry and print matches.
async fn run_search(config: &Config, filter: FilingFilter, json: bool, quiet: bool) -> Result<i32> {
    let client = EdinetClient::new(registry_options(config)?)?;

    let days = (filter.end_date - filter.start_date).num_days() + 1;
    let progress = if quiet || json {
        None
    } else {
        let pb = ProgressBar::new(days as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} days ({msg})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let results = search_filings(&client, &filter, progress.as_ref()).await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(0);
    }

    if results.is_empty() {
        println!("No filings matched the search criteria.");
        return Ok(0);
    }

    println!("📄 {} filing(s) found:\n", results.len());
    for filing in &results {
        print_filing(filing);
    }
    Ok(0)
}

fn print_filing(filing: &Filing) {
    println!("   {}", filing.label());
    println!(
        "      type: {} | period: {} → {} | submitted: {}",
        filing.doc_type_code.as_deref().unwrap_or("-"),
        filing.period_start.as_deref().unwrap_or("-"),
        filing.period_end.as_deref().unwrap_or("-"),
        filing.submit_date_time.as_deref().unwrap_or("-"),
    );
}

/// Download one document into the cache.
async fn run_download(
    config: &Config,
    doc_id: &str,
    kind: DownloadKind,
    date: Option<chrono::NaiveDate>,
) -> Result<i32> {
    let client = EdinetClient::new(registry_options(config)?)?;

    // With a submission date we can look up the filing's metadata and
    // place the file into the full cache hierarchy.
    let path = if let Some(date) = date {
        let filings = client.list_filings(date).await?;
        let filing = filings
            .into_iter()
            .find(|f| f.doc_id == doc_id)
            .with_context(|| format!("{} not found in the {} filing list", doc_id, date))?;
        build_download_path(
            &config.cache.dir,
            filing.sec_code.as_deref(),
            filing.filer_name.as_deref(),
            filing.doc_type_code.as_deref(),
            filing.period_end.as_deref(),
            doc_id,
            kind.extension(),
        )
    } else {
        config
            .cache
            .dir
            .join(format!("{}.{}", doc_id, kind.extension()))
    };

    if path.exists() {
        println!("✅ Already cached: {}", path.display());
        return Ok(0);
    }

    println!("📥 Downloading {} ...", doc_id);
    let bytes = client.fetch_document(doc_id, kind).await?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Saved {} bytes to {}", bytes.len(), path.display());
    Ok(0)
}

/// Inspect the local cache.
fn run_cache(config: &Config, command: CacheCommand) -> Result<i32> {
    let index = CacheIndex::new(config.cache.dir.clone());

    match command {
        CacheCommand::Stats => {
            let stats = index.stats();
            println!("📦 Cache: {}", config.cache.dir.display());
            println!("   Documents: {}", stats.total_documents);
            println!("   Issuers:   {}", stats.total_issuers);

            if !stats.by_type.is_empty() {
                println!("\n   By document type:");
                let mut by_type: Vec<_> = stats.by_type.iter().collect();
                by_type.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
                for (doc_type, count) in by_type {
                    println!(
                        "      {} ({}): {}",
                        doc_type,
                        models::doc_type_name(Some(doc_type)),
                        count
                    );
                }
            }
        }
        CacheCommand::List {
            sec_code,
            type_code,
            period,
        } => {
            let entries = index.find_by_filter(
                sec_code.as_deref(),
                type_code.as_deref(),
                period.as_deref(),
            );
            if entries.is_empty() {
                println!("No cached documents matched.");
                return Ok(0);
            }
            println!("📦 {} cached document(s):\n", entries.len());
            for entry in entries {
                println!(
                    "   {} | {} | {} | {}",
                    entry.doc_id,
                    entry.sec_code.as_deref().unwrap_or("-"),
                    entry.period.as_deref().unwrap_or("-"),
                    entry.path.display()
                );
            }
        }
    }
    Ok(0)
}
