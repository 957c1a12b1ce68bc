//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::extract::ExtractStrategy;
use crate::llm::ProviderKind;
use crate::models::DownloadKind;
use crate::registry::SearchOrder;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// EdInsight - LLM-powered analysis for EDINET filings
///
/// Search, download and analyze regulatory filings from the EDINET
/// registry. Analysis runs a multi-aspect LLM pipeline and writes a
/// Markdown or JSON report.
///
/// Examples:
///   edinsight analyze S100ABCD
///   edinsight analyze S100ABCD --prior-doc-id S100WXYZ --format json
///   edinsight search --edinet-code E02144 --type-codes 120 --limit 1
///   edinsight download S100ABCD --date 2024-06-20
///   edinsight cache stats
///   edinsight init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .edinsight.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// EDINET API key
    #[arg(long, global = true, env = "EDINSIGHT_API_KEY", value_name = "KEY")]
    pub api_key: Option<String>,

    /// Download cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// LLM model to use for analysis
    #[arg(short, long, global = true, env = "EDINSIGHT_MODEL", value_name = "MODEL")]
    pub model: Option<String>,

    /// LLM provider (ollama, openai)
    #[arg(long, global = true, value_enum)]
    pub provider: Option<ProviderKind>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the full analysis pipeline for one filing
    Analyze {
        /// Document id to analyze (e.g. S100ABCD)
        doc_id: String,

        /// Prior-period document id for the comparison branch
        #[arg(long, value_name = "ID")]
        prior_doc_id: Option<String>,

        /// Extraction strategy override (default: from config)
        #[arg(long, value_enum)]
        strategy: Option<ExtractStrategy>,

        /// Report output format
        #[arg(long, value_enum, default_value = "markdown")]
        format: OutputFormat,

        /// Report output path (default: from config)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Search the registry for filings
    Search {
        /// Filer EDINET code (e.g. E02144)
        #[arg(long, value_name = "CODE")]
        edinet_code: Option<String>,

        /// Filer securities code (e.g. 72030)
        #[arg(long, value_name = "CODE")]
        sec_code: Option<String>,

        /// Filer name substring
        #[arg(long, value_name = "NAME")]
        company: Option<String>,

        /// Document type codes, comma-separated (e.g. 120,140)
        #[arg(long, value_name = "CODES", value_delimiter = ',')]
        type_codes: Option<Vec<String>>,

        /// First day of the search range (default: same as --to)
        #[arg(long, value_name = "YYYY-MM-DD")]
        from: Option<NaiveDate>,

        /// Last day of the search range (default: today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        to: Option<NaiveDate>,

        /// Search direction
        #[arg(long, value_enum, default_value = "newest-first")]
        order: SearchOrder,

        /// Stop after this many matches
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,

        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download one filing into the cache
    Download {
        /// Document id to download
        doc_id: String,

        /// Binary format to fetch
        #[arg(long, value_enum, default_value = "pdf")]
        kind: DownloadKind,

        /// Submission date; used to place the file into the cache
        /// hierarchy with full metadata
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },

    /// Inspect the local download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Generate a default .edinsight.toml configuration file
    InitConfig,
}

/// Cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Show aggregate cache statistics
    Stats,

    /// List cached documents
    List {
        /// Filter by securities code
        #[arg(long, value_name = "CODE")]
        sec_code: Option<String>,

        /// Filter by document type code
        #[arg(long, value_name = "CODE")]
        type_code: Option<String>,

        /// Filter by period (YYYYMM)
        #[arg(long, value_name = "YYYYMM")]
        period: Option<String>,
    },
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Analyze { doc_id, .. } | Command::Download { doc_id, .. } => {
                if doc_id.trim().is_empty() {
                    return Err("Document id must not be empty".to_string());
                }
            }
            Command::Search {
                from, to, limit, ..
            } => {
                if let (Some(from), Some(to)) = (from, to) {
                    if from > to {
                        return Err(format!("--from {} is after --to {}", from, to));
                    }
                }
                if *limit == Some(0) {
                    return Err("--limit must be at least 1".to_string());
                }
            }
            Command::Cache { .. } | Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(command: Command) -> Args {
        Args {
            command,
            config: None,
            verbose: false,
            quiet: false,
            api_key: None,
            cache_dir: None,
            model: None,
            provider: None,
        }
    }

    fn analyze_command() -> Command {
        Command::Analyze {
            doc_id: "S100ABCD".to_string(),
            prior_doc_id: None,
            strategy: None,
            format: OutputFormat::Markdown,
            output: None,
        }
    }

    #[test]
    fn test_validation_accepts_analyze() {
        assert!(make_args(analyze_command()).validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_doc_id() {
        let args = make_args(Command::Analyze {
            doc_id: "  ".to_string(),
            prior_doc_id: None,
            strategy: None,
            format: OutputFormat::Markdown,
            output: None,
        });
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_conflicting_verbosity() {
        let mut args = make_args(analyze_command());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_search_range() {
        let args = make_args(Command::Search {
            edinet_code: None,
            sec_code: None,
            company: None,
            type_codes: None,
            from: NaiveDate::from_ymd_opt(2024, 12, 31),
            to: NaiveDate::from_ymd_opt(2024, 1, 1),
            order: SearchOrder::NewestFirst,
            limit: None,
            json: false,
        });
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let args = make_args(Command::Search {
            edinet_code: None,
            sec_code: None,
            company: None,
            type_codes: None,
            from: None,
            to: None,
            order: SearchOrder::NewestFirst,
            limit: Some(0),
            json: false,
        });
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(analyze_command());
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
