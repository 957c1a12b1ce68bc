//! Analysis nodes.
//!
//! Each node is one execution unit in the pipeline graph: it declares
//! an identity, an execution step over a read-only state snapshot, and
//! an update step turning its output into a state patch. Nodes are
//! injected with only the collaborators they need.

use crate::cache::CacheIndex;
use crate::extract::{ExtractStrategy, ExtractionCascade, PageRange};
use crate::llm::{complete_typed, LlmProvider};
use crate::models::{
    AggregateNarrative, AspectOutcome, BusinessSummary, CompositeReport, DownloadKind,
    FinancialAnalysis, PeriodComparison, RiskAnalysis,
};
use crate::pipeline::state::{AnalysisState, StatePatch};
use crate::registry::DocumentFetcher;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Identity of a pipeline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Acquire,
    Parse,
    AcquirePrior,
    ParsePrior,
    BusinessSummary,
    RiskExtraction,
    FinancialAnalysis,
    PeriodComparison,
    Aggregate,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Acquire => "acquire",
            NodeId::Parse => "parse",
            NodeId::AcquirePrior => "acquire_prior",
            NodeId::ParsePrior => "parse_prior",
            NodeId::BusinessSummary => "business_summary",
            NodeId::RiskExtraction => "risk_extraction",
            NodeId::FinancialAnalysis => "financial_analysis",
            NodeId::PeriodComparison => "period_comparison",
            NodeId::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which filing a node operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocTarget {
    Current,
    Prior,
}

/// Tagged output of node execution.
#[derive(Debug)]
pub enum NodeOutput {
    FilePath(PathBuf),
    Text(String),
    Business(BusinessSummary),
    Risks(RiskAnalysis),
    Financials(FinancialAnalysis),
    Comparison(PeriodComparison),
    Report(CompositeReport),
}

/// One execution unit in the analysis graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    /// Run the node over a read-only snapshot of the state.
    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput>;

    /// Turn the node's output into a disjoint state patch.
    fn update(&self, output: NodeOutput) -> StatePatch;
}

fn unexpected_output(id: NodeId, output: &NodeOutput) -> StatePatch {
    warn!("Node {} produced unexpected output variant: {:?}", id, output);
    StatePatch::default()
}

/// Acquires a filing: cache lookup first, registry download second.
pub struct AcquireNode {
    fetcher: Arc<dyn DocumentFetcher>,
    cache: Arc<CacheIndex>,
    download_dir: PathBuf,
    target: DocTarget,
}

impl AcquireNode {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        cache: Arc<CacheIndex>,
        download_dir: PathBuf,
        target: DocTarget,
    ) -> Self {
        Self {
            fetcher,
            cache,
            download_dir,
            target,
        }
    }
}

#[async_trait]
impl Node for AcquireNode {
    fn id(&self) -> NodeId {
        match self.target {
            DocTarget::Current => NodeId::Acquire,
            DocTarget::Prior => NodeId::AcquirePrior,
        }
    }

    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput> {
        let doc_id = match self.target {
            DocTarget::Current => state.doc_id.as_str(),
            DocTarget::Prior => state
                .prior_doc_id
                .as_deref()
                .context("prior filing id is not set")?,
        };

        if let Some(entry) = self.cache.find_by_doc_id(doc_id) {
            return Ok(NodeOutput::FilePath(entry.path));
        }

        let path = self.download_dir.join(format!("{}.pdf", doc_id));
        if path.exists() {
            info!("Document already downloaded: {}", path.display());
            return Ok(NodeOutput::FilePath(path));
        }

        let bytes = self
            .fetcher
            .fetch(doc_id, DownloadKind::Pdf)
            .await
            .with_context(|| format!("failed to download document {}", doc_id))?;

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| format!("failed to create {}", self.download_dir.display()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!("Downloaded {} to {}", doc_id, path.display());
        Ok(NodeOutput::FilePath(path))
    }

    fn update(&self, output: NodeOutput) -> StatePatch {
        match output {
            NodeOutput::FilePath(path) => {
                let mut patch = StatePatch::default();
                match self.target {
                    DocTarget::Current => patch.pdf_path = Some(path),
                    DocTarget::Prior => patch.prior_pdf_path = Some(path),
                }
                patch
            }
            other => unexpected_output(self.id(), &other),
        }
    }
}

/// Parses a filing's PDF into text via the extraction cascade.
pub struct ParseNode {
    cascade: Arc<ExtractionCascade>,
    strategy: ExtractStrategy,
    target: DocTarget,
}

impl ParseNode {
    pub fn new(
        cascade: Arc<ExtractionCascade>,
        strategy: ExtractStrategy,
        target: DocTarget,
    ) -> Self {
        Self {
            cascade,
            strategy,
            target,
        }
    }
}

#[async_trait]
impl Node for ParseNode {
    fn id(&self) -> NodeId {
        match self.target {
            DocTarget::Current => NodeId::Parse,
            DocTarget::Prior => NodeId::ParsePrior,
        }
    }

    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput> {
        let path = match self.target {
            DocTarget::Current => state.pdf_path.as_ref(),
            DocTarget::Prior => state.prior_pdf_path.as_ref(),
        }
        .context("document path is not set")?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let extraction = self
            .cascade
            .extract(&bytes, self.strategy, PageRange::default())
            .await?;

        if !extraction.gate_passed {
            warn!(
                "Extraction with {} did not pass the quality gate; using its output anyway",
                extraction.strategy
            );
        }
        info!(
            "Parsed {} ({} pages via {})",
            path.display(),
            extraction.pages,
            extraction.strategy
        );

        Ok(NodeOutput::Text(extraction.text))
    }

    fn update(&self, output: NodeOutput) -> StatePatch {
        match output {
            NodeOutput::Text(text) => {
                let mut patch = StatePatch::default();
                match self.target {
                    DocTarget::Current => patch.markdown = Some(text),
                    DocTarget::Prior => patch.prior_markdown = Some(text),
                }
                patch
            }
            other => unexpected_output(self.id(), &other),
        }
    }
}

const BUSINESS_SUMMARY_PROMPT: &str = "You are an equity research analyst. From the following \
securities filing text, extract the business overview: company name, fiscal period, what the \
business does, main products and services, reportable segments, competitive advantages, growth \
strategy and key initiatives. Base every statement on the filing text.\n\nFiling text:\n\n{content}";

const RISK_EXTRACTION_PROMPT: &str = "You are an equity research analyst. From the following \
securities filing text, extract the disclosed risk factors. Categorize each risk, rate its \
severity, include disclosed mitigations, and finish with an overall risk summary. Base every \
statement on the filing text.\n\nFiling text:\n\n{content}";

const FINANCIAL_ANALYSIS_PROMPT: &str = "You are an equity research analyst. From the following \
securities filing text, analyze the financial results: revenue, profitability, cash flows and \
financial position, with headline metrics and the stated outlook. Base every statement on the \
filing text.\n\nFiling text:\n\n{content}";

/// Which analysis aspect an [`AspectNode`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectKind {
    Business,
    Risks,
    Financials,
}

/// Runs one structured-output analysis over the extracted text.
pub struct AspectNode {
    provider: Arc<dyn LlmProvider>,
    kind: AspectKind,
}

impl AspectNode {
    pub fn new(provider: Arc<dyn LlmProvider>, kind: AspectKind) -> Self {
        Self { provider, kind }
    }
}

#[async_trait]
impl Node for AspectNode {
    fn id(&self) -> NodeId {
        match self.kind {
            AspectKind::Business => NodeId::BusinessSummary,
            AspectKind::Risks => NodeId::RiskExtraction,
            AspectKind::Financials => NodeId::FinancialAnalysis,
        }
    }

    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput> {
        let markdown = state
            .markdown
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .context("extracted text is not available")?;

        info!("Running {} over {} chars", self.id(), markdown.len());

        let output = match self.kind {
            AspectKind::Business => {
                let prompt = BUSINESS_SUMMARY_PROMPT.replace("{content}", markdown);
                NodeOutput::Business(
                    complete_typed::<BusinessSummary>(self.provider.as_ref(), &prompt).await?,
                )
            }
            AspectKind::Risks => {
                let prompt = RISK_EXTRACTION_PROMPT.replace("{content}", markdown);
                NodeOutput::Risks(
                    complete_typed::<RiskAnalysis>(self.provider.as_ref(), &prompt).await?,
                )
            }
            AspectKind::Financials => {
                let prompt = FINANCIAL_ANALYSIS_PROMPT.replace("{content}", markdown);
                NodeOutput::Financials(
                    complete_typed::<FinancialAnalysis>(self.provider.as_ref(), &prompt).await?,
                )
            }
        };

        Ok(output)
    }

    fn update(&self, output: NodeOutput) -> StatePatch {
        let mut patch = StatePatch::default();
        match (self.kind, output) {
            (AspectKind::Business, NodeOutput::Business(v)) => patch.business_summary = Some(v),
            (AspectKind::Risks, NodeOutput::Risks(v)) => patch.risk_analysis = Some(v),
            (AspectKind::Financials, NodeOutput::Financials(v)) => {
                patch.financial_analysis = Some(v)
            }
            (_, other) => return unexpected_output(self.id(), &other),
        }
        patch
    }
}

const PERIOD_COMPARISON_PROMPT: &str = "You are an equity research analyst. Compare the current \
and prior period filings below. Identify material changes with their category and significance, \
new developments, discontinued items, and an overall assessment of the period-over-period \
trajectory.\n\nCurrent period filing:\n\n{current}\n\nPrior period filing:\n\n{prior}";

/// Compares current and prior filing texts.
pub struct PeriodComparisonNode {
    provider: Arc<dyn LlmProvider>,
}

impl PeriodComparisonNode {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Node for PeriodComparisonNode {
    fn id(&self) -> NodeId {
        NodeId::PeriodComparison
    }

    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput> {
        let current = state
            .markdown
            .as_deref()
            .context("extracted text is not available")?;
        let prior = state
            .prior_markdown
            .as_deref()
            .context("prior extracted text is not available")?;

        info!(
            "Comparing periods: current {} chars, prior {} chars",
            current.len(),
            prior.len()
        );

        let prompt = PERIOD_COMPARISON_PROMPT
            .replace("{current}", current)
            .replace("{prior}", prior);
        let comparison = complete_typed::<PeriodComparison>(self.provider.as_ref(), &prompt).await?;

        Ok(NodeOutput::Comparison(comparison))
    }

    fn update(&self, output: NodeOutput) -> StatePatch {
        match output {
            NodeOutput::Comparison(comparison) => StatePatch {
                period_comparison: Some(comparison),
                ..Default::default()
            },
            other => unexpected_output(self.id(), &other),
        }
    }
}

const AGGREGATE_PROMPT: &str = "You are an equity research analyst preparing an investor-facing \
synthesis. Combine the analysis results below into an executive summary, a list of investment \
highlights (positive factors) and a list of concerns (negative factors). Sections marked \
\"unavailable\" could not be produced; work with what is present and do not speculate beyond \
it.\n\n# Business summary\n\n{business}\n\n# Risk analysis\n\n{risks}\n\n\
# Financial analysis\n\n{financials}\n\n# Period comparison\n\n{comparison}";

/// Folds available aspects into the composite report.
pub struct AggregateNode {
    provider: Arc<dyn LlmProvider>,
}

impl AggregateNode {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

fn format_aspect<T: Serialize>(value: &Option<T>) -> String {
    value
        .as_ref()
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "unavailable".to_string())
}

/// Classify one aspect slot for the composite report.
fn aspect_outcome<T: Clone>(
    value: &Option<T>,
    requested: bool,
    state: &AnalysisState,
    node: NodeId,
) -> AspectOutcome<T> {
    match value {
        Some(v) => AspectOutcome::Present(v.clone()),
        None if !requested => AspectOutcome::NotRequested,
        None => {
            let prefix = format!("{}:", node.as_str());
            let reason = state
                .errors
                .iter()
                .find(|e| e.starts_with(&prefix))
                .cloned()
                .unwrap_or_else(|| format!("{} produced no result", node.as_str()));
            AspectOutcome::Failed { reason }
        }
    }
}

#[async_trait]
impl Node for AggregateNode {
    fn id(&self) -> NodeId {
        NodeId::Aggregate
    }

    async fn execute(&self, state: &AnalysisState) -> Result<NodeOutput> {
        if !state.has_any_aspect() && state.markdown.is_none() {
            bail!("no usable content: parsing produced no text and no aspect result exists");
        }

        let prompt = AGGREGATE_PROMPT
            .replace("{business}", &format_aspect(&state.business_summary))
            .replace("{risks}", &format_aspect(&state.risk_analysis))
            .replace("{financials}", &format_aspect(&state.financial_analysis))
            .replace("{comparison}", &format_aspect(&state.period_comparison));

        let narrative = complete_typed::<AggregateNarrative>(self.provider.as_ref(), &prompt).await?;

        let comparison_requested = state.prior_doc_id.is_some();
        let report = CompositeReport {
            doc_id: state.doc_id.clone(),
            prior_doc_id: state.prior_doc_id.clone(),
            executive_summary: narrative.executive_summary,
            business_summary: aspect_outcome(
                &state.business_summary,
                true,
                state,
                NodeId::BusinessSummary,
            ),
            risk_analysis: aspect_outcome(&state.risk_analysis, true, state, NodeId::RiskExtraction),
            financial_analysis: aspect_outcome(
                &state.financial_analysis,
                true,
                state,
                NodeId::FinancialAnalysis,
            ),
            period_comparison: aspect_outcome(
                &state.period_comparison,
                comparison_requested,
                state,
                NodeId::PeriodComparison,
            ),
            investment_highlights: narrative.investment_highlights,
            concerns: narrative.concerns,
            generated_at: Utc::now(),
        };

        Ok(NodeOutput::Report(report))
    }

    fn update(&self, output: NodeOutput) -> StatePatch {
        match output {
            NodeOutput::Report(report) => StatePatch {
                report: Some(report),
                ..Default::default()
            },
            other => unexpected_output(self.id(), &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_names() {
        assert_eq!(NodeId::Acquire.as_str(), "acquire");
        assert_eq!(NodeId::BusinessSummary.as_str(), "business_summary");
        assert_eq!(NodeId::PeriodComparison.to_string(), "period_comparison");
    }

    #[test]
    fn test_aspect_outcome_classification() {
        let mut state = AnalysisState::new("S100ABCD", None);
        state.record_error("risk_extraction: provider error: timeout");

        let failed: AspectOutcome<RiskAnalysis> =
            aspect_outcome(&None, true, &state, NodeId::RiskExtraction);
        match failed {
            AspectOutcome::Failed { reason } => assert!(reason.contains("timeout")),
            other => panic!("expected Failed, got {:?}", other.status_label()),
        }

        let not_requested: AspectOutcome<PeriodComparison> =
            aspect_outcome(&None, false, &state, NodeId::PeriodComparison);
        assert!(matches!(not_requested, AspectOutcome::NotRequested));
    }

    #[test]
    fn test_format_aspect_unavailable() {
        let none: Option<RiskAnalysis> = None;
        assert_eq!(format_aspect(&none), "unavailable");

        let some = Some(RiskAnalysis {
            risks: vec![],
            new_risks: vec![],
            risk_summary: "stable".to_string(),
        });
        assert!(format_aspect(&some).contains("stable"));
    }
}
