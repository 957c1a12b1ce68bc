//! Analysis run state.
//!
//! One `AnalysisState` exists per run and is owned exclusively by the
//! orchestrator. Nodes never touch it directly: they read a shared
//! snapshot and return a patch, which the orchestrator folds in after
//! each wave joins.

use crate::models::{
    BusinessSummary, CompositeReport, FinancialAnalysis, PeriodComparison, RiskAnalysis,
};
use std::path::PathBuf;

/// Accumulated state of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    /// Document id under analysis.
    pub doc_id: String,
    /// Prior-period document id, when a comparison was requested.
    pub prior_doc_id: Option<String>,

    pub pdf_path: Option<PathBuf>,
    pub prior_pdf_path: Option<PathBuf>,

    /// Extracted text of the current filing.
    pub markdown: Option<String>,
    /// Extracted text of the prior filing.
    pub prior_markdown: Option<String>,

    pub business_summary: Option<BusinessSummary>,
    pub risk_analysis: Option<RiskAnalysis>,
    pub financial_analysis: Option<FinancialAnalysis>,
    pub period_comparison: Option<PeriodComparison>,

    pub report: Option<CompositeReport>,

    /// Node failures, deduplicated, in first-occurrence order.
    pub errors: Vec<String>,
    /// Finished node names, deduplicated, in completion order.
    pub completed_nodes: Vec<String>,
}

impl AnalysisState {
    pub fn new(doc_id: impl Into<String>, prior_doc_id: Option<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            prior_doc_id,
            ..Default::default()
        }
    }

    /// Append an error unless an identical one is already recorded.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    /// Append a completed node name unless already recorded.
    pub fn record_completed(&mut self, node: &str) {
        if !self.completed_nodes.iter().any(|n| n == node) {
            self.completed_nodes.push(node.to_string());
        }
    }

    /// Fold a node's patch into the state.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(v) = patch.pdf_path {
            self.pdf_path = Some(v);
        }
        if let Some(v) = patch.prior_pdf_path {
            self.prior_pdf_path = Some(v);
        }
        if let Some(v) = patch.markdown {
            self.markdown = Some(v);
        }
        if let Some(v) = patch.prior_markdown {
            self.prior_markdown = Some(v);
        }
        if let Some(v) = patch.business_summary {
            self.business_summary = Some(v);
        }
        if let Some(v) = patch.risk_analysis {
            self.risk_analysis = Some(v);
        }
        if let Some(v) = patch.financial_analysis {
            self.financial_analysis = Some(v);
        }
        if let Some(v) = patch.period_comparison {
            self.period_comparison = Some(v);
        }
        if let Some(v) = patch.report {
            self.report = Some(v);
        }
    }

    /// True when at least one analysis aspect produced a result.
    pub fn has_any_aspect(&self) -> bool {
        self.business_summary.is_some()
            || self.risk_analysis.is_some()
            || self.financial_analysis.is_some()
    }
}

/// Disjoint state update produced by one node.
///
/// No two nodes in a wave write the same key, so folding patches in
/// any completion order is safe.
#[derive(Debug, Default)]
pub struct StatePatch {
    pub pdf_path: Option<PathBuf>,
    pub prior_pdf_path: Option<PathBuf>,
    pub markdown: Option<String>,
    pub prior_markdown: Option<String>,
    pub business_summary: Option<BusinessSummary>,
    pub risk_analysis: Option<RiskAnalysis>,
    pub financial_analysis: Option<FinancialAnalysis>,
    pub period_comparison: Option<PeriodComparison>,
    pub report: Option<CompositeReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_dedups_preserving_order() {
        let mut state = AnalysisState::new("S100ABCD", None);
        state.record_error("parse: boom");
        state.record_error("risk_extraction: timeout");
        state.record_error("parse: boom");

        assert_eq!(
            state.errors,
            vec!["parse: boom".to_string(), "risk_extraction: timeout".to_string()]
        );
    }

    #[test]
    fn test_completed_list_dedups_preserving_order() {
        let mut state = AnalysisState::new("S100ABCD", None);
        state.record_completed("acquire");
        state.record_completed("parse");
        state.record_completed("acquire");

        assert_eq!(state.completed_nodes, vec!["acquire", "parse"]);
    }

    #[test]
    fn test_apply_merges_disjoint_patches() {
        let mut state = AnalysisState::new("S100ABCD", Some("S100PRIOR".to_string()));

        state.apply(StatePatch {
            markdown: Some("current text".to_string()),
            ..Default::default()
        });
        state.apply(StatePatch {
            prior_markdown: Some("prior text".to_string()),
            ..Default::default()
        });

        assert_eq!(state.markdown.as_deref(), Some("current text"));
        assert_eq!(state.prior_markdown.as_deref(), Some("prior text"));
        assert!(!state.has_any_aspect());
    }
}
