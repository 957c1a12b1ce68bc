//! Data models for the filing analyzer.
//!
//! This module contains the registry-facing filing record, the
//! document-type code table, and the analysis result schemas that the
//! pipeline nodes produce and the aggregator combines.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Binary format requested when fetching a document from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DownloadKind {
    /// XBRL archive (type 1)
    Xbrl,
    /// Rendered PDF (type 2)
    #[default]
    Pdf,
    /// Attachment archive (type 3)
    Attachment,
    /// English translation archive (type 4)
    English,
    /// CSV financial data archive (type 5)
    Csv,
}

impl DownloadKind {
    /// Returns the numeric `type` parameter the registry expects.
    pub fn code(&self) -> u8 {
        match self {
            DownloadKind::Xbrl => 1,
            DownloadKind::Pdf => 2,
            DownloadKind::Attachment => 3,
            DownloadKind::English => 4,
            DownloadKind::Csv => 5,
        }
    }

    /// Returns the file extension used when saving this format.
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadKind::Pdf => "pdf",
            _ => "zip",
        }
    }
}

/// One filing record as returned by the registry's document list API.
///
/// Field names map to EDINET's camelCase JSON; availability flags arrive
/// as `"0"`/`"1"` strings and are converted to booleans on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    /// Document management number (8 characters, e.g. "S100ABCD").
    #[serde(rename = "docID")]
    pub doc_id: String,
    /// Filer's EDINET code (6 characters, e.g. "E02144").
    #[serde(rename = "edinetCode")]
    pub edinet_code: Option<String>,
    /// Filer's securities code (5 digits), None for unlisted filers.
    #[serde(rename = "secCode")]
    pub sec_code: Option<String>,
    /// Filer's registered name.
    #[serde(rename = "filerName")]
    pub filer_name: Option<String>,
    /// Document type code (3 digits, e.g. "120").
    #[serde(rename = "docTypeCode")]
    pub doc_type_code: Option<String>,
    /// Reporting period start (YYYY-MM-DD).
    #[serde(rename = "periodStart")]
    pub period_start: Option<String>,
    /// Reporting period end (YYYY-MM-DD).
    #[serde(rename = "periodEnd")]
    pub period_end: Option<String>,
    /// Submission datetime (YYYY-MM-DD hh:mm).
    #[serde(rename = "submitDateTime")]
    pub submit_date_time: Option<String>,
    /// Human-readable document description.
    #[serde(rename = "docDescription")]
    pub doc_description: Option<String>,
    /// True if a PDF rendition is available.
    #[serde(rename = "pdfFlag", deserialize_with = "flag_from_str", default)]
    pub pdf_flag: bool,
    /// True if XBRL data is available.
    #[serde(rename = "xbrlFlag", deserialize_with = "flag_from_str", default)]
    pub xbrl_flag: bool,
    /// True if CSV financial data is available.
    #[serde(rename = "csvFlag", deserialize_with = "flag_from_str", default)]
    pub csv_flag: bool,
}

/// Deserialize EDINET's `"0"`/`"1"` string flags into booleans.
fn flag_from_str<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref() == Some("1"))
}

impl Filing {
    /// Returns a short one-line label for log and progress output.
    pub fn label(&self) -> String {
        let name = self.filer_name.as_deref().unwrap_or("unknown filer");
        match &self.doc_description {
            Some(desc) => format!("{} - {} ({})", self.doc_id, desc, name),
            None => format!("{} ({})", self.doc_id, name),
        }
    }
}

/// Document type code to Japanese name mapping.
///
/// These names are embedded in cache directory paths, so the spellings
/// must stay stable across releases.
pub fn doc_type_name(doc_type_code: Option<&str>) -> &'static str {
    match doc_type_code {
        Some("120") => "有価証券報告書",
        Some("130") => "訂正有価証券報告書",
        Some("140") => "四半期報告書",
        Some("150") => "訂正四半期報告書",
        Some("160") => "半期報告書",
        Some("170") => "訂正半期報告書",
        Some("180") => "臨時報告書",
        Some("190") => "訂正臨時報告書",
        Some("030") => "有価証券届出書",
        Some("040") => "訂正有価証券届出書",
        Some("350") => "公開買付届出書",
        Some("360") => "大量保有報告書",
        Some("380") => "変更報告書",
        Some("250") => "内部統制報告書",
        Some("010") => "目論見書",
        _ => "その他",
    }
}

/// Significance level used across risk items and change points.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    Low,
    Medium,
    High,
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Significance::Low => write!(f, "Low"),
            Significance::Medium => write!(f, "Medium"),
            Significance::High => write!(f, "High"),
        }
    }
}

/// Risk category taxonomy for the risk-extraction aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Market,
    Regulatory,
    Financial,
    Operational,
    Strategic,
    Technology,
    Environmental,
    Reputation,
    Other,
}

/// One reportable business segment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BusinessSegment {
    /// Segment name.
    pub name: String,
    /// What the segment does.
    pub description: String,
    /// Revenue share, if disclosed (e.g. "35%").
    pub revenue_share: Option<String>,
    /// Main products or services of the segment.
    #[serde(default)]
    pub key_products: Vec<String>,
}

/// Business summary aspect: overview, strategy and positioning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BusinessSummary {
    /// Issuer name as stated in the filing.
    pub company_name: String,
    /// Fiscal period covered (e.g. "FY2024, ended March 2024").
    pub fiscal_year: String,
    /// Concise description of what the business does.
    pub business_description: String,
    #[serde(default)]
    pub main_products_services: Vec<String>,
    #[serde(default)]
    pub business_segments: Vec<BusinessSegment>,
    #[serde(default)]
    pub competitive_advantages: Vec<String>,
    /// Stated growth strategy.
    pub growth_strategy: String,
    #[serde(default)]
    pub key_initiatives: Vec<String>,
}

/// One extracted risk factor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RiskItem {
    pub category: RiskCategory,
    pub title: String,
    pub description: String,
    pub severity: Significance,
    /// Disclosed mitigation, if any.
    pub mitigation: Option<String>,
}

/// Risk analysis aspect: categorized risk factors from the filing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RiskAnalysis {
    #[serde(default)]
    pub risks: Vec<RiskItem>,
    /// Risks that appear newly disclosed relative to prior filings.
    #[serde(default)]
    pub new_risks: Vec<String>,
    /// Overall characterization of the risk profile.
    pub risk_summary: String,
}

/// One headline financial metric.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinancialHighlight {
    /// Metric name (e.g. "Revenue").
    pub metric_name: String,
    /// Current period value as stated.
    pub current_value: String,
    pub prior_value: Option<String>,
    /// Change rate if derivable (e.g. "+5.3%").
    pub change_rate: Option<String>,
    pub comment: String,
}

/// Financial analysis aspect: results, cash flow and position.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinancialAnalysis {
    pub revenue_analysis: String,
    pub profit_analysis: String,
    pub cash_flow_analysis: String,
    pub financial_position: String,
    #[serde(default)]
    pub highlights: Vec<FinancialHighlight>,
    pub outlook: String,
}

/// Category of an observed period-over-period change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Business,
    Financial,
    Risk,
    Strategy,
    Governance,
    Organization,
    Other,
}

/// One material change between the prior and current filing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChangePoint {
    pub category: ChangeCategory,
    pub title: String,
    pub prior_state: String,
    pub current_state: String,
    pub significance: Significance,
    /// What the change implies for an investor.
    pub implication: String,
}

/// Period comparison aspect: diffs against the prior filing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PeriodComparison {
    #[serde(default)]
    pub change_points: Vec<ChangePoint>,
    #[serde(default)]
    pub new_developments: Vec<String>,
    #[serde(default)]
    pub discontinued_items: Vec<String>,
    pub overall_assessment: String,
}

/// Narrative synthesis produced by the aggregation step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AggregateNarrative {
    /// Executive summary over whatever aspects were available.
    pub executive_summary: String,
    #[serde(default)]
    pub investment_highlights: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

/// Outcome of one analysis aspect in the composite report.
///
/// Downstream consumers need to distinguish an aspect that was never
/// requested from one that was attempted and failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum AspectOutcome<T> {
    Present(T),
    Failed { reason: String },
    NotRequested,
}

impl<T> AspectOutcome<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, AspectOutcome::Present(_))
    }

    /// Access the value when present.
    #[allow(dead_code)] // Utility for downstream consumers
    pub fn as_present(&self) -> Option<&T> {
        match self {
            AspectOutcome::Present(value) => Some(value),
            _ => None,
        }
    }

    /// Short status label for report rendering.
    pub fn status_label(&self) -> &'static str {
        match self {
            AspectOutcome::Present(_) => "present",
            AspectOutcome::Failed { .. } => "failed",
            AspectOutcome::NotRequested => "not requested",
        }
    }
}

/// The aggregated, multi-aspect analysis result for one filing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeReport {
    /// Document id this report was generated for.
    pub doc_id: String,
    /// Prior document id, when a comparison was requested.
    pub prior_doc_id: Option<String>,
    pub executive_summary: String,
    pub business_summary: AspectOutcome<BusinessSummary>,
    pub risk_analysis: AspectOutcome<RiskAnalysis>,
    pub financial_analysis: AspectOutcome<FinancialAnalysis>,
    pub period_comparison: AspectOutcome<PeriodComparison>,
    #[serde(default)]
    pub investment_highlights: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filing_deserialization() {
        let json = r#"{
            "docID": "S100ABCD",
            "edinetCode": "E02144",
            "secCode": "72030",
            "filerName": "トヨタ自動車株式会社",
            "docTypeCode": "120",
            "periodStart": "2023-04-01",
            "periodEnd": "2024-03-31",
            "submitDateTime": "2024-06-20 09:01",
            "docDescription": "有価証券報告書",
            "pdfFlag": "1",
            "xbrlFlag": "1",
            "csvFlag": "0"
        }"#;

        let filing: Filing = serde_json::from_str(json).unwrap();
        assert_eq!(filing.doc_id, "S100ABCD");
        assert_eq!(filing.sec_code.as_deref(), Some("72030"));
        assert!(filing.pdf_flag);
        assert!(!filing.csv_flag);
    }

    #[test]
    fn test_filing_missing_flags_default_false() {
        let json = r#"{"docID": "S100WXYZ"}"#;
        let filing: Filing = serde_json::from_str(json).unwrap();
        assert!(!filing.pdf_flag);
        assert!(filing.edinet_code.is_none());
    }

    #[test]
    fn test_download_kind_codes() {
        assert_eq!(DownloadKind::Xbrl.code(), 1);
        assert_eq!(DownloadKind::Pdf.code(), 2);
        assert_eq!(DownloadKind::Csv.code(), 5);
        assert_eq!(DownloadKind::Pdf.extension(), "pdf");
        assert_eq!(DownloadKind::Csv.extension(), "zip");
    }

    #[test]
    fn test_doc_type_name() {
        assert_eq!(doc_type_name(Some("120")), "有価証券報告書");
        assert_eq!(doc_type_name(Some("140")), "四半期報告書");
        assert_eq!(doc_type_name(Some("999")), "その他");
        assert_eq!(doc_type_name(None), "その他");
    }

    #[test]
    fn test_aspect_outcome_serialization() {
        let present: AspectOutcome<RiskAnalysis> = AspectOutcome::Present(RiskAnalysis {
            risks: vec![],
            new_risks: vec![],
            risk_summary: "stable".to_string(),
        });
        let json = serde_json::to_value(&present).unwrap();
        assert_eq!(json["status"], "present");
        assert_eq!(json["value"]["risk_summary"], "stable");

        let failed: AspectOutcome<RiskAnalysis> = AspectOutcome::Failed {
            reason: "provider timeout".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["value"]["reason"], "provider timeout");

        let none: AspectOutcome<RiskAnalysis> = AspectOutcome::NotRequested;
        assert_eq!(none.status_label(), "not requested");
        assert!(!none.is_present());
    }

    #[test]
    fn test_filing_label() {
        let filing = Filing {
            doc_id: "S100ABCD".to_string(),
            edinet_code: None,
            sec_code: None,
            filer_name: Some("Example Corp".to_string()),
            doc_type_code: None,
            period_start: None,
            period_end: None,
            submit_date_time: None,
            doc_description: Some("Annual report".to_string()),
            pdf_flag: true,
            xbrl_flag: false,
            csv_flag: false,
        };
        assert_eq!(filing.label(), "S100ABCD - Annual report (Example Corp)");
    }
}
