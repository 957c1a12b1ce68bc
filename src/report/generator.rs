//! Markdown report generation.
//!
//! This module generates the investor-facing Markdown rendition of a
//! composite analysis report, plus a JSON form for machine consumers.

use crate::models::{
    AspectOutcome, BusinessSummary, CompositeReport, FinancialAnalysis, PeriodComparison,
    RiskAnalysis,
};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &CompositeReport) -> String {
    let mut output = String::new();

    output.push_str("# Filing Analysis Report\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_business_section(&report.business_summary));
    output.push_str(&generate_risk_section(&report.risk_analysis));
    output.push_str(&generate_financial_section(&report.financial_analysis));
    output.push_str(&generate_comparison_section(&report.period_comparison));
    output.push_str(&generate_highlights_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &CompositeReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

fn generate_metadata_section(report: &CompositeReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Document:** {}\n", report.doc_id));
    if let Some(ref prior) = report.prior_doc_id {
        section.push_str(&format!("- **Prior Document:** {}\n", prior));
    }
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    section.push_str("- **Aspects:** ");
    let statuses = [
        ("business", report.business_summary.status_label()),
        ("risks", report.risk_analysis.status_label()),
        ("financials", report.financial_analysis.status_label()),
        ("comparison", report.period_comparison.status_label()),
    ];
    let rendered: Vec<String> = statuses
        .iter()
        .map(|(name, status)| format!("{}: {}", name, status))
        .collect();
    section.push_str(&rendered.join(" | "));
    section.push_str("\n\n");

    section
}

fn generate_summary_section(report: &CompositeReport) -> String {
    let mut section = String::new();
    section.push_str("## Executive Summary\n\n");
    section.push_str(&report.executive_summary);
    section.push_str("\n\n");
    section
}

/// Render a section body, or an explicit status line when the aspect
/// is absent.
fn aspect_section<T>(
    title: &str,
    outcome: &AspectOutcome<T>,
    render: impl Fn(&T) -> String,
) -> String {
    let mut section = String::new();
    section.push_str(&format!("## {}\n\n", title));

    match outcome {
        AspectOutcome::Present(value) => section.push_str(&render(value)),
        AspectOutcome::Failed { reason } => {
            section.push_str(&format!("⚠️ This analysis failed: {}\n", reason));
        }
        AspectOutcome::NotRequested => {
            section.push_str("This analysis was not requested.\n");
        }
    }

    section.push('\n');
    section
}

fn generate_business_section(outcome: &AspectOutcome<BusinessSummary>) -> String {
    aspect_section("Business Summary", outcome, |summary| {
        let mut body = String::new();
        body.push_str(&format!(
            "**{}** — {}\n\n",
            summary.company_name, summary.fiscal_year
        ));
        body.push_str(&summary.business_description);
        body.push_str("\n\n");

        if !summary.business_segments.is_empty() {
            body.push_str("### Segments\n\n");
            for segment in &summary.business_segments {
                let share = segment
                    .revenue_share
                    .as_deref()
                    .map(|s| format!(" ({})", s))
                    .unwrap_or_default();
                body.push_str(&format!(
                    "- **{}**{}: {}\n",
                    segment.name, share, segment.description
                ));
            }
            body.push('\n');
        }

        if !summary.competitive_advantages.is_empty() {
            body.push_str("### Competitive Advantages\n\n");
            for advantage in &summary.competitive_advantages {
                body.push_str(&format!("- {}\n", advantage));
            }
            body.push('\n');
        }

        body.push_str("### Growth Strategy\n\n");
        body.push_str(&summary.growth_strategy);
        body.push('\n');
        body
    })
}

fn generate_risk_section(outcome: &AspectOutcome<RiskAnalysis>) -> String {
    aspect_section("Risk Analysis", outcome, |analysis| {
        let mut body = String::new();
        body.push_str(&analysis.risk_summary);
        body.push_str("\n\n");

        if !analysis.risks.is_empty() {
            body.push_str("| Severity | Category | Risk |\n");
            body.push_str("|:---|:---|:---|\n");

            let mut risks: Vec<_> = analysis.risks.iter().collect();
            risks.sort_by(|a, b| b.severity.cmp(&a.severity));
            for risk in risks {
                body.push_str(&format!(
                    "| {} | {:?} | **{}** — {} |\n",
                    risk.severity, risk.category, risk.title, risk.description
                ));
            }
            body.push('\n');
        }

        if !analysis.new_risks.is_empty() {
            body.push_str("### Newly Disclosed Risks\n\n");
            for risk in &analysis.new_risks {
                body.push_str(&format!("- {}\n", risk));
            }
            body.push('\n');
        }
        body
    })
}

fn generate_financial_section(outcome: &AspectOutcome<FinancialAnalysis>) -> String {
    aspect_section("Financial Analysis", outcome, |analysis| {
        let mut body = String::new();

        if !analysis.highlights.is_empty() {
            body.push_str("| Metric | Current | Prior | Change |\n");
            body.push_str("|:---|:---|:---|:---|\n");
            for highlight in &analysis.highlights {
                body.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    highlight.metric_name,
                    highlight.current_value,
                    highlight.prior_value.as_deref().unwrap_or("-"),
                    highlight.change_rate.as_deref().unwrap_or("-"),
                ));
            }
            body.push('\n');
        }

        for (title, text) in [
            ("Revenue", &analysis.revenue_analysis),
            ("Profitability", &analysis.profit_analysis),
            ("Cash Flow", &analysis.cash_flow_analysis),
            ("Financial Position", &analysis.financial_position),
            ("Outlook", &analysis.outlook),
        ] {
            body.push_str(&format!("### {}\n\n{}\n\n", title, text));
        }
        body
    })
}

fn generate_comparison_section(outcome: &AspectOutcome<PeriodComparison>) -> String {
    aspect_section("Period Comparison", outcome, |comparison| {
        let mut body = String::new();
        body.push_str(&comparison.overall_assessment);
        body.push_str("\n\n");

        for change in &comparison.change_points {
            body.push_str(&format!(
                "- **{}** [{} / {:?}]: {} → {}. {}\n",
                change.title,
                change.significance,
                change.category,
                change.prior_state,
                change.current_state,
                change.implication
            ));
        }
        if !comparison.change_points.is_empty() {
            body.push('\n');
        }

        if !comparison.new_developments.is_empty() {
            body.push_str("### New Developments\n\n");
            for item in &comparison.new_developments {
                body.push_str(&format!("- {}\n", item));
            }
            body.push('\n');
        }

        if !comparison.discontinued_items.is_empty() {
            body.push_str("### Discontinued\n\n");
            for item in &comparison.discontinued_items {
                body.push_str(&format!("- {}\n", item));
            }
            body.push('\n');
        }
        body
    })
}

fn generate_highlights_section(report: &CompositeReport) -> String {
    let mut section = String::new();

    if !report.investment_highlights.is_empty() {
        section.push_str("## Investment Highlights\n\n");
        for highlight in &report.investment_highlights {
            section.push_str(&format!("- ✅ {}\n", highlight));
        }
        section.push('\n');
    }

    if !report.concerns.is_empty() {
        section.push_str("## Concerns\n\n");
        for concern in &report.concerns {
            section.push_str(&format!("- ⚠️ {}\n", concern));
        }
        section.push('\n');
    }

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by EdInsight*\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskCategory, RiskItem, Significance};
    use chrono::Utc;

    fn test_report() -> CompositeReport {
        CompositeReport {
            doc_id: "S100ABCD".to_string(),
            prior_doc_id: None,
            executive_summary: "Solid year overall.".to_string(),
            business_summary: AspectOutcome::Present(BusinessSummary {
                company_name: "Example Corp".to_string(),
                fiscal_year: "FY2024".to_string(),
                business_description: "Makes examples.".to_string(),
                main_products_services: vec![],
                business_segments: vec![],
                competitive_advantages: vec!["brand".to_string()],
                growth_strategy: "Expand abroad.".to_string(),
                key_initiatives: vec![],
            }),
            risk_analysis: AspectOutcome::Failed {
                reason: "provider timeout".to_string(),
            },
            financial_analysis: AspectOutcome::Present(FinancialAnalysis {
                revenue_analysis: "Revenue grew 5%.".to_string(),
                profit_analysis: "Margins stable.".to_string(),
                cash_flow_analysis: "Strong operating cash flow.".to_string(),
                financial_position: "Low leverage.".to_string(),
                highlights: vec![],
                outlook: "Cautiously optimistic.".to_string(),
            }),
            period_comparison: AspectOutcome::NotRequested,
            investment_highlights: vec!["Market leadership".to_string()],
            concerns: vec!["FX exposure".to_string()],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_markdown_report_contains_sections() {
        let markdown = generate_markdown_report(&test_report());

        assert!(markdown.contains("# Filing Analysis Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("S100ABCD"));
        assert!(markdown.contains("## Executive Summary"));
        assert!(markdown.contains("Solid year overall."));
        assert!(markdown.contains("## Business Summary"));
        assert!(markdown.contains("Example Corp"));
        assert!(markdown.contains("## Investment Highlights"));
        assert!(markdown.contains("Market leadership"));
    }

    #[test]
    fn test_markdown_report_marks_aspect_statuses() {
        let markdown = generate_markdown_report(&test_report());

        // Failed and not-requested aspects are explicit, not omitted.
        assert!(markdown.contains("This analysis failed: provider timeout"));
        assert!(markdown.contains("This analysis was not requested."));
        assert!(markdown.contains("comparison: not requested"));
        assert!(markdown.contains("risks: failed"));
    }

    #[test]
    fn test_risk_table_sorted_by_severity() {
        let mut report = test_report();
        report.risk_analysis = AspectOutcome::Present(RiskAnalysis {
            risks: vec![
                RiskItem {
                    category: RiskCategory::Market,
                    title: "Minor".to_string(),
                    description: "low risk".to_string(),
                    severity: Significance::Low,
                    mitigation: None,
                },
                RiskItem {
                    category: RiskCategory::Financial,
                    title: "Major".to_string(),
                    description: "high risk".to_string(),
                    severity: Significance::High,
                    mitigation: None,
                },
            ],
            new_risks: vec![],
            risk_summary: "Mixed.".to_string(),
        });

        let markdown = generate_markdown_report(&report);
        let major = markdown.find("Major").unwrap();
        let minor = markdown.find("Minor").unwrap();
        assert!(major < minor);
    }

    #[test]
    fn test_json_report_round_trips() {
        let json = generate_json_report(&test_report()).unwrap();
        assert!(json.contains("\"doc_id\""));
        assert!(json.contains("\"status\": \"failed\""));

        let parsed: CompositeReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.doc_id, "S100ABCD");
        assert!(parsed.business_summary.is_present());
    }
}
