//! Date-range document search over the registry.
//!
//! The registry's list API is keyed by submission date, so a search is
//! one query per calendar day across the requested range, filtered
//! client-side. Newest-first walks the range backwards; oldest-first
//! walks it forwards. With a max count, the walk stops as soon as
//! enough matches have accumulated, which keeps "latest annual report"
//! style lookups from sweeping the whole range.

use crate::models::Filing;
use crate::registry::client::{FilingLister, RegistryError};
use chrono::NaiveDate;
use indicatif::ProgressBar;
use tracing::{debug, info};

/// Direction of the day-by-day walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SearchOrder {
    /// Walk from the end date backwards.
    #[default]
    NewestFirst,
    /// Walk from the start date forwards.
    OldestFirst,
}

/// Filter criteria for a document search.
///
/// Identity fields combine with AND logic; `doc_type_codes` is an OR
/// over its members.
#[derive(Debug, Clone)]
pub struct FilingFilter {
    /// Filer EDINET code, exact match.
    pub edinet_code: Option<String>,
    /// Filer securities code, exact match.
    pub sec_code: Option<String>,
    /// Filer name substring match.
    pub company_name: Option<String>,
    /// Document type codes to accept. None accepts all types.
    pub doc_type_codes: Option<Vec<String>>,
    /// First day of the range, inclusive.
    pub start_date: NaiveDate,
    /// Last day of the range, inclusive.
    pub end_date: NaiveDate,
    pub order: SearchOrder,
    /// Stop after this many matches. None collects the full range.
    pub max_count: Option<usize>,
}

impl FilingFilter {
    fn matches(&self, filing: &Filing) -> bool {
        if let Some(ref codes) = self.doc_type_codes {
            match filing.doc_type_code.as_deref() {
                Some(code) if codes.iter().any(|c| c == code) => {}
                _ => return false,
            }
        }

        if let Some(ref edinet_code) = self.edinet_code {
            if filing.edinet_code.as_deref() != Some(edinet_code.as_str()) {
                return false;
            }
        }

        if let Some(ref sec_code) = self.sec_code {
            if filing.sec_code.as_deref() != Some(sec_code.as_str()) {
                return false;
            }
        }

        if let Some(ref name) = self.company_name {
            match filing.filer_name.as_deref() {
                Some(filer) if filer.contains(name.as_str()) => {}
                _ => return false,
            }
        }

        true
    }

    /// The date to query first for the configured order.
    fn first_date(&self) -> NaiveDate {
        match self.order {
            SearchOrder::NewestFirst => self.end_date,
            SearchOrder::OldestFirst => self.start_date,
        }
    }

    /// The next date in the walk, or None when the range is exhausted.
    fn next_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.order {
            SearchOrder::NewestFirst if date > self.start_date => date.pred_opt(),
            SearchOrder::OldestFirst if date < self.end_date => date.succ_opt(),
            _ => None,
        }
    }
}

/// Search the registry for filings matching the filter.
///
/// Matches accumulate in iteration order, so the result is ordered by
/// filing date in the requested direction. Registry failures for any
/// day propagate unmodified; retry policy belongs to the client.
pub async fn search_filings<L>(
    lister: &L,
    filter: &FilingFilter,
    progress: Option<&ProgressBar>,
) -> Result<Vec<Filing>, RegistryError>
where
    L: FilingLister + ?Sized,
{
    if filter.start_date > filter.end_date {
        debug!(
            "Empty search range: {} > {}",
            filter.start_date, filter.end_date
        );
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    let mut current = Some(filter.first_date());

    while let Some(date) = current {
        if let Some(pb) = progress {
            pb.set_message(date.to_string());
            pb.inc(1);
        }

        let day_filings = lister.filings_for_date(date).await?;
        for filing in day_filings {
            if !filter.matches(&filing) {
                continue;
            }
            results.push(filing);
            if let Some(max) = filter.max_count {
                if results.len() >= max {
                    info!("Reached max count {} on {}", max, date);
                    return Ok(results);
                }
            }
        }

        current = filter.next_date(date);
    }

    info!("Search complete: {} filings matched", results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Scripted registry: filings keyed by submission date.
    struct ScriptedLister {
        days: BTreeMap<NaiveDate, Vec<Filing>>,
        fail_on: Option<NaiveDate>,
    }

    #[async_trait]
    impl FilingLister for ScriptedLister {
        async fn filings_for_date(&self, date: NaiveDate) -> Result<Vec<Filing>, RegistryError> {
            if self.fail_on == Some(date) {
                return Err(RegistryError::Server {
                    status: 500,
                    message: "scripted failure".to_string(),
                    endpoint: "/documents.json".to_string(),
                });
            }
            Ok(self.days.get(&date).cloned().unwrap_or_default())
        }
    }

    fn filing(doc_id: &str, date: NaiveDate, doc_type_code: &str) -> Filing {
        Filing {
            doc_id: doc_id.to_string(),
            edinet_code: Some("E02144".to_string()),
            sec_code: Some("72030".to_string()),
            filer_name: Some("Example Motor Corp".to_string()),
            doc_type_code: Some(doc_type_code.to_string()),
            period_start: None,
            period_end: None,
            submit_date_time: Some(format!("{} 09:00", date)),
            doc_description: None,
            pdf_flag: true,
            xbrl_flag: false,
            csv_flag: false,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn five_filing_registry() -> ScriptedLister {
        let mut days = BTreeMap::new();
        for (i, (m, d)) in [(2, 10), (4, 1), (6, 20), (9, 5), (11, 30)].iter().enumerate() {
            let date = day(2024, *m, *d);
            days.insert(date, vec![filing(&format!("S100DOC{}", i), date, "120")]);
        }
        ScriptedLister { days, fail_on: None }
    }

    fn annual_report_filter() -> FilingFilter {
        FilingFilter {
            edinet_code: None,
            sec_code: None,
            company_name: None,
            doc_type_codes: Some(vec!["120".to_string()]),
            start_date: day(2024, 1, 1),
            end_date: day(2024, 12, 31),
            order: SearchOrder::NewestFirst,
            max_count: None,
        }
    }

    #[tokio::test]
    async fn test_newest_first_max_count_returns_most_recent() {
        let lister = five_filing_registry();
        let filter = FilingFilter {
            max_count: Some(3),
            ..annual_report_filter()
        };

        let results = search_filings(&lister, &filter, None).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].doc_id, "S100DOC4");
        assert_eq!(results[1].doc_id, "S100DOC3");
        assert_eq!(results[2].doc_id, "S100DOC2");
    }

    #[tokio::test]
    async fn test_newest_first_dates_non_increasing() {
        let lister = five_filing_registry();
        let results = search_filings(&lister, &annual_report_filter(), None)
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        let dates: Vec<_> = results
            .iter()
            .map(|f| f.submit_date_time.clone().unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_oldest_first_dates_non_decreasing() {
        let lister = five_filing_registry();
        let filter = FilingFilter {
            order: SearchOrder::OldestFirst,
            ..annual_report_filter()
        };

        let results = search_filings(&lister, &filter, None).await.unwrap();

        assert_eq!(results.len(), 5);
        let dates: Vec<_> = results
            .iter()
            .map(|f| f.submit_date_time.clone().unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_no_matches_returns_empty_not_error() {
        let lister = five_filing_registry();
        let filter = FilingFilter {
            doc_type_codes: Some(vec!["180".to_string()]),
            ..annual_report_filter()
        };

        let results = search_filings(&lister, &filter, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let lister = five_filing_registry();
        let filter = FilingFilter {
            start_date: day(2024, 12, 31),
            end_date: day(2024, 1, 1),
            ..annual_report_filter()
        };

        let results = search_filings(&lister, &filter, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_day_failure_propagates() {
        let mut lister = five_filing_registry();
        lister.fail_on = Some(day(2024, 9, 5));

        let err = search_filings(&lister, &annual_report_filter(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Server { .. }));
    }

    #[tokio::test]
    async fn test_identity_filters() {
        let lister = five_filing_registry();
        let mut filter = annual_report_filter();
        filter.edinet_code = Some("E99999".to_string());
        let results = search_filings(&lister, &filter, None).await.unwrap();
        assert!(results.is_empty());

        let mut filter = annual_report_filter();
        filter.company_name = Some("Motor".to_string());
        let results = search_filings(&lister, &filter, None).await.unwrap();
        assert_eq!(results.len(), 5);
    }
}
