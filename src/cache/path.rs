//! Download-path convention.
//!
//! Cached documents are placed at
//! `{sec_code}_{filer_name}/{doc_type_code}_{doc_type_name}/{YYYYMM}/{doc_id}.{ext}`
//! below the cache root. The cache index parses this layout back, so
//! the format here must not change.

use crate::models::doc_type_name;
use std::path::{Path, PathBuf};

/// Sanitize a string for use as a path segment.
///
/// Filesystem-invalid characters become underscores, runs of
/// underscores collapse, and empty or missing input falls back to
/// "unknown".
pub fn sanitize_component(name: Option<&str>) -> String {
    let Some(name) = name else {
        return "unknown".to_string();
    };

    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.trim().chars() {
        let invalid = matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            || (c as u32) < 0x20;
        if invalid || c == '_' {
            if !last_underscore {
                out.push('_');
                last_underscore = true;
            }
        } else {
            out.push(c);
            last_underscore = false;
        }
    }

    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed
    }
}

/// Convert a `YYYY-MM-DD` period end into the `YYYYMM` folder name.
pub fn period_to_yyyymm(period_end: Option<&str>) -> String {
    let Some(period_end) = period_end else {
        return "unknown".to_string();
    };

    let mut parts = period_end.split('-');
    match (parts.next(), parts.next()) {
        (Some(year), Some(month)) if !year.is_empty() && !month.is_empty() => {
            format!("{}{}", year, month)
        }
        _ => "unknown".to_string(),
    }
}

/// Build the conventional download path for a document.
pub fn build_download_path(
    base_dir: &Path,
    sec_code: Option<&str>,
    filer_name: Option<&str>,
    doc_type_code: Option<&str>,
    period_end: Option<&str>,
    doc_id: &str,
    extension: &str,
) -> PathBuf {
    let company_folder = format!(
        "{}_{}",
        sec_code.unwrap_or("unknown"),
        sanitize_component(filer_name)
    );
    let doc_type_folder = format!(
        "{}_{}",
        doc_type_code.unwrap_or("unknown"),
        doc_type_name(doc_type_code)
    );
    let period_folder = period_to_yyyymm(period_end);

    base_dir
        .join(company_folder)
        .join(doc_type_folder)
        .join(period_folder)
        .join(format!("{}.{}", doc_id, extension))
}
