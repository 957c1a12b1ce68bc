//! Cache index over the download directory.
//!
//! There is no persisted index: every lookup is a recursive scan that
//! parses discovered paths against the download convention. An entry
//! is only ever as fresh as the scan that found it: if the file is
//! gone, the scan will not return it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One cached document, with metadata parsed from its path.
///
/// Each metadata field is parsed independently; a malformed segment
/// leaves its field unset rather than invalidating the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Document id taken from the file stem.
    pub doc_id: String,
    /// Securities code from the issuer folder.
    pub sec_code: Option<String>,
    /// Issuer name from the issuer folder.
    pub company_name: Option<String>,
    /// Document type code from the type folder.
    pub doc_type_code: Option<String>,
    /// Reporting period (YYYYMM) from the period folder.
    pub period: Option<String>,
    /// Full path to the cached file.
    pub path: PathBuf,
}

impl CacheEntry {
    /// Parse an entry from a cached file path.
    ///
    /// Expects `.../{sec}_{name}/{type}_{typename}/{YYYYMM}/{doc_id}.{ext}`
    /// but tolerates any deviation by leaving fields unset.
    pub fn from_path(path: &Path) -> Self {
        let doc_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();

        let mut sec_code = None;
        let mut company_name = None;
        let mut doc_type_code = None;
        let mut period = None;

        if components.len() >= 4 {
            let period_folder = &components[components.len() - 2];
            if period_folder.len() == 6 && period_folder.chars().all(|c| c.is_ascii_digit()) {
                period = Some(period_folder.clone());
            }

            let type_folder = &components[components.len() - 3];
            if let Some((code, _)) = type_folder.split_once('_') {
                if !code.is_empty() {
                    doc_type_code = Some(code.to_string());
                }
            }

            let company_folder = &components[components.len() - 4];
            if let Some((code, name)) = company_folder.split_once('_') {
                if !code.is_empty() {
                    sec_code = Some(code.to_string());
                }
                if !name.is_empty() {
                    company_name = Some(name.to_string());
                }
            }
        }

        Self {
            doc_id,
            sec_code,
            company_name,
            doc_type_code,
            period,
            path: path.to_path_buf(),
        }
    }
}

/// Aggregate statistics over the cache contents.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_documents: usize,
    pub total_issuers: usize,
    /// Document counts keyed by securities code.
    pub by_issuer: HashMap<String, usize>,
    /// Document counts keyed by document type code.
    pub by_type: HashMap<String, usize>,
}

/// Read-only index over the download directory.
///
/// Writes never happen here; placement into the convention is the
/// download command's job via [`crate::cache::build_download_path`].
pub struct CacheIndex {
    root: PathBuf,
}

impl CacheIndex {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Find a cached document by its id, scanning the whole hierarchy.
    pub fn find_by_doc_id(&self, doc_id: &str) -> Option<CacheEntry> {
        for entry in self.scan() {
            if entry.doc_id == doc_id {
                info!("Cache hit for {}: {}", doc_id, entry.path.display());
                return Some(entry);
            }
        }
        debug!("Cache miss for {}", doc_id);
        None
    }

    /// List cached documents matching the given criteria.
    pub fn find_by_filter(
        &self,
        sec_code: Option<&str>,
        doc_type_code: Option<&str>,
        period: Option<&str>,
    ) -> Vec<CacheEntry> {
        self.scan()
            .into_iter()
            .filter(|entry| {
                sec_code.map_or(true, |c| entry.sec_code.as_deref() == Some(c))
                    && doc_type_code.map_or(true, |c| entry.doc_type_code.as_deref() == Some(c))
                    && period.map_or(true, |p| entry.period.as_deref() == Some(p))
            })
            .collect()
    }

    /// List every cached document.
    pub fn list_all(&self) -> Vec<CacheEntry> {
        self.scan()
    }

    /// Compute aggregate statistics over all entries.
    pub fn stats(&self) -> CacheStats {
        let entries = self.scan();
        let mut stats = CacheStats {
            total_documents: entries.len(),
            ..Default::default()
        };

        for entry in &entries {
            let issuer = entry.sec_code.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.by_issuer.entry(issuer).or_insert(0) += 1;

            let doc_type = entry
                .doc_type_code
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_type.entry(doc_type).or_insert(0) += 1;
        }

        stats.total_issuers = stats
            .by_issuer
            .keys()
            .filter(|k| k.as_str() != "unknown")
            .count();
        stats
    }

    fn scan(&self) -> Vec<CacheEntry> {
        if !self.root.exists() {
            debug!("Cache root does not exist: {}", self.root.display());
            return Vec::new();
        }

        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| CacheEntry::from_path(e.path()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::path::build_download_path;
    use std::fs;
    use tempfile::TempDir;

    fn write_cached(root: &Path, relative: &Path) {
        let full = root.join(relative);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, b"%PDF-1.7 stub").unwrap();
    }

    #[test]
    fn test_empty_directory_scans_to_nothing() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::new(dir.path().to_path_buf());

        assert!(index.list_all().is_empty());
        assert!(index.find_by_doc_id("S100ABCD").is_none());

        let stats = index.stats();
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.total_issuers, 0);
        assert!(stats.by_issuer.is_empty());
        assert!(stats.by_type.is_empty());
    }

    #[test]
    fn test_missing_directory_scans_to_nothing() {
        let index = CacheIndex::new(PathBuf::from("/nonexistent/edinsight-cache"));
        assert!(index.list_all().is_empty());
    }

    #[test]
    fn test_path_round_trip() {
        let built = build_download_path(
            Path::new("downloads"),
            Some("72030"),
            Some("トヨタ自動車株式会社"),
            Some("120"),
            Some("2025-03-31"),
            "S100ABCD",
            "pdf",
        );

        let entry = CacheEntry::from_path(&built);
        assert_eq!(entry.doc_id, "S100ABCD");
        assert_eq!(entry.sec_code.as_deref(), Some("72030"));
        assert_eq!(entry.company_name.as_deref(), Some("トヨタ自動車株式会社"));
        assert_eq!(entry.doc_type_code.as_deref(), Some("120"));
        assert_eq!(entry.period.as_deref(), Some("202503"));

        // Parsed fields rebuild the identical path.
        let period = entry.period.unwrap();
        let rebuilt = build_download_path(
            Path::new("downloads"),
            entry.sec_code.as_deref(),
            entry.company_name.as_deref(),
            entry.doc_type_code.as_deref(),
            Some(&format!("{}-{}", &period[..4], &period[4..])),
            &entry.doc_id,
            "pdf",
        );
        assert_eq!(rebuilt, built);
    }

    #[test]
    fn test_malformed_segments_leave_fields_unset() {
        let entry = CacheEntry::from_path(Path::new(
            "downloads/nounderscore/alsonone/notaperiod/S100WXYZ.pdf",
        ));
        assert_eq!(entry.doc_id, "S100WXYZ");
        assert!(entry.sec_code.is_none());
        assert!(entry.doc_type_code.is_none());
        assert!(entry.period.is_none());

        // Too shallow to carry any hierarchy metadata.
        let entry = CacheEntry::from_path(Path::new("S100WXYZ.pdf"));
        assert_eq!(entry.doc_id, "S100WXYZ");
        assert!(entry.sec_code.is_none());
    }

    #[test]
    fn test_find_by_doc_id_and_filter() {
        let dir = TempDir::new().unwrap();
        write_cached(
            dir.path(),
            Path::new("72030_ExampleMotor/120_有価証券報告書/202503/S100AAAA.pdf"),
        );
        write_cached(
            dir.path(),
            Path::new("72030_ExampleMotor/140_四半期報告書/202406/S100BBBB.pdf"),
        );
        write_cached(
            dir.path(),
            Path::new("67580_ExampleElectric/120_有価証券報告書/202503/S100CCCC.pdf"),
        );

        let index = CacheIndex::new(dir.path().to_path_buf());

        let hit = index.find_by_doc_id("S100BBBB").unwrap();
        assert_eq!(hit.doc_type_code.as_deref(), Some("140"));
        assert_eq!(hit.period.as_deref(), Some("202406"));
        assert!(hit.path.exists());

        assert!(index.find_by_doc_id("S100ZZZZ").is_none());

        let annual = index.find_by_filter(None, Some("120"), None);
        assert_eq!(annual.len(), 2);

        let toyota_annual = index.find_by_filter(Some("72030"), Some("120"), None);
        assert_eq!(toyota_annual.len(), 1);
        assert_eq!(toyota_annual[0].doc_id, "S100AAAA");
    }

    #[test]
    fn test_stats_counts_per_issuer_and_type() {
        let dir = TempDir::new().unwrap();
        write_cached(
            dir.path(),
            Path::new("72030_ExampleMotor/120_有価証券報告書/202503/S100AAAA.pdf"),
        );
        write_cached(
            dir.path(),
            Path::new("72030_ExampleMotor/140_四半期報告書/202406/S100BBBB.pdf"),
        );
        write_cached(
            dir.path(),
            Path::new("67580_ExampleElectric/120_有価証券報告書/202503/S100CCCC.pdf"),
        );

        let index = CacheIndex::new(dir.path().to_path_buf());
        let stats = index.stats();

        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_issuers, 2);
        assert_eq!(stats.by_issuer.get("72030"), Some(&2));
        assert_eq!(stats.by_issuer.get("67580"), Some(&1));
        assert_eq!(stats.by_type.get("120"), Some(&2));
        assert_eq!(stats.by_type.get("140"), Some(&1));
    }
}
