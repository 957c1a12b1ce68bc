//! PDF text extraction cascade.
//!
//! Filings arrive as PDFs of wildly varying quality: clean born-digital
//! text, scanned page images, or complex layouts that defeat naive
//! extraction. The cascade tries strategies from cheapest to most
//! expensive and accepts the first output that passes the quality gate:
//!
//! 1. `pdftext` - structural text extraction from content streams
//! 2. `layout`  - the same text run through Markdown structuring
//! 3. `ocr`     - embedded page images through a local OCR engine
//! 4. `vision`  - embedded page images through the vision provider
//!
//! An explicitly requested strategy runs alone, with no fallback.

use crate::llm::LlmProvider;
use lopdf::{Dictionary, Document, Object};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Gate: minimum characters regardless of page count.
const MIN_TOTAL_CHARS: usize = 100;
/// Gate: minimum characters per processed page.
const MIN_CHARS_PER_PAGE: usize = 20;
/// Gate: maximum share of U+FFFD replacement characters, in percent.
const MAX_REPLACEMENT_PERCENT: usize = 1;

/// Prompt for the vision strategy, sent once per page image.
const VISION_PROMPT: &str = "You are an expert at extracting text and tables from document images. \
Transcribe this page of a corporate disclosure filing into Markdown. \
Rules: reproduce paragraphs and headings faithfully, render tables as \
Markdown tables, describe figures as [figure: description], skip page \
headers and footers, and keep names and figures exact. \
Output only the Markdown text, with no preamble.";

/// One extraction strategy, or automatic cascade selection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStrategy {
    /// Try each strategy in order until one passes the quality gate.
    #[default]
    Auto,
    /// Fast structural text extraction.
    #[value(name = "pdftext")]
    PdfText,
    /// Layout-aware Markdown conversion.
    Layout,
    /// OCR over embedded page images.
    Ocr,
    /// Vision-model extraction over embedded page images.
    Vision,
}

impl fmt::Display for ExtractStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractStrategy::Auto => "auto",
            ExtractStrategy::PdfText => "pdftext",
            ExtractStrategy::Layout => "layout",
            ExtractStrategy::Ocr => "ocr",
            ExtractStrategy::Vision => "vision",
        };
        write!(f, "{}", name)
    }
}

/// Result of one extraction attempt.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The strategy that produced the text. Never `Auto`.
    pub strategy: ExtractStrategy,
    /// Number of pages processed.
    pub pages: usize,
    /// Extracted text.
    pub text: String,
    /// Whether the output passed the quality gate.
    pub gate_passed: bool,
}

/// 1-based inclusive page bounds. Open ends cover the whole document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl PageRange {
    /// Resolve against the document's page count.
    fn clamp(&self, total: usize) -> Result<(usize, usize), String> {
        if total == 0 {
            return Err("document has no pages".to_string());
        }
        let start = self.start.unwrap_or(1);
        if start < 1 || start > total {
            return Err(format!(
                "start page {} out of range (document has {} pages)",
                start, total
            ));
        }
        let end = self.end.unwrap_or(total).min(total);
        if end < start {
            return Err(format!("end page {} is before start page {}", end, start));
        }
        Ok((start, end))
    }
}

/// Errors from the extraction cascade.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// One strategy failed (explicit mode, or internal to the cascade).
    #[error("{strategy} extraction failed: {message}")]
    Strategy {
        strategy: ExtractStrategy,
        message: String,
    },

    /// Every strategy in auto mode failed the gate or errored.
    #[error("all extraction strategies failed: {}", format_attempts(.attempts))]
    AllStrategiesFailed {
        /// Per-strategy errors, in cascade order.
        attempts: Vec<(ExtractStrategy, String)>,
    },
}

fn format_attempts(attempts: &[(ExtractStrategy, String)]) -> String {
    attempts
        .iter()
        .map(|(strategy, message)| format!("{}: {}", strategy, message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Quality gate for extraction output.
///
/// Accepts text that is non-empty, long enough for the page count, and
/// not riddled with decode artifacts.
pub fn passes_quality_gate(text: &str, pages: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    let chars = trimmed.chars().count();
    let min_len = MIN_TOTAL_CHARS.max(MIN_CHARS_PER_PAGE * pages);
    if chars < min_len {
        return false;
    }

    let replacements = trimmed.chars().filter(|c| *c == '\u{FFFD}').count();
    replacements * 100 < chars * MAX_REPLACEMENT_PERCENT.max(1)
}

/// The extraction cascade.
///
/// Stateless apart from its collaborators; safe to share across
/// concurrent parse tasks.
pub struct ExtractionCascade {
    vision: Option<Arc<dyn LlmProvider>>,
    ocr_command: String,
}

impl ExtractionCascade {
    pub fn new(vision: Option<Arc<dyn LlmProvider>>, ocr_command: impl Into<String>) -> Self {
        Self {
            vision,
            ocr_command: ocr_command.into(),
        }
    }

    /// Extract text from filing bytes.
    ///
    /// `Auto` walks the cascade; any other strategy runs alone and its
    /// failure surfaces directly. Page bounds apply to every strategy.
    pub async fn extract(
        &self,
        bytes: &[u8],
        strategy: ExtractStrategy,
        range: PageRange,
    ) -> Result<Extraction, ExtractError> {
        match strategy {
            ExtractStrategy::Auto => self.extract_auto(bytes, range).await,
            explicit => self.run_strategy(bytes, explicit, range).await,
        }
    }

    async fn extract_auto(
        &self,
        bytes: &[u8],
        range: PageRange,
    ) -> Result<Extraction, ExtractError> {
        let order = [
            ExtractStrategy::PdfText,
            ExtractStrategy::Layout,
            ExtractStrategy::Ocr,
            ExtractStrategy::Vision,
        ];

        let mut attempts = Vec::new();
        for strategy in order {
            match self.run_strategy(bytes, strategy, range).await {
                Ok(result) if result.gate_passed => {
                    info!(
                        "Extraction succeeded with {} ({} pages, {} chars)",
                        strategy,
                        result.pages,
                        result.text.len()
                    );
                    return Ok(result);
                }
                Ok(_) => {
                    debug!("{} output failed the quality gate", strategy);
                    attempts.push((strategy, "insufficient content".to_string()));
                }
                Err(ExtractError::Strategy { message, .. }) => {
                    debug!("{} failed: {}", strategy, message);
                    attempts.push((strategy, message));
                }
                Err(other) => return Err(other),
            }
        }

        Err(ExtractError::AllStrategiesFailed { attempts })
    }

    async fn run_strategy(
        &self,
        bytes: &[u8],
        strategy: ExtractStrategy,
        range: PageRange,
    ) -> Result<Extraction, ExtractError> {
        let outcome = match strategy {
            ExtractStrategy::PdfText => pdftext_extract(bytes, range),
            ExtractStrategy::Layout => layout_extract(bytes, range),
            ExtractStrategy::Ocr => self.ocr_extract(bytes, range).await,
            ExtractStrategy::Vision => self.vision_extract(bytes, range).await,
            ExtractStrategy::Auto => unreachable!("auto is resolved before dispatch"),
        };

        let (text, pages) = outcome.map_err(|message| ExtractError::Strategy {
            strategy,
            message,
        })?;

        let gate_passed = passes_quality_gate(&text, pages);
        Ok(Extraction {
            strategy,
            pages,
            text,
            gate_passed,
        })
    }

    /// OCR embedded page images with the configured engine.
    async fn ocr_extract(&self, bytes: &[u8], range: PageRange) -> Result<(String, usize), String> {
        let doc = load_document(bytes)?;
        let page_map = doc.get_pages();
        let (start, end) = range.clamp(page_map.len())?;

        let mut texts = Vec::new();
        let mut imaged_pages = 0;
        for page_no in start..=end {
            let Some(&page_id) = page_map.get(&(page_no as u32)) else {
                continue;
            };
            let Some(image) = dominant_page_image(&doc, page_id) else {
                continue;
            };
            imaged_pages += 1;

            let text = self.run_ocr_engine(&image.data).await?;
            texts.push(format!("## Page {}\n\n{}", page_no, text.trim()));
        }

        if imaged_pages == 0 {
            return Err("no embedded page images found".to_string());
        }
        Ok((texts.join("\n\n"), end - start + 1))
    }

    async fn run_ocr_engine(&self, image: &[u8]) -> Result<String, String> {
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| format!("failed to create temp image: {}", e))?;
        std::fs::write(tmp.path(), image)
            .map_err(|e| format!("failed to write temp image: {}", e))?;

        let output = tokio::process::Command::new(&self.ocr_command)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg("jpn+eng")
            .output()
            .await
            .map_err(|e| format!("ocr engine '{}' unavailable: {}", self.ocr_command, e))?;

        if !output.status.success() {
            return Err(format!(
                "ocr engine exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Send embedded page images to the vision provider, one per page.
    async fn vision_extract(
        &self,
        bytes: &[u8],
        range: PageRange,
    ) -> Result<(String, usize), String> {
        let provider = self
            .vision
            .as_ref()
            .ok_or_else(|| "vision provider not configured".to_string())?;

        let doc = load_document(bytes)?;
        let page_map = doc.get_pages();
        let (start, end) = range.clamp(page_map.len())?;

        let mut texts = Vec::new();
        let mut imaged_pages = 0;
        for page_no in start..=end {
            let Some(&page_id) = page_map.get(&(page_no as u32)) else {
                continue;
            };
            let Some(image) = dominant_page_image(&doc, page_id) else {
                continue;
            };
            imaged_pages += 1;

            let text = provider
                .complete_vision(VISION_PROMPT, &image.data, image.mime)
                .await
                .map_err(|e| e.to_string())?;
            texts.push(format!("## Page {}\n\n{}", page_no, text.trim()));
        }

        if imaged_pages == 0 {
            return Err("no embedded page images found".to_string());
        }
        Ok((texts.join("\n\n"), end - start + 1))
    }
}

/// Fast structural extraction: per-page content stream text.
fn pdftext_extract(bytes: &[u8], range: PageRange) -> Result<(String, usize), String> {
    let doc = load_document(bytes)?;
    let total = doc.get_pages().len();
    let (start, end) = range.clamp(total)?;

    let mut texts = Vec::new();
    for page_no in start..=end {
        let text = doc.extract_text(&[page_no as u32]).unwrap_or_default();
        texts.push(format!("## Page {}\n\n{}", page_no, text.trim()));
    }

    Ok((texts.join("\n\n"), end - start + 1))
}

/// Layout-aware extraction: structural text plus Markdown heuristics.
fn layout_extract(bytes: &[u8], range: PageRange) -> Result<(String, usize), String> {
    let doc = load_document(bytes)?;
    let total = doc.get_pages().len();
    let (start, end) = range.clamp(total)?;

    let mut texts = Vec::new();
    for page_no in start..=end {
        let text = doc.extract_text(&[page_no as u32]).unwrap_or_default();
        texts.push(format!(
            "## Page {}\n\n{}",
            page_no,
            structure_markdown(text.trim())
        ));
    }

    Ok((texts.join("\n\n"), end - start + 1))
}

/// Promote headings, normalize bullets, and fold aligned columns into
/// table rows.
fn structure_markdown(text: &str) -> String {
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        let trimmed = line.trim();

        if trimmed.is_empty() {
            out.push(String::new());
        } else if looks_like_heading(trimmed) {
            out.push(format!("### {}", trimmed));
        } else if let Some(rest) = bullet_text(trimmed) {
            out.push(format!("- {}", rest));
        } else if let Some(row) = table_row(trimmed) {
            out.push(row);
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

/// Section headings in filings are short numbered or bracketed lines.
fn looks_like_heading(line: &str) -> bool {
    if line.chars().count() > 40 || line.ends_with('。') || line.ends_with('.') {
        return false;
    }

    let numbered = line
        .split_once(&['.', '．'][..])
        .map(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    let bracketed = line.starts_with('【') && line.ends_with('】');
    let article = line.starts_with('第')
        && line.chars().nth(1).map(|c| c.is_numeric()).unwrap_or(false);

    numbered || bracketed || article
}

fn bullet_text(line: &str) -> Option<&str> {
    line.strip_prefix('・')
        .or_else(|| line.strip_prefix('•'))
        .map(str::trim)
}

/// Fold a line with three or more space-separated columns into a
/// Markdown table row.
fn table_row(line: &str) -> Option<String> {
    let cells: Vec<&str> = line
        .split("  ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if cells.len() >= 3 {
        Some(format!("| {} |", cells.join(" | ")))
    } else {
        None
    }
}

fn load_document(bytes: &[u8]) -> Result<Document, String> {
    Document::load_mem(bytes).map_err(|e| format!("failed to parse PDF: {}", e))
}

/// The largest embedded image on a page, with its mime type.
struct PageImage {
    data: Vec<u8>,
    mime: &'static str,
}

/// Scanned filings carry one full-page image per page; pick the
/// largest image XObject as that page's rendition.
fn dominant_page_image(doc: &Document, page_id: (u32, u16)) -> Option<PageImage> {
    let page_dict = doc.get_dictionary(page_id).ok()?;
    let resources = resolve_dict(doc, page_dict.get(b"Resources").ok()?)?;
    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok()?)?;

    let mut best: Option<PageImage> = None;
    for (_name, entry) in xobjects.iter() {
        let stream = match resolve(doc, entry) {
            Object::Stream(s) => s,
            _ => continue,
        };

        let is_image =
            matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == b"Image");
        if !is_image {
            continue;
        }

        let mime = if has_filter(doc, &stream.dict, b"DCTDecode") {
            "image/jpeg"
        } else if has_filter(doc, &stream.dict, b"JPXDecode") {
            "image/jp2"
        } else {
            // Raw or Flate-coded bitmaps need a renderer; skip them.
            warn!("Skipping page image with unsupported filter");
            continue;
        };

        if best
            .as_ref()
            .map(|b| stream.content.len() > b.data.len())
            .unwrap_or(true)
        {
            best = Some(PageImage {
                data: stream.content.clone(),
                mime,
            });
        }
    }

    best
}

fn has_filter(doc: &Document, dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter").map(|f| resolve(doc, f)) {
        Ok(Object::Name(name)) => name.as_slice() == filter,
        Ok(Object::Array(names)) => names
            .iter()
            .any(|n| matches!(n, Object::Name(name) if name.as_slice() == filter)),
        _ => false,
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Test helper: build a small single-page PDF carrying repeated lines
/// of text. Shared with the pipeline tests.
#[cfg(test)]
pub(crate) fn sample_pdf(line: &str, repeats: usize) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![50.into(), 750.into()]),
    ];
    for _ in 0..repeats {
        operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade() -> ExtractionCascade {
        ExtractionCascade::new(None, "tesseract")
    }

    #[test]
    fn test_quality_gate_rejects_empty_and_short() {
        assert!(!passes_quality_gate("", 1));
        assert!(!passes_quality_gate("   \n  ", 1));
        assert!(!passes_quality_gate("too short", 1));
    }

    #[test]
    fn test_quality_gate_scales_with_pages() {
        let text = "a".repeat(150);
        assert!(passes_quality_gate(&text, 1));
        // 150 chars over 10 pages is below 20 chars/page.
        assert!(!passes_quality_gate(&text, 10));
        let text = "a".repeat(250);
        assert!(passes_quality_gate(&text, 10));
    }

    #[test]
    fn test_quality_gate_rejects_decode_artifacts() {
        let clean = "substantive filing text ".repeat(10);
        assert!(passes_quality_gate(&clean, 1));

        let garbled = format!("{}{}", clean, "\u{FFFD}".repeat(50));
        assert!(!passes_quality_gate(&garbled, 1));
    }

    #[test]
    fn test_page_range_clamp() {
        let full = PageRange::default();
        assert_eq!(full.clamp(10).unwrap(), (1, 10));

        let bounded = PageRange {
            start: Some(3),
            end: Some(20),
        };
        assert_eq!(bounded.clamp(10).unwrap(), (3, 10));

        assert!(PageRange {
            start: Some(11),
            end: None
        }
        .clamp(10)
        .is_err());
        assert!(full.clamp(0).is_err());
        assert!(PageRange {
            start: Some(5),
            end: Some(2)
        }
        .clamp(10)
        .is_err());
    }

    #[test]
    fn test_structure_markdown_heuristics() {
        assert_eq!(structure_markdown("1. Business Overview"), "### 1. Business Overview");
        assert_eq!(structure_markdown("【事業等のリスク】"), "### 【事業等のリスク】");
        assert_eq!(structure_markdown("・主力製品の販売"), "- 主力製品の販売");
        assert_eq!(
            structure_markdown("売上高  1,234  1,456"),
            "| 売上高 | 1,234 | 1,456 |"
        );
        // Plain prose passes through untouched.
        let prose = "The group operates in multiple regions.";
        assert_eq!(structure_markdown(prose), prose);
    }

    #[tokio::test]
    async fn test_auto_prefers_cheapest_passing_strategy() {
        let bytes = sample_pdf("This line is part of a disclosure document body.", 20);
        let result = cascade()
            .extract(&bytes, ExtractStrategy::Auto, PageRange::default())
            .await
            .unwrap();

        // pdftext passes the gate, so no later strategy runs.
        assert_eq!(result.strategy, ExtractStrategy::PdfText);
        assert!(result.gate_passed);
        assert_eq!(result.pages, 1);
        assert!(result.text.contains("disclosure document body"));
    }

    #[tokio::test]
    async fn test_explicit_strategy_is_idempotent() {
        let bytes = sample_pdf("Identical content every run.", 15);
        let first = cascade()
            .extract(&bytes, ExtractStrategy::PdfText, PageRange::default())
            .await
            .unwrap();
        let second = cascade()
            .extract(&bytes, ExtractStrategy::PdfText, PageRange::default())
            .await
            .unwrap();

        assert_eq!(first.strategy, second.strategy);
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn test_auto_failure_carries_ordered_error_chain() {
        let err = cascade()
            .extract(b"not a pdf at all", ExtractStrategy::Auto, PageRange::default())
            .await
            .unwrap_err();

        match err {
            ExtractError::AllStrategiesFailed { attempts } => {
                let order: Vec<ExtractStrategy> = attempts.iter().map(|(s, _)| *s).collect();
                assert_eq!(
                    order,
                    vec![
                        ExtractStrategy::PdfText,
                        ExtractStrategy::Layout,
                        ExtractStrategy::Ocr,
                        ExtractStrategy::Vision,
                    ]
                );
                // Vision fails for want of a provider, not a parse error.
                assert!(attempts[3].1.contains("not configured"));
            }
            other => panic!("expected AllStrategiesFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_failure_surfaces_directly() {
        let err = cascade()
            .extract(b"garbage", ExtractStrategy::Layout, PageRange::default())
            .await
            .unwrap_err();

        match err {
            ExtractError::Strategy { strategy, .. } => {
                assert_eq!(strategy, ExtractStrategy::Layout);
            }
            other => panic!("expected Strategy error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vision_without_provider_errors() {
        let bytes = sample_pdf("text", 1);
        let err = cascade()
            .extract(&bytes, ExtractStrategy::Vision, PageRange::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vision provider not configured"));
    }
}
