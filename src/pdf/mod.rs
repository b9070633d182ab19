//! PDF parsing: lazy per-page text extraction plus document metadata.
//!
//! The parser never forces full-document extraction up front. Pages are
//! extracted on first access and cached for the document's lifetime, so
//! the common case — an embedded outline answering everything within the
//! first few dozen pages — stays cheap even for very large files.

mod outline;
mod text;

pub use outline::OutlineEntry;

use crate::document::Page;
use crate::error::{Result, TreeIndexError};
use lopdf::{Document, Object};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Lazily-parsing PDF reader.
pub struct PdfParser {
    doc: Document,
    bytes: Vec<u8>,
    source_name: String,
    total_pages: usize,
    /// Page cache, indexed by physical_index - 1.
    cache: Mutex<Vec<Option<Arc<Page>>>>,
    /// Layout-aware backend output, computed at most once.
    fallback_pages: OnceLock<Option<Vec<String>>>,
}

impl PdfParser {
    /// Open a PDF from the filesystem.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| TreeIndexError::io(path, e))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        Self::from_bytes(bytes, name).map_err(|e| match e {
            TreeIndexError::UnreadablePdf { reason, .. } => TreeIndexError::UnreadablePdf {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Open a PDF from an in-memory byte stream.
    pub fn from_bytes(bytes: Vec<u8>, source_name: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();
        let doc = Document::load_mem(&bytes).map_err(|e| TreeIndexError::UnreadablePdf {
            path: source_name.clone().into(),
            reason: e.to_string(),
        })?;
        let total_pages = doc.get_pages().len();
        if total_pages == 0 {
            return Err(TreeIndexError::UnreadablePdf {
                path: source_name.clone().into(),
                reason: "document contains no pages".to_string(),
            });
        }

        Ok(Self {
            doc,
            bytes,
            source_name,
            total_pages,
            cache: Mutex::new(vec![None; total_pages]),
            fallback_pages: OnceLock::new(),
        })
    }

    /// Name of the source (file stem or caller-supplied stream name).
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Total page count.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Document title from the Info dictionary, if present.
    pub fn document_title(&self) -> Option<String> {
        let info_ref = match self.doc.trailer.get(b"Info") {
            Ok(Object::Reference(r)) => *r,
            _ => return None,
        };
        let info = self.doc.get_dictionary(info_ref).ok()?;
        match info.get(b"Title") {
            Ok(Object::String(bytes, _)) => {
                let title = String::from_utf8_lossy(bytes).trim().to_string();
                if title.is_empty() { None } else { Some(title) }
            }
            _ => None,
        }
    }

    /// Get a page, extracting and caching it on first access.
    ///
    /// Out-of-range indices and unreadable pages both yield a page with
    /// an empty text body; the pipeline continues either way.
    pub fn page(&self, physical_index: usize) -> Arc<Page> {
        if physical_index == 0 || physical_index > self.total_pages {
            return Arc::new(Page::new(physical_index, String::new()));
        }

        {
            let cache = self.cache.lock().expect("page cache poisoned");
            if let Some(page) = &cache[physical_index - 1] {
                return Arc::clone(page);
            }
        }

        let body = self.extract_page_text(physical_index);
        let page = Arc::new(Page::new(physical_index, body));

        let mut cache = self.cache.lock().expect("page cache poisoned");
        cache[physical_index - 1] = Some(Arc::clone(&page));
        page
    }

    /// Parse pages 1..=first_n, returning them in order.
    pub fn parse_initial(&self, first_n: usize) -> Vec<Arc<Page>> {
        let end = first_n.min(self.total_pages);
        (1..=end).map(|n| self.page(n)).collect()
    }

    /// Guarantee every page is parsed and cached.
    pub fn parse_all(&self) -> Vec<Arc<Page>> {
        (1..=self.total_pages).map(|n| self.page(n)).collect()
    }

    /// Flat `(level, title, page)` outline entries, or empty.
    pub fn embedded_outline(&self) -> Vec<OutlineEntry> {
        outline::extract_outline(&self.doc)
    }

    /// Rough token count for an inclusive page range, for prompt budgeting.
    pub fn token_estimate(&self, start: usize, end: usize) -> usize {
        let start = start.max(1);
        let end = end.min(self.total_pages);
        (start..=end).map(|n| self.page(n).token_estimate).sum()
    }

    /// Concatenated sentinel-wrapped text for an inclusive page range.
    pub fn tagged_range(&self, start: usize, end: usize) -> String {
        let start = start.max(1);
        let end = end.min(self.total_pages);
        (start..=end).map(|n| self.page(n).tagged()).collect()
    }

    /// Concatenated raw text for an inclusive page range, without sentinels.
    pub fn text_range(&self, start: usize, end: usize) -> String {
        let start = start.max(1);
        let end = end.min(self.total_pages);
        (start..=end)
            .map(|n| self.page(n).text.clone())
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string()
    }

    /// Backend chain for one page: lopdf first (cheap, lazy, quality
    /// gated), then the cached layout-aware pass. The fallback always
    /// succeeds but may yield noisy text, so its output is accepted
    /// unconditionally; a page is empty only when the fallback produced
    /// nothing for that index at all.
    fn extract_page_text(&self, physical_index: usize) -> String {
        if let Some(text) = text::extract_page_lopdf(&self.doc, physical_index as u32) {
            return text;
        }

        let fallback = self
            .fallback_pages
            .get_or_init(|| {
                debug!("running layout-aware extraction backend for whole document");
                text::extract_all_pdf_extract(&self.bytes)
            })
            .as_ref();

        if let Some(pages) = fallback {
            if let Some(text) = pages.get(physical_index - 1) {
                return text.clone();
            }
        }

        debug!(page = physical_index, "no backend produced text; page left empty");
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, dictionary};

    /// Build a minimal single-font PDF with one text line per page.
    fn make_pdf(page_lines: &[&str]) -> Vec<u8> {
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

        let mut kids: Vec<Object> = Vec::new();
        for line in page_lines {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_parser_page_count_and_text() {
        let bytes = make_pdf(&["Introduction to the topic", "Conclusions and outlook"]);
        let parser = PdfParser::from_bytes(bytes, "sample").unwrap();

        assert_eq!(parser.total_pages(), 2);
        assert_eq!(parser.source_name(), "sample");

        let first = parser.page(1);
        assert!(first.text.contains("Introduction"));
        let second = parser.page(2);
        assert!(second.text.contains("Conclusions"));
    }

    #[test]
    fn test_parser_out_of_range_page_is_empty() {
        let bytes = make_pdf(&["Only page"]);
        let parser = PdfParser::from_bytes(bytes, "one").unwrap();
        assert!(parser.page(0).is_blank());
        assert!(parser.page(5).is_blank());
    }

    #[test]
    fn test_tagged_range_carries_sentinels() {
        let bytes = make_pdf(&["Alpha section", "Beta section"]);
        let parser = PdfParser::from_bytes(bytes, "tags").unwrap();

        let tagged = parser.tagged_range(1, 2);
        assert!(tagged.contains("<physical_index_1>"));
        assert!(tagged.contains("</physical_index_1>"));
        assert!(tagged.contains("<physical_index_2>"));
        // Raw range carries no markers.
        let raw = parser.text_range(1, 2);
        assert!(!raw.contains("physical_index"));
    }

    #[test]
    fn test_parse_initial_is_bounded() {
        let bytes = make_pdf(&["One", "Two", "Three"]);
        let parser = PdfParser::from_bytes(bytes, "bounded").unwrap();
        let window = parser.parse_initial(2);
        assert_eq!(window.len(), 2);
        let all = parser.parse_all();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_token_estimate_positive_for_text_pages() {
        let bytes = make_pdf(&["several words of page text here"]);
        let parser = PdfParser::from_bytes(bytes, "tokens").unwrap();
        assert!(parser.token_estimate(1, 1) > 0);
    }

    #[test]
    fn test_invalid_bytes_are_unreadable() {
        let result = PdfParser::from_bytes(b"not a pdf".to_vec(), "junk");
        assert!(result.is_err());
    }

    #[test]
    fn test_no_embedded_outline() {
        let bytes = make_pdf(&["Page without bookmarks"]);
        let parser = PdfParser::from_bytes(bytes, "plain").unwrap();
        assert!(parser.embedded_outline().is_empty());
    }
}
