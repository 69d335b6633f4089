//! Choosing between synchronous and asynchronous OCR.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::{Config, ExtractionMethod};

/// Page objects (`/Type /Page`), excluding the page tree root (`/Type /Pages`).
static PAGE_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?-u)/Type\s*/Page\b").unwrap());

/// Pick the OCR method for a document.
///
/// Documents strictly under the sync size limit, with a page count at or
/// under `max_sync_pages` (or unknown), go synchronous. Everything else goes
/// asynchronous.
pub fn select_method(size_bytes: u64, page_count: Option<u32>, config: &Config) -> ExtractionMethod {
    if size_bytes >= config.sync_size_limit_bytes {
        return ExtractionMethod::Async;
    }
    match page_count {
        Some(pages) if pages > config.max_sync_pages => ExtractionMethod::Async,
        _ => ExtractionMethod::Sync,
    }
}

/// Cheap page count estimate from raw PDF bytes.
///
/// Counts page objects in the uncompressed object syntax. Returns `None` when
/// none are visible, e.g. when pages live inside compressed object streams.
pub fn sniff_page_count(bytes: &[u8]) -> Option<u32> {
    let count = PAGE_OBJECT_RE.find_iter(bytes).count();
    (count > 0).then(|| u32::try_from(count).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MB;

    #[test]
    fn size_boundary() {
        let config = Config::default();
        assert_eq!(select_method(5 * MB - 1, None, &config), ExtractionMethod::Sync);
        assert_eq!(select_method(5 * MB, None, &config), ExtractionMethod::Async);
        assert_eq!(select_method(0, None, &config), ExtractionMethod::Sync);
    }

    #[test]
    fn page_count_forces_async() {
        let config = Config::default();
        assert_eq!(select_method(1024, Some(1), &config), ExtractionMethod::Sync);
        assert_eq!(select_method(1024, Some(2), &config), ExtractionMethod::Async);
    }

    #[test]
    fn page_limit_is_configurable() {
        let config = Config {
            max_sync_pages: 10,
            ..Config::default()
        };
        assert_eq!(select_method(1024, Some(10), &config), ExtractionMethod::Sync);
        assert_eq!(select_method(1024, Some(11), &config), ExtractionMethod::Async);
    }

    #[test]
    fn sniffs_pages_but_not_page_tree() {
        let pdf = b"%PDF-1.4\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
                    2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
                    3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
                    4 0 obj <</Type/Page/Parent 2 0 R>> endobj\n%%EOF";
        assert_eq!(sniff_page_count(pdf), Some(2));
    }

    #[test]
    fn sniff_handles_binary_noise() {
        let mut pdf = b"%PDF-1.7\n".to_vec();
        pdf.extend_from_slice(&[0xff, 0xfe, 0x00, 0x80]);
        assert_eq!(sniff_page_count(&pdf), None);
        pdf.extend_from_slice(b"<< /Type /Page >>");
        assert_eq!(sniff_page_count(&pdf), Some(1));
    }
}
