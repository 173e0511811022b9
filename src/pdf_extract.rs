// src/pdf_extract.rs

use lopdf::Document;
use tracing::{debug, info, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Below this many non-whitespace characters a PDF has no usable text layer.
const MIN_TEXT_CHARS: usize = 30;

/// What a local look at an attachment found before it goes to OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfContent {
    /// Embedded text is present.
    TextLayer { pages: usize, chars: usize },
    /// Image-only pages; OCR is the only way in.
    Scanned { pages: usize },
    /// lopdf could not load the document.
    Unreadable(String),
}

/// Attachments are only processed when they start with the PDF header.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Classify an attachment for logging. Never blocks processing.
pub fn inspect_pdf(bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(bytes) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "PDF could not be loaded locally");
            return PdfContent::Unreadable(e.to_string());
        }
    };

    let pages = doc.get_pages().len();
    if image_only_ratio(&doc) >= 0.8 {
        info!(pages, "PDF looks scanned");
        return PdfContent::Scanned { pages };
    }

    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            let chars = text.chars().filter(|c| !c.is_whitespace()).count();
            if chars < MIN_TEXT_CHARS {
                info!(pages, chars, "PDF text layer too thin, treating as scanned");
                PdfContent::Scanned { pages }
            } else {
                info!(pages, chars, "PDF has a text layer");
                PdfContent::TextLayer { pages, chars }
            }
        }
        Err(e) => {
            debug!(error = %e, "pdf-extract found no text");
            PdfContent::Scanned { pages }
        }
    }
}

/// [`inspect_pdf`] on the blocking pool. A panic inside the PDF parsers
/// becomes [`PdfContent::Unreadable`] instead of unwinding the caller.
pub async fn inspect_pdf_blocking(bytes: Vec<u8>) -> PdfContent {
    match tokio::task::spawn_blocking(move || inspect_pdf(&bytes)).await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = %e, "PDF inspection aborted");
            PdfContent::Unreadable(format!("inspection aborted: {e}"))
        }
    }
}

/// Share of pages that carry XObject images but no fonts.
fn image_only_ratio(doc: &Document) -> f64 {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return 0.0;
    }

    let resource = |page: &lopdf::Dictionary, name: &[u8]| -> bool {
        page.get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .and_then(|res| res.get(name).ok())
            .and_then(|o| doc.dereference(o).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|d| !d.is_empty())
    };

    let image_only = pages
        .values()
        .filter_map(|id| doc.get_object(*id).ok())
        .filter_map(|obj| obj.as_dict().ok())
        .filter(|page| resource(page, b"XObject") && !resource(page, b"Font"))
        .count();

    image_only as f64 / pages.len() as f64
}
