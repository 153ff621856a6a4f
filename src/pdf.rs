use std::path::Path;

use lopdf::Document;

use crate::apis::SourceError;

/// Extract the text of every page of a PDF, skipping pages that fail to decode.
pub async fn extract_text(pdf_path: &Path) -> Result<String, SourceError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_text_blocking(&path))
        .await
        .map_err(|e| SourceError::PdfExtraction(format!("extraction task failed: {e}")))?
}

fn extract_text_blocking(pdf_path: &Path) -> Result<String, SourceError> {
    let document = Document::load(pdf_path).map_err(|err| {
        SourceError::PdfExtraction(format!("failed to open {}: {err}", pdf_path.display()))
    })?;

    let mut text = String::new();
    for page in document.get_pages().keys().copied() {
        match document.extract_text(&[page]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(err) => {
                tracing::warn!("Failed to extract text from page {} of {}: {}", page, pdf_path.display(), err);
            }
        }
    }
    Ok(text.trim().to_string())
}
