use std::panic::{AssertUnwindSafe, catch_unwind};

use grantline_core::error::AppError;
use grantline_core::traits::TextExtractor;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Extracts text from PDF documents; anything else is read as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, AppError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }

        // pdf-extract panics on some malformed inputs
        match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AppError::ParseError(format!("PDF extraction failed: {e}"))),
            Err(_) => Err(AppError::ParseError(
                "PDF extraction failed: malformed document".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let text = PdfTextExtractor
            .extract_text("Rural Innovation Call\nOpen to cooperatives".as_bytes())
            .unwrap();
        assert_eq!(text, "Rural Innovation Call\nOpen to cooperatives");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let text = PdfTextExtractor.extract_text(&[b'o', b'k', 0xFF]).unwrap();
        assert!(text.starts_with("ok"));
    }

    #[test]
    fn test_truncated_pdf_is_parse_error() {
        let err = PdfTextExtractor.extract_text(b"%PDF-1.7\n1 0 obj").unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }
}
