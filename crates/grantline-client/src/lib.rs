pub mod document;
pub mod enricher;
pub mod fetcher;

pub use document::PdfTextExtractor;
pub use enricher::{DataServiceEnricher, EnrichmentConfig};
pub use fetcher::ReqwestFetcher;
