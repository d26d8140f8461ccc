//! Format-specific handlers and the dispatcher that selects them.

mod api;
mod document;
mod feed;
mod html;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

pub use api::{ApiHandler, ApiSettings, FieldMapping};
pub use document::DocumentHandler;
pub use feed::FeedHandler;
pub use html::HtmlHandler;

use crate::models::{ScrapeMethod, ScrapeOutcome, Source, SourceType};
use crate::traits::{Enricher, Fetcher, TextExtractor};

/// Uniform contract of a format handler.
///
/// `scrape` never fails: internal errors are reported through
/// `ScrapeOutcome::error` with the handler's own method tag.
pub trait SourceHandler: Send + Sync {
    fn can_handle(&self, source: &Source) -> bool;

    fn scrape(&self, source: &Source) -> impl Future<Output = ScrapeOutcome> + Send;
}

/// Closed dispatch from source type to handler.
#[derive(Clone)]
pub struct Dispatcher<F, E, T>
where
    F: Fetcher,
    E: Enricher,
    T: TextExtractor,
{
    html: HtmlHandler<E>,
    api: ApiHandler<F>,
    feed: FeedHandler<F>,
    document: DocumentHandler<F, T>,
}

impl<F, E, T> Dispatcher<F, E, T>
where
    F: Fetcher,
    E: Enricher,
    T: TextExtractor,
{
    pub fn new(
        html: HtmlHandler<E>,
        api: ApiHandler<F>,
        feed: FeedHandler<F>,
        document: DocumentHandler<F, T>,
    ) -> Self {
        Self {
            html,
            api,
            feed,
            document,
        }
    }

    /// Runs the handler matching `source.source_type`.
    ///
    /// A panicking handler is reported as an error outcome.
    pub async fn dispatch(&self, source: &Source) -> ScrapeOutcome {
        tracing::debug!(source_id = %source.id, source_type = %source.source_type, "Dispatching source");

        let run = async {
            match source.source_type {
                SourceType::Html => self.html.scrape(source).await,
                SourceType::Api => self.api.scrape(source).await,
                SourceType::Feed => self.feed.scrape(source).await,
                SourceType::Document => self.document.scrape(source).await,
            }
        };

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(source_id = %source.id, error = %message, "Handler panicked");
                ScrapeOutcome::failure(ScrapeMethod::Error, format!("Handler panicked: {message}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
