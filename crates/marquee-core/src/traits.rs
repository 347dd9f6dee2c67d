use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extractor::CandidateSink;
use crate::models::{FetchedImage, InsertOutcome, NewImage, NewSyncRun, SyncRun, Venue};
use crate::venues::VenueConfig;

/// Text pulled from near a matched node: the first `selector` match inside
/// the node's closest ancestor matching `closest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedText {
    #[serde(default = "default_closest")]
    pub closest: String,
    pub selector: String,
}

fn default_closest() -> String {
    "div, article, section, a".to_string()
}

impl RelatedText {
    pub fn new(closest: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            closest: closest.into(),
            selector: selector.into(),
        }
    }

    /// Search the default card-like ancestors (`div, article, section, a`).
    pub fn nearby(selector: impl Into<String>) -> Self {
        Self {
            closest: default_closest(),
            selector: selector.into(),
        }
    }
}

/// What `extract_all` should read from every node matching `selector`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeQuery {
    pub selector: String,
    pub attributes: Vec<String>,
    pub related: Vec<RelatedText>,
}

impl NodeQuery {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn with_attributes(mut self, attrs: &[&str]) -> Self {
        self.attributes = attrs.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_related(mut self, related: impl IntoIterator<Item = RelatedText>) -> Self {
        self.related = related.into_iter().collect();
        self
    }
}

/// One matched DOM node as seen by an extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DomNode {
    /// Requested attributes that are present on the node.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: String,
    /// One entry per [`NodeQuery::related`], in the same order.
    #[serde(default)]
    pub related: Vec<Option<String>>,
}

impl DomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn related_text(&self, index: usize) -> Option<String> {
        self.related.get(index).cloned().flatten()
    }
}

/// Launches browsing sessions over JavaScript-rendered pages.
pub trait Browser: Send + Sync {
    type Session: BrowserSession;

    fn open_session(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// One page-browsing session, used serially by a single venue.
///
/// Every operation is bounded by a timeout and fails with
/// `Navigation`/`Timeout`/`SelectorNotFound` rather than hanging.
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn click(&mut self, selector: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scroll to the bottom of the page to trigger lazy loading.
    fn scroll_to_bottom(&mut self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn extract_all(
        &mut self,
        query: &NodeQuery,
    ) -> impl Future<Output = Result<Vec<DomNode>, AppError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Produces the candidate images of one venue.
///
/// Candidates are pushed into the sink as they are found; an `Err` ends
/// the stream early but leaves every candidate already pushed valid.
pub trait CandidateExtractor: Send + Sync {
    fn venue(&self) -> &VenueConfig;

    fn extract<S: BrowserSession>(
        &self,
        session: &mut S,
        sink: CandidateSink,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Downloads a candidate and returns its validated bytes and content hash.
pub trait ImageFetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedImage, AppError>> + Send;
}

/// The dedup and persistence store. Each call is atomic on its own.
pub trait ImageStore: Send + Sync + Clone {
    /// Get the venue row for `name`, creating it on first sight.
    fn ensure_venue(
        &self,
        name: &str,
        url: &str,
    ) -> impl Future<Output = Result<Venue, AppError>> + Send;

    /// Fast pre-check; not the correctness boundary.
    fn is_known_source_url(&self, url: &str)
    -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Insert unless a row already owns `image.source_url`.
    fn try_insert_image(
        &self,
        image: &NewImage,
    ) -> impl Future<Output = Result<InsertOutcome, AppError>> + Send;

    /// Write the terminal run row; advances `last_scraped` on success/partial.
    fn finalize_run(
        &self,
        run: &NewSyncRun,
    ) -> impl Future<Output = Result<SyncRun, AppError>> + Send;
}
