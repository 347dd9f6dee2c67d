//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::extractor::CandidateSink;
use crate::models::{
    CandidateImage, FetchedImage, ImageKind, InsertOutcome, NewImage, NewSyncRun, SyncRun, Venue,
};
use crate::sync::{SyncEvent, SyncReporter};
use crate::traits::{
    Browser, BrowserSession, CandidateExtractor, DomNode, ImageFetcher, ImageStore, NodeQuery,
};
use crate::venues::VenueConfig;

// ---------------------------------------------------------------------------
// MockSession / MockBrowser
// ---------------------------------------------------------------------------

/// Scripted browsing session over a fake page.
///
/// Every call is appended to a shared log (`navigate <url>`, `wait <sel>`,
/// `click <sel>`, `scroll`, `extract <sel>`, `close`).
pub struct MockSession {
    nodes: HashMap<String, Vec<DomNode>>,
    /// Remaining successful clicks per selector.
    clickable: HashMap<String, u32>,
    extract_errors: HashMap<String, AppError>,
    navigate_error: Option<AppError>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }

    fn with_log(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            nodes: HashMap::new(),
            clickable: HashMap::new(),
            extract_errors: HashMap::new(),
            navigate_error: None,
            log,
        }
    }

    /// Nodes returned by `extract_all` for `selector`.
    pub fn with_nodes(mut self, selector: &str, nodes: Vec<DomNode>) -> Self {
        self.nodes.insert(selector.to_string(), nodes);
        self
    }

    /// `selector` can be clicked `times` times before it disappears.
    pub fn with_clickable(mut self, selector: &str, times: u32) -> Self {
        self.clickable.insert(selector.to_string(), times);
        self
    }

    /// `extract_all` for `selector` fails once with `error`.
    pub fn with_extract_error(mut self, selector: &str, error: AppError) -> Self {
        self.extract_errors.insert(selector.to_string(), error);
        self
    }

    pub fn with_navigate_error(mut self, error: AppError) -> Self {
        self.navigate_error = Some(error);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        self.record(format!("navigate {url}"));
        match self.navigate_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        self.record(format!("wait {selector}"));
        if self.nodes.contains_key(selector) || self.clickable.contains_key(selector) {
            Ok(())
        } else {
            Err(AppError::Timeout(timeout))
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), AppError> {
        self.record(format!("click {selector}"));
        match self.clickable.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(())
            }
            _ => Err(AppError::SelectorNotFound(selector.to_string())),
        }
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), AppError> {
        self.record("scroll".to_string());
        Ok(())
    }

    async fn extract_all(&mut self, query: &NodeQuery) -> Result<Vec<DomNode>, AppError> {
        self.record(format!("extract {}", query.selector));
        if let Some(e) = self.extract_errors.remove(&query.selector) {
            return Err(e);
        }
        Ok(self.nodes.get(&query.selector).cloned().unwrap_or_default())
    }

    async fn close(self) -> Result<(), AppError> {
        self.record("close".to_string());
        Ok(())
    }
}

/// Mock browser handing out empty sessions that share one call log.
#[derive(Clone)]
pub struct MockBrowser {
    open_error: Arc<Mutex<Option<AppError>>>,
    opened: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            open_error: Arc::new(Mutex::new(None)),
            opened: Arc::new(AtomicUsize::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next `open_session` call fails with `error`.
    pub fn with_open_error(error: AppError) -> Self {
        let browser = Self::new();
        *browser.open_error.lock().unwrap() = Some(error);
        browser
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Calls made by every session this browser opened.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl Browser for MockBrowser {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession, AppError> {
        let err = self.open_error.lock().unwrap().take();
        if let Some(e) = err {
            return Err(e);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession::with_log(self.log.clone()))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor that navigates once and then pushes a scripted candidate list.
#[derive(Clone)]
pub struct MockExtractor {
    venue: VenueConfig,
    candidates: Vec<CandidateImage>,
    fail_after: Option<usize>,
    push_delay: Duration,
}

impl MockExtractor {
    pub fn new(key: &str, urls: &[String]) -> Self {
        let venue = VenueConfig::new(
            key,
            format!("Venue {key}"),
            format!("https://{key}.example"),
            format!("https://{key}.example/shows"),
        )
        .with_image_selectors(&["img"])
        .with_settle_ms(0);
        Self {
            venue,
            candidates: urls.iter().map(CandidateImage::new).collect(),
            fail_after: None,
            push_delay: Duration::ZERO,
        }
    }

    /// Push only the first `n` candidates, then fail with an extraction error.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Sleep before every push.
    pub fn with_push_delay(mut self, delay: Duration) -> Self {
        self.push_delay = delay;
        self
    }
}

impl CandidateExtractor for MockExtractor {
    fn venue(&self) -> &VenueConfig {
        &self.venue
    }

    async fn extract<S: BrowserSession>(
        &self,
        session: &mut S,
        mut sink: CandidateSink,
    ) -> Result<(), AppError> {
        session
            .navigate(&self.venue.events_url)
            .await
            .map_err(|e| AppError::extraction(&self.venue.key, e))?;

        let limit = self.fail_after.unwrap_or(self.candidates.len());
        for candidate in self.candidates.iter().take(limit) {
            if !self.push_delay.is_zero() {
                tokio::time::sleep(self.push_delay).await;
            }
            if !sink.push(candidate.clone()).await {
                return Ok(());
            }
        }

        match self.fail_after {
            Some(_) => Err(AppError::Extraction {
                venue: self.venue.key.clone(),
                message: "event list container missing".into(),
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockImageFetcher
// ---------------------------------------------------------------------------

/// Fetcher returning scripted results per URL.
///
/// Unscripted URLs succeed with bytes derived from the URL itself, so
/// distinct URLs get distinct hashes. Scripted results are one-shot.
#[derive(Clone)]
pub struct MockImageFetcher {
    responses: Arc<Mutex<HashMap<String, Result<FetchedImage, AppError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_response(self, url: &str, response: Result<FetchedImage, AppError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    /// Serve exactly `bytes` for `url`.
    pub fn with_bytes(self, url: &str, bytes: &[u8]) -> Self {
        self.with_response(url, Ok(FetchedImage::new(bytes.to_vec(), ImageKind::Jpeg, 400, 600)))
    }

    /// Hold every fetch for `delay` to make concurrency observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.responses.lock().unwrap().remove(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| {
            Ok(FetchedImage::new(
                url.as_bytes().to_vec(),
                ImageKind::Png,
                300,
                300,
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory store that records every write.
#[derive(Clone)]
pub struct MockStore {
    pub venues: Arc<Mutex<Vec<Venue>>>,
    pub images: Arc<Mutex<Vec<NewImage>>>,
    pub runs: Arc<Mutex<Vec<NewSyncRun>>>,
    known: Arc<Mutex<HashSet<String>>>,
    /// URLs that look unknown to the pre-check but lose the insert race.
    racing: Arc<Mutex<HashSet<String>>>,
    ensure_error: Arc<Mutex<Option<AppError>>>,
    insert_error: Arc<Mutex<Option<AppError>>>,
    finalize_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            venues: Arc::new(Mutex::new(Vec::new())),
            images: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(Mutex::new(Vec::new())),
            known: Arc::new(Mutex::new(HashSet::new())),
            racing: Arc::new(Mutex::new(HashSet::new())),
            ensure_error: Arc::new(Mutex::new(None)),
            insert_error: Arc::new(Mutex::new(None)),
            finalize_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Pretend these URLs were stored by an earlier run.
    pub fn with_known_urls(self, urls: &[String]) -> Self {
        self.known.lock().unwrap().extend(urls.iter().cloned());
        self
    }

    pub fn with_racing_url(self, url: &str) -> Self {
        self.racing.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn with_ensure_error(self, error: AppError) -> Self {
        *self.ensure_error.lock().unwrap() = Some(error);
        self
    }

    /// The next `try_insert_image` fails with `error`.
    pub fn with_insert_error(self, error: AppError) -> Self {
        *self.insert_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_finalize_error(self, error: AppError) -> Self {
        *self.finalize_error.lock().unwrap() = Some(error);
        self
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    pub fn last_run(&self) -> Option<NewSyncRun> {
        self.runs.lock().unwrap().last().cloned()
    }

    pub fn venue(&self, name: &str) -> Option<Venue> {
        self.venues
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStore for MockStore {
    async fn ensure_venue(&self, name: &str, url: &str) -> Result<Venue, AppError> {
        if let Some(e) = self.ensure_error.lock().unwrap().take() {
            return Err(e);
        }
        let mut venues = self.venues.lock().unwrap();
        if let Some(existing) = venues.iter().find(|v| v.name == name) {
            return Ok(existing.clone());
        }
        let venue = Venue {
            id: venues.len() as i64 + 1,
            name: name.to_string(),
            url: url.to_string(),
            last_scraped: None,
        };
        venues.push(venue.clone());
        Ok(venue)
    }

    async fn is_known_source_url(&self, url: &str) -> Result<bool, AppError> {
        Ok(self.known.lock().unwrap().contains(url))
    }

    async fn try_insert_image(&self, image: &NewImage) -> Result<InsertOutcome, AppError> {
        if let Some(e) = self.insert_error.lock().unwrap().take() {
            return Err(e);
        }
        if self.racing.lock().unwrap().contains(&image.source_url) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        if !self.known.lock().unwrap().insert(image.source_url.clone()) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        let mut images = self.images.lock().unwrap();
        images.push(image.clone());
        Ok(InsertOutcome::Inserted(images.len() as i64))
    }

    async fn finalize_run(&self, run: &NewSyncRun) -> Result<SyncRun, AppError> {
        if let Some(e) = self.finalize_error.lock().unwrap().take() {
            return Err(e);
        }
        if run.status.advances_venue() {
            let mut venues = self.venues.lock().unwrap();
            if let Some(venue) = venues.iter_mut().find(|v| v.id == run.venue_id) {
                venue.last_scraped = Some(run.completed_at);
            }
        }
        let mut runs = self.runs.lock().unwrap();
        runs.push(run.clone());
        Ok(SyncRun {
            id: runs.len() as i64,
            venue_id: run.venue_id,
            started_at: run.started_at,
            completed_at: run.completed_at,
            images_found: run.images_found,
            images_new: run.images_new,
            status: run.status,
            error_message: run.error_message.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short label per event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SyncReporter for MockReporter {
    fn report(&self, event: SyncEvent<'_>) {
        let label = match event {
            SyncEvent::VenueStarted { venue } => format!("started {venue}"),
            SyncEvent::SessionFailed { venue, .. } => format!("session_failed {venue}"),
            SyncEvent::CandidateKnown { url, .. } => format!("known {url}"),
            SyncEvent::ImageStored { url, .. } => format!("stored {url}"),
            SyncEvent::DuplicateDiscarded { url, .. } => format!("duplicate {url}"),
            SyncEvent::CandidateRejected { url, .. } => format!("rejected {url}"),
            SyncEvent::ExtractionStopped { venue, .. } => format!("extraction_stopped {venue}"),
            SyncEvent::VenueFinished { outcome } => {
                format!("finished {} {}", outcome.venue_key, outcome.status)
            }
        };
        self.events.lock().unwrap().push(label);
    }
}

/// Candidate URLs `https://cdn.example.com/<prefix>-<i>.jpg` for `0..n`.
pub fn flyer_urls(prefix: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://cdn.example.com/{prefix}-{i}.jpg"))
        .collect()
}
