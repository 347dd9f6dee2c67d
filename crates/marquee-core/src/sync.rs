//! The sync orchestrator.
//!
//! Drives one venue end to end: open a browsing session, stream the
//! extractor's candidates through a bounded download pool, persist new
//! images through a single writer and finalize exactly one run row.

use chrono::Utc;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::extractor::CandidateSink;
use crate::models::{
    CandidateImage, FetchedImage, InsertOutcome, NewImage, NewSyncRun, RunStatus, Venue,
};
use crate::storage::ImageFiles;
use crate::traits::{Browser, BrowserSession, CandidateExtractor, ImageFetcher, ImageStore};

/// Tuning knobs for a sync.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent image downloads within one venue.
    pub download_concurrency: usize,
    /// Capacity of the extractor-to-downloader channel.
    pub candidate_buffer: usize,
    /// Venues synced at the same time by `sync_all`.
    pub venue_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            candidate_buffer: 32,
            venue_concurrency: 1,
        }
    }
}

impl SyncConfig {
    pub fn with_download_concurrency(mut self, n: usize) -> Self {
        self.download_concurrency = n.max(1);
        self
    }

    pub fn with_candidate_buffer(mut self, n: usize) -> Self {
        self.candidate_buffer = n.max(1);
        self
    }

    pub fn with_venue_concurrency(mut self, n: usize) -> Self {
        self.venue_concurrency = n.max(1);
        self
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    VenueStarted {
        venue: &'a str,
    },
    SessionFailed {
        venue: &'a str,
        error: &'a str,
    },
    CandidateKnown {
        venue: &'a str,
        url: &'a str,
    },
    ImageStored {
        venue: &'a str,
        url: &'a str,
        hash: &'a str,
        path: &'a str,
    },
    DuplicateDiscarded {
        venue: &'a str,
        url: &'a str,
    },
    CandidateRejected {
        venue: &'a str,
        url: &'a str,
        error: &'a str,
    },
    ExtractionStopped {
        venue: &'a str,
        error: &'a str,
    },
    VenueFinished {
        outcome: &'a SyncOutcome,
    },
}

/// Trait for receiving sync events (decoupled logging).
pub trait SyncReporter: Send + Sync {
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSyncReporter;

impl SyncReporter for TracingSyncReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::VenueStarted { venue } => {
                tracing::info!(%venue, "Sync started");
            }
            SyncEvent::SessionFailed { venue, error } => {
                tracing::error!(%venue, %error, "Could not open browsing session");
            }
            SyncEvent::CandidateKnown { venue, url } => {
                tracing::debug!(%venue, %url, "Already stored, skipping");
            }
            SyncEvent::ImageStored {
                venue,
                url,
                hash,
                path,
            } => {
                tracing::debug!(%venue, %url, %hash, %path, "Stored new image");
            }
            SyncEvent::DuplicateDiscarded { venue, url } => {
                tracing::debug!(%venue, %url, "Lost insert race, discarding download");
            }
            SyncEvent::CandidateRejected { venue, url, error } => {
                tracing::warn!(%venue, %url, %error, "Candidate rejected");
            }
            SyncEvent::ExtractionStopped { venue, error } => {
                tracing::warn!(%venue, %error, "Extraction ended early");
            }
            SyncEvent::VenueFinished { outcome } => {
                tracing::info!(
                    venue = %outcome.venue_key,
                    status = %outcome.status,
                    found = outcome.images_found,
                    new = outcome.images_new,
                    rejected = outcome.images_rejected,
                    "Sync finished"
                );
            }
        }
    }
}

/// What one venue's sync ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub venue_key: String,
    pub venue_name: String,
    pub status: RunStatus,
    pub images_found: u32,
    pub images_new: u32,
    /// Candidates dropped for invalid payloads or fetch errors.
    pub images_rejected: u32,
    pub error: Option<String>,
    /// The finalized sync_log row, if one could be written.
    pub run_id: Option<i64>,
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Per-run counters kept by the writer loop.
#[derive(Debug, Default)]
struct Tally {
    found: u32,
    new: u32,
    rejected: u32,
    /// First error that ended the run outright.
    fatal: Option<AppError>,
}

/// Result of running one candidate through the download pool.
enum Processed {
    Known(CandidateImage),
    Fetched(CandidateImage, FetchedImage),
    Rejected(CandidateImage, AppError),
    Fatal(AppError),
}

/// Orchestrates venue syncs over injected collaborators.
pub struct SyncService<B, F, S>
where
    B: Browser,
    F: ImageFetcher,
    S: ImageStore,
{
    browser: B,
    fetcher: F,
    store: S,
    files: ImageFiles,
    config: SyncConfig,
}

impl<B, F, S> SyncService<B, F, S>
where
    B: Browser,
    F: ImageFetcher,
    S: ImageStore,
{
    pub fn new(browser: B, fetcher: F, store: S, files: ImageFiles, config: SyncConfig) -> Self {
        Self {
            browser,
            fetcher,
            store,
            files,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hand the browser back, e.g. to shut it down after the last venue.
    pub fn into_browser(self) -> B {
        self.browser
    }

    /// Sync every venue; one venue failing never stops the others.
    ///
    /// Stops starting new venues once `cancel` fires.
    pub async fn sync_all<X, R>(
        &self,
        extractors: &[X],
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Vec<SyncOutcome>
    where
        X: CandidateExtractor,
        R: SyncReporter,
    {
        if self.config.venue_concurrency <= 1 {
            let mut outcomes = Vec::with_capacity(extractors.len());
            for extractor in extractors {
                if cancel.is_cancelled() {
                    break;
                }
                outcomes.push(self.sync_venue(extractor, cancel, reporter).await);
            }
            return outcomes;
        }

        futures::stream::iter(extractors)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|extractor| self.sync_venue(extractor, cancel, reporter))
            .buffer_unordered(self.config.venue_concurrency)
            .collect()
            .await
    }

    /// Run one venue's pass and finalize its run row.
    pub async fn sync_venue<X, R>(
        &self,
        extractor: &X,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> SyncOutcome
    where
        X: CandidateExtractor,
        R: SyncReporter,
    {
        let config = extractor.venue();
        reporter.report(SyncEvent::VenueStarted { venue: &config.key });
        let started_at = Utc::now();

        let venue = match self.store.ensure_venue(&config.name, &config.url).await {
            Ok(venue) => venue,
            Err(e) => {
                tracing::error!(venue = %config.key, error = %e, "Could not register venue");
                let outcome = SyncOutcome {
                    venue_key: config.key.clone(),
                    venue_name: config.name.clone(),
                    status: RunStatus::Failed,
                    images_found: 0,
                    images_new: 0,
                    images_rejected: 0,
                    error: Some(e.to_string()),
                    run_id: None,
                };
                reporter.report(SyncEvent::VenueFinished { outcome: &outcome });
                return outcome;
            }
        };

        let opened = tokio::select! {
            session = self.browser.open_session() => session,
            () = cancel.cancelled() => Err(AppError::Cancelled),
        };

        let (extraction, tally) = match opened {
            Ok(mut session) => {
                let result = self
                    .run_pipeline(extractor, &mut session, &venue, cancel, reporter)
                    .await;
                if let Err(e) = session.close().await {
                    tracing::warn!(venue = %config.key, error = %e, "Failed to close browsing session");
                }
                result
            }
            Err(e) => {
                let error = e.to_string();
                reporter.report(SyncEvent::SessionFailed {
                    venue: &config.key,
                    error: &error,
                });
                (Err(e), Tally::default())
            }
        };

        let (status, error) = resolve_status(&extraction, &tally);
        let run = NewSyncRun {
            venue_id: venue.id,
            started_at,
            completed_at: Utc::now(),
            images_found: tally.found,
            images_new: tally.new,
            status,
            error_message: error,
        };

        let outcome = match self.store.finalize_run(&run).await {
            Ok(saved) => SyncOutcome {
                venue_key: config.key.clone(),
                venue_name: config.name.clone(),
                status: saved.status,
                images_found: saved.images_found,
                images_new: saved.images_new,
                images_rejected: tally.rejected,
                error: saved.error_message,
                run_id: Some(saved.id),
            },
            Err(e) => {
                tracing::error!(venue = %config.key, error = %e, "Could not record sync run");
                let error = match run.error_message {
                    Some(prev) => format!("{prev}; {e}"),
                    None => e.to_string(),
                };
                SyncOutcome {
                    venue_key: config.key.clone(),
                    venue_name: config.name.clone(),
                    status: RunStatus::Failed,
                    images_found: tally.found,
                    images_new: tally.new,
                    images_rejected: tally.rejected,
                    error: Some(error),
                    run_id: None,
                }
            }
        };

        reporter.report(SyncEvent::VenueFinished { outcome: &outcome });
        outcome
    }

    /// Extraction and downloading run side by side over one channel.
    ///
    /// `stop` ends extraction early when the caller cancels or the writer
    /// hits a fatal store error.
    async fn run_pipeline<X, R>(
        &self,
        extractor: &X,
        session: &mut B::Session,
        venue: &Venue,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> (Result<(), AppError>, Tally)
    where
        X: CandidateExtractor,
        R: SyncReporter,
    {
        let key = extractor.venue().key.as_str();
        let stop = cancel.child_token();
        let (sink, rx) = CandidateSink::channel(self.config.candidate_buffer);

        let extraction = async {
            let result = tokio::select! {
                result = extractor.extract(session, sink) => result,
                () = stop.cancelled() => Err(AppError::Cancelled),
            };
            if let Err(e) = &result {
                let error = e.to_string();
                reporter.report(SyncEvent::ExtractionStopped {
                    venue: key,
                    error: &error,
                });
            }
            result
        };

        let writer = self.write_results(key, venue, rx, &stop, reporter);

        tokio::join!(extraction, writer)
    }

    /// The single writer: consumes download results in completion order and
    /// serializes every file write and store insert.
    async fn write_results<R: SyncReporter>(
        &self,
        key: &str,
        venue: &Venue,
        rx: tokio::sync::mpsc::Receiver<CandidateImage>,
        stop: &CancellationToken,
        reporter: &R,
    ) -> Tally {
        let mut tally = Tally::default();
        let mut results = ReceiverStream::new(rx)
            .map(|candidate| self.process_candidate(candidate))
            .buffer_unordered(self.config.download_concurrency.max(1));

        loop {
            let next = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    tally.fatal = Some(AppError::Cancelled);
                    break;
                }
                next = results.next() => next,
            };
            let Some(processed) = next else { break };

            match processed {
                Processed::Known(candidate) => {
                    tally.found += 1;
                    reporter.report(SyncEvent::CandidateKnown {
                        venue: key,
                        url: &candidate.source_url,
                    });
                }
                Processed::Rejected(candidate, e) => {
                    tally.found += 1;
                    tally.rejected += 1;
                    let error = e.to_string();
                    reporter.report(SyncEvent::CandidateRejected {
                        venue: key,
                        url: &candidate.source_url,
                        error: &error,
                    });
                }
                Processed::Fetched(candidate, image) => {
                    tally.found += 1;
                    match self.persist(venue, &candidate, &image).await {
                        Ok((InsertOutcome::Inserted(_), path)) => {
                            tally.new += 1;
                            reporter.report(SyncEvent::ImageStored {
                                venue: key,
                                url: &candidate.source_url,
                                hash: &image.hash,
                                path: &path,
                            });
                        }
                        Ok((InsertOutcome::AlreadyPresent, _)) => {
                            reporter.report(SyncEvent::DuplicateDiscarded {
                                venue: key,
                                url: &candidate.source_url,
                            });
                        }
                        Err(e) => {
                            tracing::error!(venue = %key, url = %candidate.source_url, error = %e, "Storage failure, aborting run");
                            tally.fatal = Some(e);
                            break;
                        }
                    }
                }
                Processed::Fatal(e) => {
                    tracing::error!(venue = %key, error = %e, "Storage failure, aborting run");
                    tally.fatal = Some(e);
                    break;
                }
            }
        }

        // An extractor still navigating would otherwise outlive the writer.
        stop.cancel();
        tally
    }

    async fn process_candidate(&self, candidate: CandidateImage) -> Processed {
        match self.store.is_known_source_url(&candidate.source_url).await {
            Ok(true) => return Processed::Known(candidate),
            Ok(false) => {}
            Err(e) => return Processed::Fatal(e),
        }
        match self.fetcher.fetch(&candidate.source_url).await {
            Ok(image) => Processed::Fetched(candidate, image),
            Err(e) => Processed::Rejected(candidate, e),
        }
    }

    /// File first, then row: a crash can orphan a file but never a row.
    async fn persist(
        &self,
        venue: &Venue,
        candidate: &CandidateImage,
        image: &FetchedImage,
    ) -> Result<(InsertOutcome, String), AppError> {
        let path = self.files.save(&venue.name, image).await?;
        let local_path = path.to_string_lossy().into_owned();
        let record = NewImage {
            venue_id: venue.id,
            source_url: candidate.source_url.clone(),
            local_path: local_path.clone(),
            image_hash: image.hash.clone(),
            event_name: candidate.event_name.clone(),
            event_date: candidate.event_date.clone(),
        };
        let outcome = self.store.try_insert_image(&record).await?;
        Ok((outcome, local_path))
    }
}

/// Decide the terminal status of a run.
///
/// A fatal error always fails the run. An extraction that ended early is
/// `partial` when at least one candidate made it through, `failed` otherwise.
fn resolve_status(
    extraction: &Result<(), AppError>,
    tally: &Tally,
) -> (RunStatus, Option<String>) {
    if let Some(fatal) = &tally.fatal {
        return (RunStatus::Failed, Some(fatal.to_string()));
    }
    match extraction {
        Ok(()) => (RunStatus::Success, None),
        Err(e) if e.is_fatal_to_run() => (RunStatus::Failed, Some(e.to_string())),
        Err(e) if tally.found > 0 => (RunStatus::Partial, Some(e.to_string())),
        Err(e) => (RunStatus::Failed, Some(e.to_string())),
    }
}
