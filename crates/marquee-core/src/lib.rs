pub mod error;
pub mod extractor;
pub mod models;
pub mod storage;
pub mod sync;
pub mod throttle;
pub mod traits;
pub mod util;
pub mod venues;

#[cfg(test)]
pub mod testutil;

pub use error::AppError;
pub use extractor::{CandidateSink, VenueExtractor};
pub use models::{
    CandidateImage, FetchedImage, ImageKind, ImageRecord, InsertOutcome, NewImage, NewSyncRun,
    RunStatus, SharedHash, SyncRun, SyncRunSummary, Venue, VenueSummary, compute_hash,
};
pub use storage::ImageFiles;
pub use sync::{SyncConfig, SyncOutcome, SyncReporter, SyncService, TracingSyncReporter};
pub use throttle::{ThrottleConfig, ThrottledImageFetcher};
pub use traits::{
    Browser, BrowserSession, CandidateExtractor, DomNode, ImageFetcher, ImageStore, NodeQuery,
    RelatedText,
};
pub use venues::{PageLayout, Pagination, VenueConfig, builtin_venues, find_venue, load_venues};
