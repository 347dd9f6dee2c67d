pub mod fetcher;

#[cfg(feature = "browser")]
pub mod browser;

pub use fetcher::{DEFAULT_USER_AGENT, FetchConfig, ReqwestImageFetcher, validate_image};

#[cfg(feature = "browser")]
pub use browser::{ChromiumBrowser, ChromiumSession};
