//! Per-domain request throttling for polite image downloads.
//!
//! Wraps any [`ImageFetcher`] with a minimum delay between requests to the
//! same host, so a venue's download pool never bursts a single CDN.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use marquee_core::throttle::{ThrottledImageFetcher, ThrottleConfig};
//!
//! # use marquee_core::traits::ImageFetcher;
//! # use marquee_core::models::FetchedImage;
//! # #[derive(Clone)] struct MyFetcher;
//! # impl ImageFetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str) -> Result<FetchedImage, marquee_core::error::AppError> { todo!() }
//! # }
//! let config = ThrottleConfig::new(Duration::from_millis(250))
//!     .with_jitter(Duration::from_millis(100));
//! let fetcher = ThrottledImageFetcher::new(MyFetcher, config);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;
use crate::models::FetchedImage;
use crate::traits::ImageFetcher;

/// Configuration for the throttled fetcher.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    ///
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl ThrottleConfig {
    /// Create a new config with the given per-domain delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    /// Add random jitter (uniform [0, jitter]) on top of the base delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Compute the effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// 200ms delay, no jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            jitter: Duration::ZERO,
        }
    }
}

/// An [`ImageFetcher`] wrapper that enforces per-domain throttling.
///
/// Each request reserves the next free slot for its domain before
/// sleeping, so concurrent downloads to one host are spaced out while
/// other hosts proceed unhindered.
#[derive(Clone)]
pub struct ThrottledImageFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    /// Next free request slot per domain key.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: ImageFetcher> ThrottledImageFetcher<F> {
    /// Wrap an existing fetcher with throttling.
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the domain key from a URL (scheme://host:port).
    fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Claim the next slot for `domain` and sleep until it arrives.
    async fn wait_for_domain(&self, domain: &str) {
        let now = Instant::now();
        let slot = {
            let mut map = self.next_slot.lock().await;
            let slot = map.get(domain).copied().filter(|s| *s > now).unwrap_or(now);
            map.insert(domain.to_string(), slot + self.config.effective_delay());
            slot
        };

        if slot > now {
            let sleep_duration = slot - now;
            tracing::debug!(
                domain = %domain,
                sleep_ms = %sleep_duration.as_millis(),
                "Throttling request"
            );
            tokio::time::sleep(sleep_duration).await;
        }
    }
}

impl<F: ImageFetcher> ImageFetcher for ThrottledImageFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError> {
        if let Some(domain) = Self::domain_key(url) {
            self.wait_for_domain(&domain).await;
        }
        self.inner.fetch(url).await
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std, no `rand` dependency.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
