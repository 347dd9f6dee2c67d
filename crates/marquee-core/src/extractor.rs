//! Venue extractors: drive a browsing session and push candidate images.
//!
//! One [`VenueExtractor`] variant per [`PageLayout`]. All variants share the
//! same page-loading sequence (navigate, wait, paginate) and differ only in
//! which nodes they query and how a node becomes a [`CandidateImage`].

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use crate::error::AppError;
use crate::models::CandidateImage;
use crate::traits::{BrowserSession, CandidateExtractor, DomNode, NodeQuery, RelatedText};
use crate::venues::{PageLayout, Pagination, VenueConfig};

/// How long `ready_selector` may take to appear after navigation.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

const IMAGE_ATTRIBUTES: &[&str] = &["src", "data-src", "srcset", "alt"];

/// URL fragments that mark decorative images rather than flyers.
const SKIP_PATTERNS: &[&str] = &[
    "logo",
    "icon",
    "favicon",
    "avatar",
    "profile",
    "button",
    "arrow",
    "social",
    "facebook",
    "twitter",
    "instagram",
    "youtube",
    "sprite",
    "placeholder",
    "1x1",
    "pixel",
    "tracking",
    "analytics",
];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

const IMAGE_CDNS: &[&str] = &[
    "cdn.",
    "cloudinary",
    "imgix",
    "cloudfront",
    "squarespace",
    "website-files",
    "eventbrite",
    "wixstatic",
];

// ---------------------------------------------------------------------------
// CandidateSink
// ---------------------------------------------------------------------------

/// Producer end of a venue's candidate stream.
///
/// Collapses repeated URLs within one pass and applies backpressure from
/// the download pool. Dropping the sink ends the stream.
pub struct CandidateSink {
    tx: mpsc::Sender<CandidateImage>,
    seen: HashSet<String>,
}

impl CandidateSink {
    pub fn new(tx: mpsc::Sender<CandidateImage>) -> Self {
        Self {
            tx,
            seen: HashSet::new(),
        }
    }

    /// Create a sink together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CandidateImage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Push a candidate downstream.
    ///
    /// Returns `false` once the consumer has gone away; the extractor
    /// should stop producing.
    pub async fn push(&mut self, candidate: CandidateImage) -> bool {
        if !self.seen.insert(candidate.source_url.clone()) {
            return true;
        }
        self.tx.send(candidate).await.is_ok()
    }

    /// Number of distinct candidates pushed so far.
    pub fn yielded(&self) -> usize {
        self.seen.len()
    }
}

// ---------------------------------------------------------------------------
// VenueExtractor
// ---------------------------------------------------------------------------

/// Closed set of extractor variants, selected from the venue's layout.
#[derive(Debug, Clone)]
pub enum VenueExtractor {
    Standard {
        config: VenueConfig,
    },
    BackgroundImage {
        config: VenueConfig,
        card_selector: String,
    },
    NextImage {
        config: VenueConfig,
    },
    PosterGallery {
        config: VenueConfig,
        skip_alt: Vec<String>,
    },
}

/// Positions of the event name/date in a node's `related` texts.
#[derive(Debug, Clone, Copy, Default)]
struct MetadataSlots {
    name: Option<usize>,
    date: Option<usize>,
}

impl VenueExtractor {
    pub fn from_config(config: VenueConfig) -> Self {
        match config.layout.clone() {
            PageLayout::Standard => VenueExtractor::Standard { config },
            PageLayout::BackgroundImage { card_selector } => VenueExtractor::BackgroundImage {
                config,
                card_selector,
            },
            PageLayout::NextImage => VenueExtractor::NextImage { config },
            PageLayout::PosterGallery { skip_alt } => VenueExtractor::PosterGallery {
                config,
                skip_alt: skip_alt.into_iter().map(|s| s.to_lowercase()).collect(),
            },
        }
    }

    pub fn config(&self) -> &VenueConfig {
        match self {
            VenueExtractor::Standard { config }
            | VenueExtractor::BackgroundImage { config, .. }
            | VenueExtractor::NextImage { config }
            | VenueExtractor::PosterGallery { config, .. } => config,
        }
    }

    fn metadata(&self) -> (Vec<RelatedText>, MetadataSlots) {
        let config = self.config();
        let mut related = Vec::new();
        let mut slots = MetadataSlots::default();
        if let Some(name) = &config.event_name {
            slots.name = Some(related.len());
            related.push(name.clone());
        }
        if let Some(date) = &config.event_date {
            slots.date = Some(related.len());
            related.push(date.clone());
        }
        (related, slots)
    }

    /// Queries run against the loaded page, in order.
    fn queries(&self) -> Vec<NodeQuery> {
        let (related, _) = self.metadata();
        match self {
            VenueExtractor::BackgroundImage { card_selector, .. } => {
                vec![
                    NodeQuery::new(card_selector.as_str())
                        .with_attributes(&["style"])
                        .with_related(related),
                ]
            }
            _ => self
                .config()
                .image_selectors
                .iter()
                .map(|selector| {
                    NodeQuery::new(selector.as_str())
                        .with_attributes(IMAGE_ATTRIBUTES)
                        .with_related(related.clone())
                })
                .collect(),
        }
    }

    /// Turn one matched node into a candidate, or `None` if it is not a flyer.
    fn to_candidate(&self, node: &DomNode, slots: MetadataSlots) -> Option<CandidateImage> {
        let config = self.config();
        let mut event_name = slots.name.and_then(|i| node.related_text(i));
        let event_date = slots.date.and_then(|i| node.related_text(i));

        let raw = match self {
            VenueExtractor::Standard { .. } => pick_image_source(node)?,
            VenueExtractor::BackgroundImage { .. } => background_url(node.attr("style")?)?,
            VenueExtractor::NextImage { .. } => {
                let src = pick_image_source(node)?;
                if src.contains("default-event") {
                    return None;
                }
                unwrap_next_image(&src, &config.url).unwrap_or(src)
            }
            VenueExtractor::PosterGallery { skip_alt, .. } => {
                let alt = node.attr("alt").unwrap_or_default();
                let alt_lower = alt.to_lowercase();
                if skip_alt.iter().any(|skip| alt_lower.contains(skip.as_str())) {
                    return None;
                }
                if alt_lower.contains("poster") {
                    event_name = Some(alt.to_string());
                }
                pick_image_source(node)?
            }
        };

        let url = normalize_url(&raw, &config.url)?;
        if !is_flyer_url(&url) {
            return None;
        }

        Some(
            CandidateImage::new(url)
                .with_event_name(event_name)
                .with_event_date(event_date),
        )
    }

    async fn harvest<S: BrowserSession>(
        &self,
        session: &mut S,
        sink: &mut CandidateSink,
    ) -> Result<(), AppError> {
        let config = self.config();

        session.navigate(&config.events_url).await?;
        if let Some(ready) = &config.ready_selector {
            session.wait_for_selector(ready, READY_TIMEOUT).await?;
        }
        settle(config.settle_ms).await;
        paginate(session, config).await?;

        let (_, slots) = self.metadata();
        for query in self.queries() {
            let nodes = session.extract_all(&query).await?;
            tracing::debug!(
                venue = %config.key,
                selector = %query.selector,
                matched = nodes.len(),
                "Queried page"
            );
            for node in &nodes {
                let Some(candidate) = self.to_candidate(node, slots) else {
                    continue;
                };
                if !sink.push(candidate).await {
                    tracing::debug!(venue = %config.key, "Candidate consumer gone, stopping");
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

impl CandidateExtractor for VenueExtractor {
    fn venue(&self) -> &VenueConfig {
        self.config()
    }

    async fn extract<S: BrowserSession>(
        &self,
        session: &mut S,
        mut sink: CandidateSink,
    ) -> Result<(), AppError> {
        self.harvest(session, &mut sink)
            .await
            .map_err(|e| AppError::extraction(&self.config().key, e))
    }
}

async fn settle(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

async fn paginate<S: BrowserSession>(session: &mut S, config: &VenueConfig) -> Result<(), AppError> {
    match &config.pagination {
        Pagination::None => {}
        Pagination::Scroll { times } => {
            for _ in 0..*times {
                session.scroll_to_bottom().await?;
                settle(config.settle_ms / 2).await;
            }
        }
        Pagination::LoadMore {
            selector,
            max_clicks,
        } => {
            for clicks in 0..*max_clicks {
                match session.click(selector).await {
                    Ok(()) => settle(config.settle_ms / 2).await,
                    // The control disappears once everything is loaded.
                    Err(AppError::SelectorNotFound(_)) => {
                        tracing::debug!(venue = %config.key, clicks, "Load-more exhausted");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// `src`, else `data-src`, else the first `srcset` entry.
fn pick_image_source(node: &DomNode) -> Option<String> {
    if let Some(src) = node.attr("src").filter(|s| !s.starts_with("data:")) {
        return Some(src.to_string());
    }
    if let Some(src) = node.attr("data-src") {
        return Some(src.to_string());
    }
    node.attr("srcset")
        .and_then(|set| set.split(',').next())
        .and_then(|entry| entry.split_whitespace().next())
        .map(str::to_string)
}

/// Pull the URL out of an inline `background-image: url(...)` style.
pub fn background_url(style: &str) -> Option<String> {
    let start = style.find("url(")? + "url(".len();
    let rest = &style[start..];
    let end = rest.find(')')?;
    let url = rest[..end].trim().trim_matches(|c| c == '\'' || c == '"').trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// Resolve the original image behind a Next.js `/_next/image?url=` proxy URL.
pub fn unwrap_next_image(src: &str, base: &str) -> Option<String> {
    if !src.contains("/_next/image") {
        return None;
    }
    let parsed = Url::parse(src)
        .or_else(|_| Url::parse(base).and_then(|b| b.join(src)))
        .ok()?;
    let (_, inner) = parsed.query_pairs().find(|(k, _)| k == "url")?;
    normalize_url(&inner, base)
}

/// Make a page-relative image URL absolute. Non-http(s) URLs are dropped.
pub fn normalize_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let parsed = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("https://{rest}")).ok()?
    } else {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => Url::parse(base).ok()?.join(raw).ok()?,
        }
    };
    match parsed.scheme() {
        "http" | "https" => Some(parsed.to_string()),
        _ => None,
    }
}

/// Heuristic: does this URL look like an event flyer rather than decoration?
pub fn is_flyer_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if SKIP_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    let has_image_ext = IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext));
    let from_cdn = IMAGE_CDNS.iter().any(|cdn| lower.contains(cdn));
    has_image_ext || from_cdn
}
