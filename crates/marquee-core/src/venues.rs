//! Venue configuration table.
//!
//! Each venue names its pages, the selectors its extractor reads and the
//! [`PageLayout`] that picks the extractor variant. The built-in table can
//! be replaced wholesale by a JSON file with the same shape.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::traits::RelatedText;

/// How an events page reveals more than its first screen of content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    None,
    /// Scroll to the bottom `times` times, letting lazy content settle.
    Scroll { times: u32 },
    /// Click a "load more" control until it disappears or `max_clicks` is hit.
    LoadMore { selector: String, max_clicks: u32 },
}

/// Page structure, selecting the extractor variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageLayout {
    /// Plain `<img>` tags under `image_selectors`.
    #[default]
    Standard,
    /// Flyers set as `background-image` on event cards.
    BackgroundImage { card_selector: String },
    /// Next.js site serving images through `/_next/image?url=` proxies.
    NextImage,
    /// Gallery pages where only the `alt` text tells posters from decoration.
    PosterGallery {
        #[serde(default)]
        skip_alt: Vec<String>,
    },
}

/// Static description of one venue. Loaded at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Short identifier used on the command line (e.g. `creek_cave`).
    pub key: String,
    pub name: String,
    pub url: String,
    pub events_url: String,
    #[serde(default)]
    pub image_selectors: Vec<String>,
    #[serde(default)]
    pub event_name: Option<RelatedText>,
    #[serde(default)]
    pub event_date: Option<RelatedText>,
    /// Wait for this selector after navigation before reading the page.
    #[serde(default)]
    pub ready_selector: Option<String>,
    /// Pause after navigation and after every pagination step.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub layout: PageLayout,
}

fn default_settle_ms() -> u64 {
    3000
}

impl VenueConfig {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        events_url: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            url: url.into(),
            events_url: events_url.into(),
            image_selectors: Vec::new(),
            event_name: None,
            event_date: None,
            ready_selector: None,
            settle_ms: default_settle_ms(),
            pagination: Pagination::None,
            layout: PageLayout::Standard,
        }
    }

    pub fn with_image_selectors(mut self, selectors: &[&str]) -> Self {
        self.image_selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_event_name(mut self, related: RelatedText) -> Self {
        self.event_name = Some(related);
        self
    }

    pub fn with_event_date(mut self, related: RelatedText) -> Self {
        self.event_date = Some(related);
        self
    }

    pub fn with_ready_selector(mut self, selector: impl Into<String>) -> Self {
        self.ready_selector = Some(selector.into());
        self
    }

    pub fn with_settle_ms(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// The venues harvested when no venue file is supplied.
pub fn builtin_venues() -> Vec<VenueConfig> {
    vec![
        VenueConfig::new(
            "creek_cave",
            "Creek and the Cave",
            "https://www.creekandcave.com",
            "https://www.creekandcave.com/calendar",
        )
        .with_layout(PageLayout::BackgroundImage {
            card_selector: ".event-list-detail-image".into(),
        })
        .with_event_name(RelatedText::new(
            ".events-list-detail",
            ".events-list-detail-title",
        ))
        .with_event_date(RelatedText::new(
            ".events-list-day",
            ".event-list-detail-date-day",
        )),
        VenueConfig::new(
            "mothership",
            "Comedy Mothership",
            "https://comedymothership.com",
            "https://comedymothership.com/shows",
        )
        .with_layout(PageLayout::NextImage)
        .with_image_selectors(&["[class*='EventCard'] img"])
        .with_event_name(RelatedText::new(
            "[class*='EventCard_eventCard']",
            "[class*='EventCard_title'], h3, h4",
        ))
        .with_settle_ms(8000)
        .with_pagination(Pagination::Scroll { times: 3 }),
        VenueConfig::new(
            "velveeta",
            "The Velveeta Room",
            "https://www.thevelveetaroom.com",
            "https://www.thevelveetaroom.com",
        )
        .with_layout(PageLayout::PosterGallery {
            skip_alt: ["logo", "icon", "instagram", "background", "sky", "stars"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
        .with_image_selectors(&["img[src*='wixstatic']"])
        .with_settle_ms(5000)
        .with_pagination(Pagination::Scroll { times: 5 }),
        VenueConfig::new(
            "sunset_strip",
            "Sunset Strip Comedy",
            "https://www.sunsetstripatx.com",
            "https://www.sunsetstripatx.com/events",
        )
        .with_image_selectors(&[
            ".sqs-block-image img",
            ".summary-thumbnail img",
            ".eventlist-column-thumbnail img",
        ])
        .with_event_name(RelatedText::nearby(".eventlist-title, .summary-title, h2"))
        .with_event_date(RelatedText::nearby(".eventlist-meta-date, time.event-date")),
        VenueConfig::new(
            "east_austin",
            "East Austin Comedy Club",
            "https://eastaustincomedy.com",
            "https://eastaustincomedy.com/events-2-1",
        )
        .with_image_selectors(&[
            ".sqs-block-image img",
            ".fe-block img",
            ".fluidImageOverlay img",
        ])
        .with_event_name(RelatedText::nearby("h2, h3, .event-title"))
        .with_event_date(RelatedText::nearby("time, .date"))
        .with_pagination(Pagination::Scroll { times: 5 }),
        VenueConfig::new(
            "rozcos",
            "Rozco's Comedy",
            "https://www.rozcoscomedy.com",
            "https://www.rozcoscomedy.com/events",
        )
        .with_image_selectors(&[".event img", ".sqs-block-image img", "[class*='event'] img"])
        .with_event_name(RelatedText::nearby(".event-title, h2, h3"))
        .with_event_date(RelatedText::nearby(".event-date, time"))
        .with_pagination(Pagination::Scroll { times: 3 }),
        VenueConfig::new(
            "vulcan",
            "Vulcan Gas Company",
            "https://www.vulcanatx.com",
            "https://www.vulcanatx.com/",
        )
        .with_image_selectors(&[".event img", "[class*='event'] img", ".w-dyn-item img"])
        .with_event_name(RelatedText::nearby("h2, h3, h4, .event-title"))
        .with_event_date(RelatedText::nearby(".event-date, time")),
        VenueConfig::new(
            "paramount",
            "Paramount Theatre",
            "https://tickets.austintheatre.org",
            "https://tickets.austintheatre.org/events?kid=4",
        )
        .with_image_selectors(&[".tn-prod-list-item img"])
        .with_event_name(RelatedText::new(
            ".tn-prod-list-item",
            ".tn-prod-list-item__perf-property--title, .tn-performance-title",
        ))
        .with_event_date(RelatedText::new(
            ".tn-prod-list-item",
            ".tn-prod-list-item__perf-date",
        ))
        .with_ready_selector(".tn-prod-list-item")
        .with_settle_ms(8000)
        .with_pagination(Pagination::Scroll { times: 3 }),
    ]
}

/// Load a venue table from a JSON array of [`VenueConfig`].
pub fn load_venues(path: &Path) -> Result<Vec<VenueConfig>, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("Failed to read venue file {}: {e}", path.display()))
    })?;
    let venues: Vec<VenueConfig> = serde_json::from_str(&raw)?;
    validate_venues(&venues)?;
    Ok(venues)
}

/// Reject tables with duplicate keys or names, or venues that cannot yield
/// anything.
///
/// Names must be unique too: the store and the image directory are keyed
/// on the display name.
pub fn validate_venues(venues: &[VenueConfig]) -> Result<(), AppError> {
    let mut keys = HashSet::new();
    let mut names = HashSet::new();
    for venue in venues {
        if !keys.insert(venue.key.as_str()) {
            return Err(AppError::ConfigError(format!(
                "Duplicate venue key '{}'",
                venue.key
            )));
        }
        if !names.insert(venue.name.as_str()) {
            return Err(AppError::ConfigError(format!(
                "Duplicate venue name '{}' (key '{}')",
                venue.name, venue.key
            )));
        }
        let has_source = match &venue.layout {
            PageLayout::BackgroundImage { card_selector } => !card_selector.is_empty(),
            _ => !venue.image_selectors.is_empty(),
        };
        if !has_source {
            return Err(AppError::ConfigError(format!(
                "Venue '{}' has no image selectors",
                venue.key
            )));
        }
    }
    Ok(())
}

/// Look a venue up by its key.
pub fn find_venue<'a>(venues: &'a [VenueConfig], key: &str) -> Option<&'a VenueConfig> {
    venues.iter().find(|v| v.key == key)
}
