use std::net::IpAddr;
use std::time::Duration;

use image::ImageFormat;
use marquee_core::error::AppError;
use marquee_core::models::{FetchedImage, ImageKind};
use marquee_core::traits::ImageFetcher;
use reqwest::{Client, StatusCode};
use url::Url;

/// Desktop browser user agent; several venue CDNs refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Settings for [`ReqwestImageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Total tries per URL, counting the first.
    pub max_attempts: u32,
    /// Base delay between tries; grows linearly with the attempt number.
    pub retry_delay: Duration,
    pub max_bytes: usize,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: 2,
            retry_delay: Duration::from_secs(1),
            max_bytes: 25 * 1024 * 1024,
            min_width: 200,
            min_height: 200,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_min_dimensions(mut self, width: u32, height: u32) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }
}

/// Image downloader using reqwest.
///
/// Downloads candidate images, rejects anything that is not a decodable
/// raster image of at least the configured size, and hashes the raw bytes.
/// By default, SSRF protection is **enabled**: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this.
#[derive(Clone)]
pub struct ReqwestImageFetcher {
    client: Client,
    config: FetchConfig,
    ssrf_protection: bool,
}

impl ReqwestImageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            config,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedImage, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        if let Some(len) = response.content_length()
            && len > self.config.max_bytes as u64
        {
            return Err(too_large(self.config.max_bytes));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_request_error(e))?
        {
            if bytes.len() + chunk.len() > self.config.max_bytes {
                return Err(too_large(self.config.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        let (min_w, min_h) = (self.config.min_width, self.config.min_height);
        let (bytes, (kind, width, height)) = tokio::task::spawn_blocking(move || {
            let checked = validate_image(&bytes, min_w, min_h)?;
            Ok::<_, AppError>((bytes, checked))
        })
        .await
        .map_err(|e| AppError::Generic(format!("Image validation task failed: {e}")))??;

        Ok(FetchedImage::new(bytes, kind, width, height))
    }

    fn map_request_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.config.timeout)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_body() || e.is_request() {
            AppError::NetworkError(e.to_string())
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

impl ImageFetcher for ReqwestImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(url).await {
                Ok(image) => return Ok(image),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    tracing::debug!(%url, attempt, error = %e, "Retrying image download");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn too_large(max_bytes: usize) -> AppError {
    AppError::InvalidImage(format!("payload exceeds {max_bytes} bytes"))
}

/// Check that `bytes` decode fully as a supported raster image of at least
/// `min_width` x `min_height`.
pub fn validate_image(
    bytes: &[u8],
    min_width: u32,
    min_height: u32,
) -> Result<(ImageKind, u32, u32), AppError> {
    let format = image::guess_format(bytes)
        .map_err(|_| AppError::InvalidImage("unrecognised image format".into()))?;
    let kind = match format {
        ImageFormat::Jpeg => ImageKind::Jpeg,
        ImageFormat::Png => ImageKind::Png,
        ImageFormat::Gif => ImageKind::Gif,
        ImageFormat::WebP => ImageKind::WebP,
        other => {
            return Err(AppError::InvalidImage(format!(
                "unsupported format {other:?}"
            )));
        }
    };

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| AppError::InvalidImage(format!("decode failed: {e}")))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width < min_width || height < min_height {
        return Err(AppError::InvalidImage(format!(
            "{width}x{height} is below the {min_width}x{min_height} minimum"
        )));
    }

    Ok((kind, width, height))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    // IP literals are checked directly, bracketed v6 included
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16 (cloud metadata)
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}
