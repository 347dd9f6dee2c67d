use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{BrowserConfig, Page};
use futures::StreamExt;
use marquee_core::error::AppError;
use marquee_core::traits::{Browser, BrowserSession, DomNode, NodeQuery};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::fetcher::DEFAULT_USER_AGENT;

/// How often `wait_for_selector` re-checks the page.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Headless Chromium driven over the Chrome DevTools Protocol.
///
/// One Chromium process serves the whole run; every
/// [`open_session`](Browser::open_session) opens a fresh tab.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use marquee_client::ChromiumBrowser;
/// use marquee_core::traits::{Browser, BrowserSession};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let browser = ChromiumBrowser::launch(Duration::from_secs(60)).await?;
/// let mut session = browser.open_session().await?;
/// session.navigate("https://www.creekandcave.com/calendar").await?;
/// session.close().await?;
/// browser.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ChromiumBrowser {
    browser: chromiumoxide::Browser,
    handler: JoinHandle<()>,
    page_timeout: Duration,
    user_agent: String,
}

impl ChromiumBrowser {
    /// Launch headless Chromium; every page operation is bounded by `page_timeout`.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`
    /// or one of the well-known install locations.
    pub async fn launch(page_timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .window_size(1920, 1080)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| AppError::Navigation(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            page_timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Close Chromium and stop the CDP handler.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

impl Browser for ChromiumBrowser {
    type Session = ChromiumSession;

    async fn open_session(&self) -> Result<ChromiumSession, AppError> {
        let timeout = self.page_timeout;
        let page = bounded(timeout, async {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| AppError::Navigation(format!("Failed to open tab: {e}")))?;
            page.set_user_agent(self.user_agent.as_str())
                .await
                .map_err(|e| AppError::Navigation(format!("Failed to set user agent: {e}")))?;
            Ok(page)
        })
        .await?;

        Ok(ChromiumSession { page, timeout })
    }
}

/// One Chromium tab, used serially by a single venue.
pub struct ChromiumSession {
    page: Page,
    timeout: Duration,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(AppError::Generic)?;

        let result = bounded(self.timeout, async {
            self.page
                .evaluate_expression(params)
                .await
                .map_err(|e| AppError::Navigation(format!("Script failed: {e}")))
        })
        .await?;

        result
            .into_value()
            .map_err(|e| AppError::Generic(format!("Unexpected script result: {e}")))
    }
}

impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        bounded(self.timeout, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| AppError::Navigation(format!("{url}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let check = format!("document.querySelector({}) !== null", js_string(selector));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval::<bool>(check.clone()).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), AppError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (!el || el.offsetParent === null) return false; \
             el.scrollIntoView(); el.click(); return true; }})()",
            js_string(selector)
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(AppError::SelectorNotFound(selector.to_string()))
        }
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), AppError> {
        self.eval::<bool>(
            "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()".into(),
        )
        .await?;
        Ok(())
    }

    async fn extract_all(&mut self, query: &NodeQuery) -> Result<Vec<DomNode>, AppError> {
        let query_json = serde_json::to_string(query)?;
        self.eval(format!("({EXTRACT_SCRIPT})({query_json})")).await
    }

    async fn close(self) -> Result<(), AppError> {
        self.page
            .close()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to close tab: {e}")))
    }
}

/// Reads requested attributes, inner text and related texts for every node
/// matching `q.selector`. `style` falls back to the computed background image.
const EXTRACT_SCRIPT: &str = r#"(q) => {
  const text = (el) => (el ? (el.innerText || el.textContent || '').trim() : '');
  return Array.from(document.querySelectorAll(q.selector)).map((el) => {
    const attributes = {};
    for (const name of q.attributes) {
      let value = el.getAttribute(name);
      if (name === 'style') {
        const bg = getComputedStyle(el).backgroundImage;
        if ((!value || !value.includes('url(')) && bg && bg !== 'none') value = bg;
      }
      if (value) attributes[name] = value;
    }
    const related = q.related.map((r) => {
      const scope = el.closest(r.closest);
      const found = scope ? text(scope.querySelector(r.selector)) : '';
      return found || null;
    });
    return { attributes, text: text(el), related };
  });
}"#;

/// Encode `s` as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(AppError::Timeout(timeout)),
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via **snap**, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
/// If nothing is found we return `None` and let `chromiumoxide` do its own
/// lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
