/// Smoke-test for `ChromiumBrowser`.
///
/// Launches a headless Chromium, runs one venue's extractor against the live
/// site and prints every candidate it yields. Nothing is downloaded or stored.
///
/// Run with:
///   cargo run -p marquee-client --example browser_smoke -- creek_cave
use std::time::Duration;

use marquee_client::ChromiumBrowser;
use marquee_core::traits::{Browser, BrowserSession, CandidateExtractor};
use marquee_core::{CandidateSink, VenueExtractor, builtin_venues, find_venue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let key = std::env::args().nth(1).unwrap_or_else(|| "creek_cave".to_string());
    let venues = builtin_venues();
    let config = find_venue(&venues, &key)
        .ok_or_else(|| anyhow::anyhow!("unknown venue '{key}'"))?
        .clone();
    let extractor = VenueExtractor::from_config(config);

    println!("Launching headless browser...");
    let browser = ChromiumBrowser::launch(Duration::from_secs(60)).await?;
    let mut session = browser.open_session().await?;

    let (sink, mut rx) = CandidateSink::channel(64);
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(candidate) = rx.recv().await {
            count += 1;
            println!(
                "{count:>3}. {} | {} | {}",
                candidate.source_url,
                candidate.event_name.as_deref().unwrap_or("-"),
                candidate.event_date.as_deref().unwrap_or("-"),
            );
        }
        count
    });

    let result = extractor.extract(&mut session, sink).await;
    session.close().await?;
    browser.shutdown().await;

    let count = printer.await?;
    result?;
    anyhow::ensure!(count > 0, "extractor yielded no candidates for '{key}'");
    println!("OK: {count} candidates from {key}");
    Ok(())
}
