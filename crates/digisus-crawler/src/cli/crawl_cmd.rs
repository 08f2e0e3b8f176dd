//! `digisus-crawler`: walk the portal and download every current document.

use crate::catalog::Catalog;
use crate::cli::output;
use crate::config::CrawlConfig;
use crate::crawler::{CrawlSummary, Crawler};
use crate::progress;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use crate::session::{PageSession, SessionError, SessionResult};
use crate::sink::{DocumentSink, HttpSink};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run a full crawl. Once Chromium has launched, the browser is shut down
/// and the summary printed on every exit path, including a portal that
/// never loads.
pub async fn run(config: CrawlConfig, catalog_path: Option<&Path>) -> Result<()> {
    let catalog = match catalog_path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => Catalog::digisus(),
    };
    info!("{} document types in catalog", catalog.documents.len());
    let sink = HttpSink::new(config.download_timeout).context("failed to build HTTP client")?;

    let mut renderer = ChromiumRenderer::launch(config.headless)
        .await
        .context("failed to launch Chromium")?;

    let finished = crawl(&renderer, sink, Arc::new(catalog), config).await;

    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("browser shutdown: {e:#}");
    }

    output::print_summary(&finished.summary);
    match finished.ending {
        Ending::Completed => Ok(()),
        Ending::Interrupted => bail!("interrupted"),
        Ending::Fatal(e) => Err(e).context("crawl aborted"),
    }
}

#[derive(Debug)]
enum Ending {
    Completed,
    Interrupted,
    Fatal(SessionError),
}

struct Finished {
    summary: CrawlSummary,
    ending: Ending,
}

impl Finished {
    /// A run that ended before the first state was visited.
    fn aborted(error: SessionError) -> Self {
        let mut summary = CrawlSummary::start();
        summary.finished_at = Some(summary.started_at);
        Self {
            summary,
            ending: Ending::Fatal(error),
        }
    }
}

async fn open_page(renderer: &dyn Renderer, config: &CrawlConfig) -> SessionResult<PageSession> {
    let context = renderer
        .new_context()
        .await
        .map_err(|e| SessionError::Browser(format!("failed to open a browser tab: {e:#}")))?;
    PageSession::open(context, &config.url, config.session).await
}

async fn crawl<S: DocumentSink>(
    renderer: &dyn Renderer,
    sink: S,
    catalog: Arc<Catalog>,
    config: CrawlConfig,
) -> Finished {
    let page = match open_page(renderer, &config).await {
        Ok(page) => page,
        Err(e) => {
            tracing::error!("failed to open {}: {e}", config.url);
            return Finished::aborted(e);
        }
    };

    let (tx, rx) = progress::channel();
    let printer = tokio::spawn(output::print_progress(rx));

    let mut crawler = Crawler::new(page, sink, catalog, config).with_events(tx);
    let ending = tokio::select! {
        result = crawler.run() => match result {
            Ok(()) => Ending::Completed,
            Err(e) => Ending::Fatal(e),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping crawl");
            Ending::Interrupted
        }
    };

    // Dropping the crawler closes the event channel and lets the printer drain.
    let (page, _sink, mut summary) = crawler.into_parts();
    summary.finished_at.get_or_insert_with(chrono::Utc::now);
    match printer.await {
        Ok(0) => {}
        Ok(dropped) => tracing::warn!("{dropped} progress lines were not printed"),
        Err(e) => tracing::warn!("progress printer: {e}"),
    }
    if let Err(e) = page.close().await {
        tracing::debug!("closing tab: {e:#}");
    }

    Finished { summary, ending }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{NavigationResult, RenderContext};
    use crate::sink::DownloadError;
    use async_trait::async_trait;

    struct NoSink;

    #[async_trait]
    impl DocumentSink for NoSink {
        async fn materialize(&self, url: &str, _: &Path) -> Result<u64, DownloadError> {
            panic!("nothing should be downloaded, got {url}");
        }
    }

    /// A tab whose navigation always fails.
    struct DeadTab;

    #[async_trait]
    impl RenderContext for DeadTab {
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
            bail!("net::ERR_NAME_NOT_RESOLVED at {url}")
        }
        async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
            bail!("no page")
        }
        async fn get_html(&self) -> Result<String> {
            bail!("no page")
        }
        async fn press_key(&self, _key: &str) -> Result<()> {
            bail!("no page")
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct FakeBrowser {
        tabs_available: bool,
    }

    #[async_trait]
    impl Renderer for FakeBrowser {
        async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
            if self.tabs_available {
                Ok(Box::new(DeadTab))
            } else {
                bail!("Target.createTarget: browser has disconnected")
            }
        }
        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            url: "https://portal.invalid/".into(),
            ..CrawlConfig::default()
        }
    }

    async fn run_against(browser: FakeBrowser) -> Finished {
        crawl(&browser, NoSink, Arc::new(Catalog::digisus()), config()).await
    }

    #[tokio::test]
    async fn test_tab_that_cannot_open_still_yields_summary() {
        let finished = run_against(FakeBrowser {
            tabs_available: false,
        })
        .await;

        let Ending::Fatal(err) = &finished.ending else {
            panic!("expected a fatal ending, got {:?}", finished.ending);
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("browser tab"));
        assert!(finished.summary.finished_at.is_some());
        assert_eq!(finished.summary.downloaded, 0);
    }

    #[tokio::test]
    async fn test_portal_that_never_loads_still_yields_summary() {
        let finished = run_against(FakeBrowser {
            tabs_available: true,
        })
        .await;

        assert!(matches!(finished.ending, Ending::Fatal(SessionError::Browser(_))));
        assert!(finished.summary.finished_at.is_some());
        assert_eq!(finished.summary.elapsed(), Some(chrono::Duration::zero()));
    }
}
