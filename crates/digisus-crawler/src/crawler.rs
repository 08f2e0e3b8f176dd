//! Traversal Engine: walks state × phase × municipality × document × year.
//!
//! Each level catches what it can recover from and turns it into a logged
//! skip of its own subtree. Only a [`SessionError`](crate::session::SessionError)
//! that reports itself as fatal (the browser went away) leaves
//! [`Crawler::run`]; the summary is finalised either way.

use crate::catalog::{Catalog, DocumentSpec, Level};
use crate::config::CrawlConfig;
use crate::progress::{self, CrawlEventKind, ProgressSender, SkipScope};
use crate::resolver::{self, ModalResolution};
use crate::session::{Facet, FacetOption, FacetPage, RowButton, SessionResult};
use crate::sink::DocumentSink;
use crate::table::{normalize_space, section_rows};
use crate::target::{DownloadTarget, FacetSelection, Jurisdiction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tally of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Files written during this run.
    pub downloaded: u64,
    /// Of those, how many came from the last-link fallback.
    pub fallbacks: u64,
    /// Targets that already existed and were left alone.
    pub already_present: u64,
    /// Dialogs without a usable current-documents link.
    pub not_found: u64,
    /// Downloads that failed and left no file.
    pub failed: u64,
    /// Subtrees skipped at any level.
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlSummary {
    /// Empty tally stamped with the current time.
    pub fn start() -> Self {
        Self {
            downloaded: 0,
            fallbacks: 0,
            already_present: 0,
            not_found: 0,
            failed: 0,
            skipped: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Wall-clock duration, once the run has finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Drives a [`FacetPage`] through every facet combination and hands
/// resolved links to a [`DocumentSink`].
pub struct Crawler<P, S> {
    page: P,
    sink: S,
    catalog: Arc<Catalog>,
    config: CrawlConfig,
    events: Option<ProgressSender>,
    seq: u64,
    summary: CrawlSummary,
}

impl<P: FacetPage, S: DocumentSink> Crawler<P, S> {
    pub fn new(page: P, sink: S, catalog: Arc<Catalog>, config: CrawlConfig) -> Self {
        Self {
            page,
            sink,
            catalog,
            config,
            events: None,
            seq: 0,
            summary: CrawlSummary::start(),
        }
    }

    /// Publish crawl events on `tx`.
    pub fn with_events(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    /// Give back the page and sink (for teardown) along with the tally.
    pub fn into_parts(self) -> (P, S, CrawlSummary) {
        (self.page, self.sink, self.summary)
    }

    /// Walk the whole portal. `Err` only for a fatal session failure.
    pub async fn run(&mut self) -> SessionResult<()> {
        info!(
            "crawling {} into {}",
            self.config.url,
            self.config.out_dir.display()
        );
        let result = self.walk_states().await;
        self.summary.finished_at = Some(Utc::now());
        if let Err(e) = &result {
            warn!("crawl aborted: {e}");
        }
        result
    }

    fn emit(&mut self, event: CrawlEventKind) {
        progress::emit(&self.events, &mut self.seq, event);
    }

    fn skip(&mut self, scope: SkipScope, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("{scope}: {reason}, skipping");
        self.summary.skipped += 1;
        self.emit(CrawlEventKind::Skipped { scope, reason });
    }

    /// Pass a session result through, turning a recoverable error into a
    /// skip of `scope`. `Ok(None)` means the caller should move on.
    fn settle<T>(&mut self, scope: &SkipScope, result: SessionResult<T>) -> SessionResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.skip(scope.clone(), e.to_string());
                Ok(None)
            }
        }
    }

    async fn walk_states(&mut self) -> SessionResult<()> {
        let scope = SkipScope::State {
            state: "all states".to_string(),
        };
        let listed = self.page.facet_options(Facet::State).await;
        let Some(states) = self.settle(&scope, listed)? else {
            return Ok(());
        };

        for option in states.iter().filter(|o| !o.is_placeholder()) {
            self.visit_state(option).await?;
        }
        Ok(())
    }

    async fn visit_state(&mut self, option: &FacetOption) -> SessionResult<()> {
        let scope = SkipScope::State {
            state: normalize_space(&option.label),
        };

        let selected = self.page.select_facet(Facet::State, &option.value).await;
        if self.settle(&scope, selected)?.is_none() {
            return Ok(());
        }
        let label = self.page.current_selection_label(Facet::State).await;
        let Some(label) = self.settle(&scope, label)? else {
            return Ok(());
        };
        let state = Jurisdiction {
            code: option.value.clone(),
            display_name: normalize_space(&label),
            level: Level::State,
        };

        // Phase options are re-read under every state: the state change
        // re-renders the form.
        let listed = self.page.facet_options(Facet::Phase).await;
        let Some(phases) = self.settle(&scope, listed)? else {
            return Ok(());
        };
        for phase in phases.iter().filter(|o| !o.is_placeholder()) {
            self.visit_phase(&state, phase).await?;
        }
        Ok(())
    }

    async fn visit_phase(&mut self, state: &Jurisdiction, option: &FacetOption) -> SessionResult<()> {
        let scope = SkipScope::Phase {
            state: state.display_name.clone(),
            phase: normalize_space(&option.label),
        };

        let selected = self.page.select_facet(Facet::Phase, &option.value).await;
        if self.settle(&scope, selected)?.is_none() {
            return Ok(());
        }
        let label = self.page.current_selection_label(Facet::Phase).await;
        let Some(label) = self.settle(&scope, label)? else {
            return Ok(());
        };
        let phase = normalize_space(&label);

        match self.catalog.classify_phase(&phase) {
            None => {
                debug!("{} | phase '{phase}' is not walked", state.display_name);
                Ok(())
            }
            Some(Level::State) => {
                let waited = self.page.wait_for_results_table(self.config.table_timeout).await;
                match self.settle(&scope, waited)? {
                    Some(true) => {
                        let selection = FacetSelection::state_level(state.clone(), phase);
                        self.walk_documents(&selection).await
                    }
                    Some(false) => {
                        self.skip(scope, "no results table");
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
            Some(Level::Municipal) => self.visit_municipalities(state, phase, scope).await,
        }
    }

    async fn visit_municipalities(
        &mut self,
        state: &Jurisdiction,
        phase: String,
        scope: SkipScope,
    ) -> SessionResult<()> {
        let waited = self
            .page
            .wait_for_municipality_options(self.config.municipality_timeout)
            .await;
        let Some(options) = self.settle(&scope, waited)? else {
            return Ok(());
        };
        let Some(options) = options else {
            self.skip(scope, "no municipalities");
            return Ok(());
        };

        let base = FacetSelection {
            state: state.clone(),
            phase,
            level: Level::Municipal,
            municipality: None,
        };
        for option in options.iter().filter(|o| !o.is_placeholder()) {
            self.visit_municipality(&base, option).await?;
        }
        Ok(())
    }

    async fn visit_municipality(
        &mut self,
        base: &FacetSelection,
        option: &FacetOption,
    ) -> SessionResult<()> {
        let scope = SkipScope::Municipality {
            state: base.state.display_name.clone(),
            municipality: normalize_space(&option.label).to_uppercase(),
        };

        let selected = self.page.select_facet(Facet::Municipality, &option.value).await;
        if self.settle(&scope, selected)?.is_none() {
            return Ok(());
        }
        let label = self.page.current_selection_label(Facet::Municipality).await;
        let Some(label) = self.settle(&scope, label)? else {
            return Ok(());
        };
        let selection = base.with_municipality(Jurisdiction {
            code: option.value.clone(),
            display_name: normalize_space(&label),
            level: Level::Municipal,
        });

        let mut ready = false;
        for _ in 0..self.config.table_attempts.max(1) {
            let waited = self.page.wait_for_results_table(self.config.table_timeout).await;
            match self.settle(&scope, waited)? {
                Some(true) => {
                    ready = true;
                    break;
                }
                Some(false) => {}
                None => return Ok(()),
            }
        }
        if !ready {
            self.skip(scope, format!("phase '{}' has no results table", base.phase));
            return Ok(());
        }

        self.walk_documents(&selection).await
    }

    /// The Document×Year loop shared by both branches.
    async fn walk_documents(&mut self, selection: &FacetSelection) -> SessionResult<()> {
        let catalog = Arc::clone(&self.catalog);

        for spec in &catalog.documents {
            let scope = SkipScope::Document {
                document: spec.key.clone(),
            };
            let snapshot = self.page.results_html().await;
            let Some(html) = self.settle(&scope, snapshot)? else {
                continue;
            };
            let Some(rows) = section_rows(&html, &spec.key) else {
                debug!("{}: no '{}' section", selection.scope_label(), spec.key);
                continue;
            };

            for row in rows {
                if !spec.accepts(selection.level, &row.year) {
                    continue;
                }
                let Some(button) = row.button else {
                    debug!("{} | {}: nothing published", spec.key, row.year);
                    continue;
                };
                self.visit_row(selection, spec, &row.year, button).await?;
            }
        }
        Ok(())
    }

    async fn visit_row(
        &mut self,
        selection: &FacetSelection,
        spec: &DocumentSpec,
        year: &str,
        button: RowButton,
    ) -> SessionResult<()> {
        let scope = SkipScope::Row {
            document: spec.key.clone(),
            year: year.to_string(),
        };

        let opened = self.page.open_modal_for(button, self.config.modal_timeout).await;
        if let Some(modal) = self.settle(&scope, opened)? {
            let resolution = resolver::resolve(&modal, &spec.vigente_label);
            self.handle_resolution(selection, spec, year, resolution).await;
        }

        self.close_and_settle(scope).await
    }

    async fn handle_resolution(
        &mut self,
        selection: &FacetSelection,
        spec: &DocumentSpec,
        year: &str,
        resolution: ModalResolution,
    ) {
        let Some(link) = resolution.link() else {
            info!(
                "{} | {} | {} | {year}: no current document link",
                selection.state.display_name,
                selection.scope_label(),
                spec.key
            );
            self.summary.not_found += 1;
            self.emit(CrawlEventKind::LinkNotFound {
                document: spec.key.clone(),
                year: year.to_string(),
            });
            return;
        };

        let target = DownloadTarget::for_selection(&self.config.out_dir, selection, &spec.doc_label, year);
        if target.exists() {
            debug!("{target} already present");
            self.summary.already_present += 1;
            self.emit(CrawlEventKind::AlreadyPresent {
                target: target.path().to_path_buf(),
            });
            return;
        }

        let fallback = resolution.is_fallback();
        self.emit(CrawlEventKind::DownloadStarted {
            target: target.path().to_path_buf(),
            state: selection.state.display_name.clone(),
            municipality: selection.municipality_name(),
            document: spec.key.clone(),
            year: year.to_string(),
            fallback,
        });

        match self.sink.materialize(link, target.path()).await {
            Ok(bytes) => {
                self.summary.downloaded += 1;
                if fallback {
                    self.summary.fallbacks += 1;
                }
                self.emit(CrawlEventKind::DownloadCompleted {
                    target: target.path().to_path_buf(),
                    bytes,
                });
            }
            Err(e) => {
                warn!("{target}: {e}");
                self.summary.failed += 1;
                self.emit(CrawlEventKind::DownloadFailed {
                    target: target.path().to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Dismiss the dialog and wait for the table to come back before the
    /// next row is clicked. A dialog that stays open is a skip of `scope`.
    async fn close_and_settle(&mut self, scope: SkipScope) -> SessionResult<()> {
        let closed = self.page.close_modal().await;
        self.settle(&scope, closed)?;
        match self.page.wait_for_results_table(self.config.table_timeout).await {
            Ok(true) => {}
            Ok(false) => debug!("results table did not re-settle"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("re-settling results table: {e}"),
        }
        Ok(())
    }
}
