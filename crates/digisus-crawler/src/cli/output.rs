//! Console output: per-download progress lines and the final tally.
//!
//! Global flags are passed down from `main` through environment variables,
//! so any module can check them without threading them through calls.

use crate::crawler::CrawlSummary;
use crate::progress::{CrawlEventKind, ProgressReceiver};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

pub const QUIET_ENV: &str = "DIGISUS_QUIET";
pub const JSON_ENV: &str = "DIGISUS_JSON";

/// `--quiet` was given.
pub fn is_quiet() -> bool {
    std::env::var(QUIET_ENV).is_ok()
}

/// `--json` was given.
pub fn is_json() -> bool {
    std::env::var(JSON_ENV).is_ok()
}

/// The line printed when a download starts.
pub fn format_download_line(
    state: &str,
    municipality: Option<&str>,
    document: &str,
    year: &str,
    fallback: bool,
) -> String {
    let scope = match municipality {
        Some(name) => format!("{name:<20}"),
        None => "ESTADUAL".to_string(),
    };
    let note = if fallback { " (last current)" } else { "" };
    format!("{state:<25} | {scope} | {document:<28} | {year} … downloading{note}")
}

/// Print download lines for every `DownloadStarted` event until the
/// channel closes. Returns how many events were dropped because the printer
/// fell behind.
pub async fn print_progress(mut rx: ProgressReceiver) -> u64 {
    let mut dropped = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let CrawlEventKind::DownloadStarted {
                    state,
                    municipality,
                    document,
                    year,
                    fallback,
                    ..
                } = &event.event
                {
                    if !is_quiet() && !is_json() {
                        println!(
                            "{}",
                            format_download_line(state, municipality.as_deref(), document, year, *fallback)
                        );
                    }
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("progress printer fell behind, {missed} events not shown");
                dropped += missed;
            }
            Err(RecvError::Closed) => break,
        }
    }
    dropped
}

/// Print the final tally. Always shown, even with `--quiet`.
pub fn print_summary(summary: &CrawlSummary) {
    if is_json() {
        print_json(summary);
        return;
    }

    println!();
    println!("Done – {} PDF(s) downloaded", summary.downloaded);
    if !is_quiet() {
        println!(
            "  already present: {}  fallback links: {}  no link: {}  failed: {}  skipped: {}",
            summary.already_present,
            summary.fallbacks,
            summary.not_found,
            summary.failed,
            summary.skipped
        );
        if let Some(elapsed) = summary.elapsed() {
            println!("  elapsed: {}s", elapsed.num_seconds());
        }
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("  Error: could not encode JSON: {e}"),
    }
}
