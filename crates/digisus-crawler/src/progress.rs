// Copyright 2026 DigiSUS Crawler Contributors
// SPDX-License-Identifier: Apache-2.0

//! Crawl event types and broadcast channel for run telemetry.
//!
//! The traversal emits `CrawlEvent`s as it walks the portal, which flow
//! through a `tokio::sync::broadcast` channel to every subscriber (console
//! output, tests). When no subscriber exists, events are silently dropped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single event emitted during a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEvent {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// The kind of event.
    pub event: CrawlEventKind,
}

/// The specific kind of crawl event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrawlEventKind {
    /// A download is about to start.
    DownloadStarted {
        target: PathBuf,
        state: String,
        /// Upper-cased municipality, absent for state-level documents.
        municipality: Option<String>,
        document: String,
        year: String,
        fallback: bool,
    },
    /// A download finished and the file is in place.
    DownloadCompleted { target: PathBuf, bytes: u64 },
    /// A download failed; the target was left absent.
    DownloadFailed { target: PathBuf, reason: String },
    /// The target already exists from an earlier run.
    AlreadyPresent { target: PathBuf },
    /// The dialog had no usable current-documents link.
    LinkNotFound { document: String, year: String },
    /// A subtree of the traversal was skipped.
    Skipped { scope: SkipScope, reason: String },
}

/// Which level of the traversal a skip applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipScope {
    State { state: String },
    Phase { state: String, phase: String },
    Municipality { state: String, municipality: String },
    Document { document: String },
    Row { document: String, year: String },
}

impl std::fmt::Display for SkipScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State { state } => write!(f, "{state}"),
            Self::Phase { state, phase } => write!(f, "{state} | phase '{phase}'"),
            Self::Municipality {
                state,
                municipality,
            } => write!(f, "{state} | {municipality}"),
            Self::Document { document } => write!(f, "{document}"),
            Self::Row { document, year } => write!(f, "{document} | {year}"),
        }
    }
}

/// Sender handle for emitting crawl events.
pub type ProgressSender = tokio::sync::broadcast::Sender<CrawlEvent>;

/// Receiver handle for consuming crawl events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<CrawlEvent>;

/// Create a new crawl event channel with a bounded buffer.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(1024)
}

/// Convenience helper: emit an event, silently ignoring send errors
/// (which occur when no receivers are listening).
pub fn emit(tx: &Option<ProgressSender>, seq: &mut u64, event: CrawlEventKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(CrawlEvent { seq: *seq, event });
    }
}
