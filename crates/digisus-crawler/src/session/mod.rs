//! Page Session: facet selection and bounded waits on the live portal page.
//!
//! The traversal never touches the browser directly. It talks to a
//! [`FacetPage`], which owns the page, selects facet values, waits for the
//! asynchronously re-rendered results, and opens/closes the document modal.
//! Element references are never handed out: rows are addressed by
//! [`RowButton`] locators that are re-resolved at click time, and every read
//! of live DOM state goes through [`retry::retry_stale`].

pub mod page;
pub mod retry;
pub mod scripts;

pub use page::{PageSession, SessionConfig};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named selector controls of the portal's filter form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facet {
    /// State (`uf`).
    State,
    /// Plan phase (`fase`).
    Phase,
    /// Municipality (`municipio`), populated after a municipal phase is chosen.
    Municipality,
}

impl Facet {
    /// The `name` attribute of the `<select>` control.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::State => "uf",
            Self::Phase => "fase",
            Self::Municipality => "municipio",
        }
    }
}

impl std::fmt::Display for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One `<option>` of a facet selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetOption {
    pub value: String,
    pub label: String,
}

impl FacetOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }

    /// Placeholder entries ("Selecione...") carry an empty value.
    pub fn is_placeholder(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Locator for a row's "Exibir lista de documentos" button: its position
/// among all such buttons on the page at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowButton {
    pub index: usize,
}

/// Snapshot of an open document-list dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalHandle {
    /// `outerHTML` of the visible `.modal-content`.
    pub html: String,
    /// Document base URI, for resolving relative download links.
    pub base_url: Option<String>,
}

/// Failures surfaced by a [`FacetPage`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The selector has no option with this value.
    #[error("facet '{field}' has no option '{value}'")]
    FacetNotFound { field: Facet, value: String },

    /// A live element vanished or was replaced and did not come back within
    /// the retry budget.
    #[error("stale reference: {0}")]
    StaleReference(String),

    /// The document dialog never became visible.
    #[error("modal did not open within {0:?}")]
    ModalTimeout(Duration),

    /// The browser session itself is unusable (crash, disconnect, CDP error).
    #[error("browser session failed: {0}")]
    Browser(String),
}

impl SessionError {
    /// Only a broken browser session ends the run; everything else is
    /// absorbed by the traversal at the smallest enclosing scope.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Browser(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// The operations the traversal needs from the portal page.
#[async_trait]
pub trait FacetPage: Send {
    /// All options of a selector, in page order, placeholders included.
    async fn facet_options(&mut self, facet: Facet) -> SessionResult<Vec<FacetOption>>;

    /// Set a selector to `value` and fire its change events.
    async fn select_facet(&mut self, facet: Facet, value: &str) -> SessionResult<()>;

    /// Display text of the currently selected option.
    async fn current_selection_label(&mut self, facet: Facet) -> SessionResult<String>;

    /// Poll for the results table. `Ok(false)` on timeout: an empty facet
    /// combination legitimately renders no table.
    async fn wait_for_results_table(&mut self, timeout: Duration) -> SessionResult<bool>;

    /// Poll until the municipality selector holds more than its placeholder,
    /// then read its options. `Ok(None)` on timeout.
    async fn wait_for_municipality_options(
        &mut self,
        timeout: Duration,
    ) -> SessionResult<Option<Vec<FacetOption>>>;

    /// HTML snapshot of the page the results table lives in.
    async fn results_html(&mut self) -> SessionResult<String>;

    /// Click a row button and wait for the dialog to become visible.
    async fn open_modal_for(
        &mut self,
        button: RowButton,
        timeout: Duration,
    ) -> SessionResult<ModalHandle>;

    /// Dismiss the dialog: close button first, Escape as fallback. Bounded.
    async fn close_modal(&mut self) -> SessionResult<()>;
}
