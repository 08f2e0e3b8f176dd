//! Modal Link Resolver: picks the download link out of a document dialog.
//!
//! The dialog lists every uploaded version of a document. The authoritative
//! one sits in the table that follows the "Documentos Vigentes" heading, in
//! the row whose first cell equals the document's vigente label. When no row
//! carries that label the **last** link of that table is taken: the portal
//! lists versions oldest first.

use crate::session::ModalHandle;
use crate::table::{normalize_space, own_text};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

/// Heading text that introduces the current-documents table.
pub const CURRENT_DOCUMENTS_HEADING: &str = "Documentos Vigentes";
/// Links that point at an actual file download.
pub const DOWNLOAD_LINK: &str = "a[href*='/downloads/file/']";

/// Outcome of resolving a dialog against a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "link")]
pub enum ModalResolution {
    /// A row labelled exactly as requested was found; this is its link.
    Matched(String),
    /// No row matched; this is the last link of the current-documents table.
    FallbackLast(String),
    /// No current-documents table, or no download link in it.
    NotFound,
}

impl ModalResolution {
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::Matched(link) | Self::FallbackLast(link) => Some(link),
            Self::NotFound => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackLast(_))
    }
}

/// First `<tbody>` that follows the current-documents heading in document
/// order, skipping anything nested inside the heading itself.
fn current_documents_table<'a>(doc: &'a Html, h5: &Selector) -> Option<ElementRef<'a>> {
    let heading = doc
        .select(h5)
        .find(|h| own_text(h).contains(CURRENT_DOCUMENTS_HEADING))?;

    let mut past_heading = false;
    for node in doc.tree.root().descendants() {
        if node.id() == heading.id() {
            past_heading = true;
            continue;
        }
        if !past_heading || node.ancestors().any(|a| a.id() == heading.id()) {
            continue;
        }
        if let Some(el) = ElementRef::wrap(node) {
            if el.value().name() == "tbody" {
                return Some(el);
            }
        }
    }
    None
}

fn absolute(href: &str, base: Option<&str>) -> String {
    base.and_then(|b| Url::parse(b).ok())
        .and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

/// Resolve the download link for `target_label` in an open dialog.
///
/// Deterministic: the same dialog HTML always yields the same outcome.
pub fn resolve(modal: &ModalHandle, target_label: &str) -> ModalResolution {
    let fragment = Html::parse_fragment(&modal.html);
    let h5 = Selector::parse("h5").expect("static selector is valid");
    let link_sel = Selector::parse(DOWNLOAD_LINK).expect("static selector is valid");
    let base = modal.base_url.as_deref();
    let target = normalize_space(target_label);

    let Some(tbody) = current_documents_table(&fragment, &h5) else {
        return ModalResolution::NotFound;
    };

    // Only the first row carrying the label is considered.
    let labelled = tbody
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|tr| tr.value().name() == "tr")
        .find(|tr| {
            tr.children()
                .filter_map(ElementRef::wrap)
                .find(|td| td.value().name() == "td")
                .is_some_and(|td| normalize_space(&td.text().collect::<String>()) == target)
        });

    if let Some(href) = labelled
        .and_then(|row| row.select(&link_sel).next())
        .and_then(|a| a.value().attr("href"))
    {
        return ModalResolution::Matched(absolute(href, base));
    }

    match tbody
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .last()
    {
        Some(href) => ModalResolution::FallbackLast(absolute(href, base)),
        None => ModalResolution::NotFound,
    }
}
