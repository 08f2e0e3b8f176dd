//! Facet selection values and deterministic download paths.
//!
//! A [`FacetSelection`] is an immutable snapshot of the state, phase and
//! (optional) municipality currently selected on the page. It is built from
//! labels read fresh after each facet change and threaded down the traversal,
//! so nothing below the Page Session queries live UI state for names.

use crate::catalog::Level;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A state or municipality as offered by a facet selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Jurisdiction {
    /// Option value submitted by the selector.
    pub code: String,
    /// Option text shown to the user.
    pub display_name: String,
    pub level: Level,
}

/// The facet values in effect while a document table is walked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetSelection {
    pub state: Jurisdiction,
    pub phase: String,
    pub level: Level,
    pub municipality: Option<Jurisdiction>,
}

impl FacetSelection {
    /// Selection for a state-level phase.
    pub fn state_level(state: Jurisdiction, phase: impl Into<String>) -> Self {
        Self {
            state,
            phase: phase.into(),
            level: Level::State,
            municipality: None,
        }
    }

    /// Narrow a selection to one municipality of its state.
    pub fn with_municipality(&self, municipality: Jurisdiction) -> Self {
        Self {
            state: self.state.clone(),
            phase: self.phase.clone(),
            level: Level::Municipal,
            municipality: Some(municipality),
        }
    }

    /// Municipality display name, upper-cased as stored on disk.
    pub fn municipality_name(&self) -> Option<String> {
        self.municipality
            .as_ref()
            .map(|m| m.display_name.trim().to_uppercase())
    }

    /// Column shown in progress lines: the level tag or the municipality.
    pub fn scope_label(&self) -> String {
        self.municipality_name()
            .unwrap_or_else(|| self.level.to_string())
    }
}

/// Collapse every whitespace run in a display label into a single `_`.
pub fn path_component(label: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let re = WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex is valid"));
    re.replace_all(label.trim(), "_").into_owned()
}

/// Where a resolved document is materialised.
///
/// `root/<state>/<Estadual|Municipal>[/<MUNICIPALITY>]/<docLabel>/<year>.pdf`
/// A pure function of its inputs so re-runs land on the same files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTarget {
    path: PathBuf,
}

impl DownloadTarget {
    pub fn new(
        root: &Path,
        jurisdiction: &str,
        level: Level,
        municipality: Option<&str>,
        doc_label: &str,
        year: &str,
    ) -> Self {
        let mut path = root.join(path_component(jurisdiction)).join(level.segment());
        if let Some(name) = municipality {
            path.push(path_component(&name.to_uppercase()));
        }
        path.push(path_component(doc_label));
        path.push(format!("{}.pdf", year.trim()));
        Self { path }
    }

    /// Target for a document row under the given facet selection.
    pub fn for_selection(root: &Path, selection: &FacetSelection, doc_label: &str, year: &str) -> Self {
        let municipality = selection
            .municipality
            .as_ref()
            .map(|m| m.display_name.as_str());
        Self::new(
            root,
            &selection.state.display_name,
            selection.level,
            municipality,
            doc_label,
            year,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl std::fmt::Display for DownloadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str) -> Jurisdiction {
        Jurisdiction {
            code: "35".to_string(),
            display_name: name.to_string(),
            level: Level::State,
        }
    }

    #[test]
    fn test_path_component_collapses_whitespace() {
        assert_eq!(path_component("São Paulo"), "São_Paulo");
        assert_eq!(path_component("Mato  Grosso\tdo Sul"), "Mato_Grosso_do_Sul");
        assert_eq!(path_component("  Acre "), "Acre");
        assert_eq!(path_component("RAG"), "RAG");
    }

    #[test]
    fn test_municipal_target_is_deterministic() {
        let root = Path::new("root");
        let a = DownloadTarget::new(root, "São Paulo", Level::Municipal, Some("Campinas"), "RAG", "2023");
        let b = DownloadTarget::new(root, "São Paulo", Level::Municipal, Some("Campinas"), "RAG", "2023");
        assert_eq!(a, b);
        assert_eq!(
            a.path(),
            Path::new("root/São_Paulo/Municipal/CAMPINAS/RAG/2023.pdf")
        );
    }

    #[test]
    fn test_state_target_has_no_municipality_segment() {
        let t = DownloadTarget::new(Path::new("root"), "Acre", Level::State, None, "Plano de Saúde", "2020");
        assert_eq!(t.path(), Path::new("root/Acre/Estadual/Plano_de_Saúde/2020.pdf"));
    }

    #[test]
    fn test_for_selection_matches_new() {
        let sel = FacetSelection::state_level(state("Rio Grande do Sul"), "2022 a 2025");
        let mun = sel.with_municipality(Jurisdiction {
            code: "431490".to_string(),
            display_name: "Porto Alegre".to_string(),
            level: Level::Municipal,
        });
        let t = DownloadTarget::for_selection(Path::new("out"), &mun, "RAG", "2021");
        assert_eq!(
            t.path(),
            Path::new("out/Rio_Grande_do_Sul/Municipal/PORTO_ALEGRE/RAG/2021.pdf")
        );
        assert_eq!(mun.scope_label(), "PORTO ALEGRE");
        assert_eq!(sel.scope_label(), "ESTADUAL");
    }
}
