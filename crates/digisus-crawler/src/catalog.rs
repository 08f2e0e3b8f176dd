//! Facet catalog: static configuration for the DigiSUS download portal.
//!
//! Maps each document type to its valid year set per jurisdiction level,
//! the label expected in a modal's "current documents" table, and the
//! label used as a storage path segment. Also holds the two disjoint phase
//! sets that decide whether a phase is walked at state or municipal level.
//!
//! The catalog is built once at startup and shared by reference; nothing in
//! it changes while the crawl runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Jurisdiction level a phase (and therefore a document table) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// State-wide documents, stored under `Estadual/`.
    State,
    /// Per-municipality documents, stored under `Municipal/<name>/`.
    Municipal,
}

impl Level {
    /// Directory segment used in the output tree.
    pub fn segment(&self) -> &'static str {
        match self {
            Self::State => "Estadual",
            Self::Municipal => "Municipal",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "ESTADUAL"),
            Self::Municipal => write!(f, "MUNICIPAL"),
        }
    }
}

/// One document type published by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSpec {
    /// Heading text of the document's section in the results table.
    pub key: String,
    /// Years downloaded when walking a state phase.
    pub state_years: BTreeSet<String>,
    /// Years downloaded when walking a municipal phase.
    pub municipal_years: BTreeSet<String>,
    /// First-cell label of the row expected under "Documentos Vigentes".
    pub vigente_label: String,
    /// Path segment the downloaded files are stored under.
    pub doc_label: String,
}

impl DocumentSpec {
    /// The year set that applies at `level`. Never mixes the two tables.
    pub fn valid_years(&self, level: Level) -> &BTreeSet<String> {
        match level {
            Level::State => &self.state_years,
            Level::Municipal => &self.municipal_years,
        }
    }

    /// Whether `year` should be downloaded at `level`.
    pub fn accepts(&self, level: Level, year: &str) -> bool {
        self.valid_years(level).contains(year)
    }
}

/// Errors raised while loading a catalog override.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("phase '{0}' is listed as both a state and a municipal phase")]
    OverlappingPhase(String),

    #[error("catalog defines no documents")]
    Empty,
}

/// The full facet catalog: document specs in traversal order plus phase sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub documents: Vec<DocumentSpec>,
    pub state_phases: BTreeSet<String>,
    pub municipal_phases: BTreeSet<String>,
}

fn years(list: impl IntoIterator<Item = u16>) -> BTreeSet<String> {
    list.into_iter().map(|y| y.to_string()).collect()
}

fn phases(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|p| p.to_string()).collect()
}

impl Catalog {
    /// The tables the DigiSUS portal publishes.
    pub fn digisus() -> Self {
        let doc = |key: &str, state: BTreeSet<String>, municipal: BTreeSet<String>, vig: &str, label: &str| {
            DocumentSpec {
                key: key.to_string(),
                state_years: state,
                municipal_years: municipal,
                vigente_label: vig.to_string(),
                doc_label: label.to_string(),
            }
        };

        Self {
            documents: vec![
                doc(
                    "Plano de Saúde",
                    years([2020, 2024]),
                    years([2019, 2022]),
                    "Plano de Saúde",
                    "Plano de Saúde",
                ),
                doc(
                    "Programação Anual de Saúde",
                    years(2020..=2025),
                    years(2020..=2025),
                    "Programação Anual de Saúde",
                    "Programação Anual de Saúde",
                ),
                doc(
                    "Relatório Anual de Gestão",
                    years(2020..=2025),
                    years(2020..=2025),
                    "Relatório Anual de Gestão",
                    "RAG",
                ),
                doc(
                    "RAG",
                    years(2020..=2025),
                    years(2020..=2025),
                    "Relatório Anual de Gestão",
                    "RAG",
                ),
            ],
            state_phases: phases(&["2016 a 2019", "2020 a 2023", "2024 a 2027"]),
            municipal_phases: phases(&["2018 a 2021", "2022 a 2025"]),
        }
    }

    /// Parse a catalog from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog override file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.documents.is_empty() {
            return Err(CatalogError::Empty);
        }
        if let Some(phase) = self.state_phases.intersection(&self.municipal_phases).next() {
            return Err(CatalogError::OverlappingPhase(phase.clone()));
        }
        Ok(())
    }

    /// Decide which branch a phase label runs. `None` means the phase is not
    /// walked at all.
    pub fn classify_phase(&self, phase: &str) -> Option<Level> {
        let phase = phase.trim();
        if self.state_phases.contains(phase) {
            Some(Level::State)
        } else if self.municipal_phases.contains(phase) {
            Some(Level::Municipal)
        } else {
            None
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::digisus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_years_are_level_specific() {
        let catalog = Catalog::digisus();
        for doc in &catalog.documents {
            assert!(std::ptr::eq(doc.valid_years(Level::State), &doc.state_years));
            assert!(std::ptr::eq(
                doc.valid_years(Level::Municipal),
                &doc.municipal_years
            ));
        }

        let plano = &catalog.documents[0];
        assert!(plano.accepts(Level::State, "2020"));
        assert!(!plano.accepts(Level::Municipal, "2020"));
        assert!(plano.accepts(Level::Municipal, "2019"));
        assert!(!plano.accepts(Level::State, "2019"));
    }

    #[test]
    fn test_document_order_and_labels() {
        let catalog = Catalog::digisus();
        let keys: Vec<&str> = catalog.documents.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "Plano de Saúde",
                "Programação Anual de Saúde",
                "Relatório Anual de Gestão",
                "RAG"
            ]
        );
        let rag = &catalog.documents[3];
        assert_eq!(rag.vigente_label, "Relatório Anual de Gestão");
        assert_eq!(rag.doc_label, "RAG");
        assert_eq!(rag.state_years.len(), 6);
    }

    #[test]
    fn test_classify_phase() {
        let catalog = Catalog::digisus();
        assert_eq!(catalog.classify_phase("2016 a 2019"), Some(Level::State));
        assert_eq!(catalog.classify_phase(" 2022 a 2025 "), Some(Level::Municipal));
        assert_eq!(catalog.classify_phase("2030 a 2033"), None);
        assert_eq!(catalog.classify_phase(""), None);
    }

    #[test]
    fn test_phase_sets_disjoint() {
        let catalog = Catalog::digisus();
        assert!(catalog.validate().is_ok());
        assert_eq!(
            catalog
                .state_phases
                .intersection(&catalog.municipal_phases)
                .count(),
            0
        );
    }

    #[test]
    fn test_from_json_roundtrip_and_overlap() {
        let json = serde_json::to_string(&Catalog::digisus()).unwrap();
        let parsed = Catalog::from_json(&json).unwrap();
        assert_eq!(parsed, Catalog::digisus());

        let mut bad = Catalog::digisus();
        bad.municipal_phases.insert("2016 a 2019".to_string());
        let json = serde_json::to_string(&bad).unwrap();
        assert!(matches!(
            Catalog::from_json(&json),
            Err(CatalogError::OverlappingPhase(p)) if p == "2016 a 2019"
        ));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let json = r#"{"documents": [], "state_phases": [], "municipal_phases": []}"#;
        assert!(matches!(Catalog::from_json(json), Err(CatalogError::Empty)));
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::State.segment(), "Estadual");
        assert_eq!(Level::Municipal.segment(), "Municipal");
        assert_eq!(Level::State.to_string(), "ESTADUAL");
    }
}
