//! Runtime configuration and resolution of the output root.

use crate::session::SessionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download page of the DigiSUS transparency portal.
pub const PORTAL_URL: &str = "https://digisusgmp.saude.gov.br/v1.5/transparencia/downloads";

/// Output root used when neither `--out` nor the environment names one.
pub const DEFAULT_OUT_DIR: &str = "Documentos_Saude_Brasil";

/// Environment variable overriding the default output root.
pub const OUT_DIR_ENV: &str = "DIGISUS_OUT_DIR";

/// Everything the traversal needs to know besides the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlConfig {
    /// Page the filter form lives on.
    pub url: String,
    /// Root of the download tree.
    pub out_dir: PathBuf,
    /// Run Chromium without a window.
    pub headless: bool,
    /// Wait for the results table after a facet change.
    pub table_timeout: Duration,
    /// Tries at the results table after selecting a municipality.
    pub table_attempts: u32,
    /// Wait for the municipality selector to populate.
    pub municipality_timeout: Duration,
    /// Wait for a document dialog to become visible.
    pub modal_timeout: Duration,
    /// Bound on a whole download, body included.
    pub download_timeout: Duration,
    /// Page Session timing.
    pub session: SessionConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            url: PORTAL_URL.to_string(),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            headless: true,
            table_timeout: Duration::from_secs(30),
            table_attempts: 2,
            municipality_timeout: Duration::from_secs(15),
            modal_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(90),
            session: SessionConfig::default(),
        }
    }
}

/// Resolve the output root: explicit flag, then `DIGISUS_OUT_DIR`, then the
/// default directory under the working directory.
pub fn resolve_out_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var(OUT_DIR_ENV) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }

    PathBuf::from(DEFAULT_OUT_DIR)
}
