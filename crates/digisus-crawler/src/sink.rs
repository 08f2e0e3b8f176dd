//! Download Sink: streams a resolved link to its target path.
//!
//! The body is written to `<destination>.part` through a fixed-size buffer
//! and renamed into place only once complete, so a destination either holds
//! the whole file or does not exist. No retries happen here: a failed
//! download leaves nothing behind and the next run picks it up again.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Write buffer size; bounds memory use regardless of file size.
pub const CHUNK_SIZE: usize = 8192;

/// Failures of a single download.
#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("{url} answered HTTP {status}")]
    BadStatus { url: String, status: u16 },

    #[error("download of {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn http_error(url: &str, err: reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout {
            url: url.to_string(),
        }
    } else {
        DownloadError::Http {
            url: url.to_string(),
            source: err,
        }
    }
}

/// Something that can materialise a URL at a path.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Fetch `url` into `destination`, creating parent directories.
    /// Returns the number of bytes written.
    async fn materialize(&self, url: &str, destination: &Path) -> Result<u64, DownloadError>;
}

/// Sibling path the body is streamed into before the final rename.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// [`DocumentSink`] over HTTP(S).
#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    /// Create a sink whose requests (including the body) are bounded by `timeout`.
    ///
    /// Fails if the TLS backend cannot be initialised; the timeout is never
    /// silently dropped.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) \
                  AppleWebKit/537.36 (KHTML, like Gecko) \
                  Chrome/131.0.0.0 Safari/537.36";

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()?;

        Ok(Self { client })
    }

    async fn stream_to(&self, url: &str, partial: &Path) -> Result<u64, DownloadError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let file = tokio::fs::File::create(partial)
            .await
            .map_err(io_error(partial))?;
        let mut out = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut body = resp.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| http_error(url, e))?;
            out.write_all(&chunk).await.map_err(io_error(partial))?;
            written += chunk.len() as u64;
        }
        out.flush().await.map_err(io_error(partial))?;
        out.into_inner()
            .sync_all()
            .await
            .map_err(io_error(partial))?;

        Ok(written)
    }
}

#[async_trait]
impl DocumentSink for HttpSink {
    async fn materialize(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        let partial = partial_path(destination);
        match self.stream_to(url, &partial).await {
            Ok(written) => {
                tokio::fs::rename(&partial, destination)
                    .await
                    .map_err(io_error(destination))?;
                tracing::debug!("wrote {written} bytes to {}", destination.display());
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}
