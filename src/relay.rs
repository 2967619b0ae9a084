//! The privileged persistence context.
//!
//! The relay owns the only handle to the host save capability. Pages reach it
//! through [`RelayHandle`] with a serialized `downloadImage` request and get back
//! exactly one [`DownloadOutcome`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::capture::CaptureResult;
use crate::error::{NodeshotError, Result};
use crate::protocol::{parse_data_url, DownloadOutcome, RelayRequest};

/// A file written by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub id: u64,
    pub path: PathBuf,
}

/// Host-level, single-shot save capability.
#[async_trait]
pub trait SaveHost: Send + Sync {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<SavedFile>;
}

/// Saves into a directory the way a browser download manager does:
/// never overwrites, suffixes clashing names with ` (n)`.
pub struct DownloadDir {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename.starts_with('.')
        || filename.contains(['/', '\\'])
        || filename.chars().any(char::is_control);
    if invalid {
        return Err(NodeshotError::DownloadFailure(format!(
            "Invalid filename: {:?}",
            filename
        )));
    }
    Ok(())
}

/// `name.ext`, `name (1).ext`, `name (2).ext`, ...
fn candidate_name(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{} ({}).{}", stem, attempt, ext),
        None => format!("{} ({})", filename, attempt),
    }
}

const MAX_UNIQUIFY_ATTEMPTS: u32 = 100;

#[async_trait]
impl SaveHost for DownloadDir {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<SavedFile> {
        validate_filename(filename)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        for attempt in 0..MAX_UNIQUIFY_ATTEMPTS {
            let path = self.dir.join(candidate_name(filename, attempt));
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(bytes).await?;
            file.flush().await?;

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            return Ok(SavedFile { id, path });
        }

        Err(NodeshotError::DownloadFailure(format!(
            "Could not find a free name for {}",
            filename
        )))
    }
}

struct Envelope {
    body: String,
    reply: oneshot::Sender<String>,
}

/// Page-side sender into the persistence context.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl RelayHandle {
    /// Hand one capture to the privileged context and wait for its outcome.
    pub async fn deliver(&self, result: &CaptureResult) -> Result<DownloadOutcome> {
        let request = RelayRequest::DownloadImage {
            data_url: result.to_data_url(),
            filename: result.filename.clone(),
        };
        let body = serde_json::to_string(&request)?;

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { body, reply })
            .map_err(|_| relay_gone())?;
        let response = rx.await.map_err(|_| relay_gone())?;

        serde_json::from_str(&response).map_err(|e| {
            NodeshotError::CommunicationFailure(format!("Malformed relay response: {}", e))
        })
    }
}

fn relay_gone() -> NodeshotError {
    NodeshotError::CommunicationFailure("Persistence relay is not running".to_string())
}

/// The privileged handler loop.
pub struct PersistenceRelay {
    host: Arc<dyn SaveHost>,
}

impl PersistenceRelay {
    pub fn new(host: Arc<dyn SaveHost>) -> Self {
        Self { host }
    }

    pub fn spawn(self) -> RelayHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        RelayHandle { tx }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(Envelope { body, reply }) = rx.recv().await {
            let outcome = self.handle(&body).await;
            match serde_json::to_string(&outcome) {
                Ok(response) => {
                    let _ = reply.send(response);
                }
                Err(e) => tracing::error!("Failed to encode download outcome: {}", e),
            }
        }
    }

    async fn handle(&self, body: &str) -> DownloadOutcome {
        let request: RelayRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed relay request: {}", e);
                return DownloadOutcome::Failed {
                    error: format!("Malformed request: {}", e),
                };
            }
        };

        match request {
            RelayRequest::DownloadImage { data_url, filename } => {
                self.download(&data_url, &filename).await
            }
        }
    }

    async fn download(&self, data_url: &str, filename: &str) -> DownloadOutcome {
        let bytes = match parse_data_url(data_url) {
            Ok((_, bytes)) => bytes,
            Err(error) => return DownloadOutcome::Failed { error },
        };

        match self.host.save(&bytes, filename).await {
            Ok(saved) => {
                tracing::info!("Saved {} ({} bytes)", saved.path.display(), bytes.len());
                DownloadOutcome::Saved {
                    id: saved.id,
                    path: Some(saved.path.display().to_string()),
                }
            }
            Err(e) => {
                tracing::warn!("Save of {} failed: {}", filename, e);
                let error = match e {
                    NodeshotError::DownloadFailure(msg) => msg,
                    other => other.to_string(),
                };
                DownloadOutcome::Failed { error }
            }
        }
    }
}
