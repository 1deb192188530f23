//! Bulk refresh of the cache from the published DGII registry archive.
//!
//! Pipeline: download (resumable) -> pick the text member of the zip ->
//! decode + detect delimiter -> map rows -> transactional batch upserts.
//! Parsing runs on a blocking thread and hands batches to the async writer
//! through a bounded channel, so memory stays at a few batches.
//!
//! Scratch files live in a [`TempDir`] owned by the run; it is removed on
//! every exit path.

use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::cache_store::{CacheStore, StoreError};
use crate::config::Config;
use crate::form_client::BROWSER_USER_AGENT;
use crate::models::TaxpayerProfile;
use crate::registry_file::{decode_registry, detect_delimiter, registry_rows};

const ARCHIVE_FILE_NAME: &str = "registry.zip";
const EXTRACTED_FILE_NAME: &str = "registry.txt";
/// Longest wait for response headers or the next body chunk.
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Registry download failed: {0}")]
    Download(String),
    #[error("Registry archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Registry archive has no .txt or .csv member")]
    NoRegistryMember,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache write failed: {0}")]
    Store(#[from] StoreError),
    #[error("Registry parser stopped: {0}")]
    Worker(String),
}

/// A fatal failure, with the records already committed before it happened.
#[derive(Debug, thiserror::Error)]
#[error("Registry import aborted after {committed} committed records: {error}")]
pub struct ImportFailure {
    pub committed: u64,
    #[source]
    pub error: ImportError,
}

impl ImportFailure {
    fn before_commit(error: impl Into<ImportError>) -> Self {
        Self {
            committed: 0,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Distinct identifiers written across all batches.
    pub committed: u64,
    /// Short, blank or unreadable rows.
    pub skipped: u64,
    pub batches: u64,
    pub encoding: String,
    pub lossy: bool,
    pub delimiter: char,
}

struct ParseSummary {
    skipped: u64,
    encoding: String,
    lossy: bool,
    delimiter: char,
}

pub struct BulkImporter {
    cache: Arc<dyn CacheStore>,
    client: reqwest::Client,
    archive_url: String,
    batch_size: usize,
    download_attempts: u32,
    retry_delay: Duration,
    stall_timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl BulkImporter {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        archive_url: impl Into<String>,
        batch_size: usize,
        download_attempts: u32,
    ) -> Result<Self, ImportError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ImportError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            cache,
            client,
            archive_url: archive_url.into(),
            batch_size: batch_size.max(1),
            download_attempts: download_attempts.max(1),
            retry_delay: Duration::from_secs(2),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            scratch_root: None,
        })
    }

    pub fn from_config(cache: Arc<dyn CacheStore>, config: &Config) -> Result<Self, ImportError> {
        Self::new(
            cache,
            config.registry_archive_url.clone(),
            config.import_batch_size,
            config.download_attempts,
        )
    }

    /// Base delay between download attempts; attempt `n` waits `n * delay`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// A transfer that produces no headers or bytes for this long fails the attempt.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Directory under which the per-run scratch directory is created.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Downloads the configured archive and imports it.
    pub async fn run(&self) -> Result<ImportReport, ImportFailure> {
        let workdir = self.scratch_dir().map_err(ImportFailure::before_commit)?;
        let archive = workdir.path().join(ARCHIVE_FILE_NAME);

        let result = match self.download(&archive).await {
            Ok(bytes) => {
                tracing::info!("Registry archive downloaded ({} bytes)", bytes);
                self.import_from(&archive, workdir.path()).await
            }
            Err(e) => Err(ImportFailure::before_commit(e)),
        };

        remove_scratch(workdir);
        result
    }

    /// Imports an archive that is already on disk. The archive itself is left in place.
    pub async fn import_archive(&self, archive: &Path) -> Result<ImportReport, ImportFailure> {
        let workdir = self.scratch_dir().map_err(ImportFailure::before_commit)?;
        let result = self.import_from(archive, workdir.path()).await;
        remove_scratch(workdir);
        result
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rnc-import-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    async fn download(&self, dest: &Path) -> Result<u64, ImportError> {
        let mut last_error = None;

        for attempt in 1..=self.download_attempts {
            match self.download_attempt(dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(
                        "Registry download attempt {}/{} failed: {}",
                        attempt,
                        self.download_attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.download_attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(ImportError::Download(format!(
            "gave up after {} attempts: {}",
            self.download_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// One transfer. Resumes with a `Range` request when a partial file exists.
    async fn download_attempt(&self, dest: &Path) -> Result<u64, ImportError> {
        let existing = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(&self.archive_url);
        if existing > 0 {
            tracing::info!("Resuming registry download at byte {}", existing);
            request = request.header(RANGE, format!("bytes={}-", existing));
        }

        let mut response = tokio::time::timeout(self.stall_timeout, request.send())
            .await
            .map_err(|_| self.stalled("response headers"))?
            .map_err(|e| ImportError::Download(e.to_string()))?;

        let status = response.status();
        let resume = match status {
            StatusCode::PARTIAL_CONTENT if existing > 0 => true,
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 => {
                // Nothing left past our offset
                return Ok(existing);
            }
            s if s.is_success() => false,
            s => return Err(ImportError::Download(format!("server returned status {}", s))),
        };

        let mut file = if resume {
            tokio::fs::OpenOptions::new().append(true).open(dest).await?
        } else {
            tokio::fs::File::create(dest).await?
        };
        let mut written = if resume { existing } else { 0 };

        while let Some(chunk) = tokio::time::timeout(self.stall_timeout, response.chunk())
            .await
            .map_err(|_| self.stalled("body chunk"))?
            .map_err(|e| ImportError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn stalled(&self, waiting_for: &str) -> ImportError {
        ImportError::Download(format!(
            "no {} within {:?}",
            waiting_for, self.stall_timeout
        ))
    }

    async fn import_from(
        &self,
        archive: &Path,
        workdir: &Path,
    ) -> Result<ImportReport, ImportFailure> {
        let archive = archive.to_path_buf();
        let workdir = workdir.to_path_buf();
        let text_path = tokio::task::spawn_blocking(move || extract_registry_member(&archive, &workdir))
            .await
            .map_err(|e| ImportFailure::before_commit(ImportError::Worker(e.to_string())))?
            .map_err(ImportFailure::before_commit)?;

        let batch_size = self.batch_size;
        let (tx, mut rx) = mpsc::channel::<Vec<TaxpayerProfile>>(4);
        let parser = tokio::task::spawn_blocking(move || parse_into_batches(&text_path, batch_size, tx));

        let mut committed = 0u64;
        let mut batches = 0u64;
        while let Some(batch) = rx.recv().await {
            match self.cache.upsert_batch(&batch).await {
                Ok(written) => {
                    committed += written;
                    batches += 1;
                    tracing::info!("Registry batch {} committed ({} records so far)", batches, committed);
                }
                Err(e) => {
                    // Closing the receiver stops the parser at its next send
                    drop(rx);
                    let _ = parser.await;
                    return Err(ImportFailure {
                        committed,
                        error: e.into(),
                    });
                }
            }
        }

        let summary = match parser.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(error)) => return Err(ImportFailure { committed, error }),
            Err(e) => {
                return Err(ImportFailure {
                    committed,
                    error: ImportError::Worker(e.to_string()),
                })
            }
        };

        let report = ImportReport {
            committed,
            skipped: summary.skipped,
            batches,
            encoding: summary.encoding,
            lossy: summary.lossy,
            delimiter: summary.delimiter,
        };
        tracing::info!(
            "Registry import complete: {} committed, {} skipped, {} batches ({}, delimiter {:?})",
            report.committed,
            report.skipped,
            report.batches,
            report.encoding,
            report.delimiter
        );
        Ok(report)
    }
}

fn is_registry_member(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !lower.ends_with('/') && (lower.ends_with(".txt") || lower.ends_with(".csv"))
}

/// Copies the first `.txt`/`.csv` member of the archive into `dest_dir`.
fn extract_registry_member(archive: &Path, dest_dir: &Path) -> Result<PathBuf, ImportError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let name = zip
        .file_names()
        .find(|name| is_registry_member(name))
        .map(str::to_string)
        .ok_or(ImportError::NoRegistryMember)?;
    tracing::info!("Extracting registry member {}", name);

    let mut member = zip.by_name(&name)?;
    // Fixed output name: the member path never reaches the filesystem
    let out_path = dest_dir.join(EXTRACTED_FILE_NAME);
    let mut out = std::fs::File::create(&out_path)?;
    std::io::copy(&mut member, &mut out)?;

    Ok(out_path)
}

fn parse_into_batches(
    text_path: &Path,
    batch_size: usize,
    tx: mpsc::Sender<Vec<TaxpayerProfile>>,
) -> Result<ParseSummary, ImportError> {
    let bytes = std::fs::read(text_path)?;
    let decoded = decode_registry(&bytes);
    let delimiter = detect_delimiter(&decoded.text);
    tracing::info!(
        "Registry decoded as {} (lossy: {}), delimiter {:?}",
        decoded.encoding.name(),
        decoded.lossy,
        delimiter as char
    );

    let closed = || ImportError::Worker("cache writer closed".to_string());
    let mut skipped = 0u64;
    let mut batch = Vec::with_capacity(batch_size);

    for row in registry_rows(&decoded.text, delimiter) {
        match row {
            Some(profile) => {
                batch.push(profile);
                if batch.len() >= batch_size {
                    tx.blocking_send(std::mem::take(&mut batch))
                        .map_err(|_| closed())?;
                }
            }
            None => skipped += 1,
        }
    }
    if !batch.is_empty() {
        tx.blocking_send(batch).map_err(|_| closed())?;
    }

    if skipped > 0 {
        tracing::warn!("{} registry rows skipped", skipped);
    }

    Ok(ParseSummary {
        skipped,
        encoding: decoded.encoding.name().to_string(),
        lossy: decoded.lossy,
        delimiter: delimiter as char,
    })
}

fn remove_scratch(workdir: TempDir) {
    let path = workdir.path().to_path_buf();
    match workdir.close() {
        Ok(()) => tracing::debug!("Removed import scratch directory {}", path.display()),
        Err(e) => tracing::error!(
            "Failed to remove import scratch directory {}: {}",
            path.display(),
            e
        ),
    }
}
