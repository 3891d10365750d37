//! Default record sources
//!
//! Line-oriented delimited files: one record per line. A quoted field may
//! hold commas but not line breaks; an embedded newline starts a new
//! record. Local sources are read in place; remote
//! sources are downloaded into the temp folder first and removed once the
//! run has exhausted them (leftovers are cleared by maintenance).

use importd_common::{ImportConfig, SourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::types::{RecordSource, SourceOpener, SourceRecord};

/// Split one line into trimmed fields, honouring double-quoted fields
///
/// A quote left open at the end of the line runs to the end of the line.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Physical line count, which is the record count for line-oriented files
async fn count_lines(path: &Path) -> std::io::Result<u64> {
    let mut lines = BufReader::new(File::open(path).await?).lines();
    let mut count = 0u64;
    while lines.next_line().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Reads a delimited file line by line
pub struct LineSource {
    lines: Lines<BufReader<File>>,
    columns: Option<Arc<Vec<String>>>,
    total: Option<u64>,
    next_row: u64,
    /// Downloaded copy to delete once exhausted
    temp_file: Option<PathBuf>,
}

impl LineSource {
    pub async fn open(path: &Path, skip_header: bool) -> Result<Self, ImportError> {
        let unavailable = |e: std::io::Error| {
            ImportError::SourceUnavailable(format!("{}: {}", path.display(), e))
        };

        let line_count = count_lines(path).await.map_err(unavailable)?;
        let mut lines = BufReader::new(File::open(path).await.map_err(unavailable)?).lines();

        let columns = if skip_header {
            lines
                .next_line()
                .await
                .map_err(unavailable)?
                .map(|header| Arc::new(split_fields(&header)))
        } else {
            None
        };

        let total = if columns.is_some() {
            line_count.saturating_sub(1)
        } else {
            line_count
        };

        Ok(Self {
            lines,
            columns,
            total: Some(total),
            next_row: 1,
            temp_file: None,
        })
    }

    fn owning_temp_file(mut self, path: PathBuf) -> Self {
        self.temp_file = Some(path);
        self
    }

    async fn remove_temp_file(&mut self) {
        if let Some(path) = self.temp_file.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove downloaded source {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for LineSource {
    fn total_hint(&self) -> Option<u64> {
        self.total
    }

    async fn next_batch(&mut self, max: usize) -> Result<Vec<SourceRecord>, ImportError> {
        let mut batch = Vec::with_capacity(max);

        while batch.len() < max {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ImportError::FatalRun(format!("Source read failed: {}", e)))?;

            let Some(line) = line else {
                break;
            };

            batch.push(SourceRecord {
                row_number: self.next_row,
                values: if line.trim().is_empty() {
                    Vec::new()
                } else {
                    split_fields(&line)
                },
                columns: self.columns.clone(),
            });
            self.next_row += 1;
        }

        if batch.is_empty() {
            self.remove_temp_file().await;
        }

        Ok(batch)
    }
}

/// Opens local files directly and downloads remote ones to the temp folder
pub struct FileSourceOpener {
    client: reqwest::Client,
    temp_dir: PathBuf,
    download_timeout: Duration,
}

impl FileSourceOpener {
    pub fn new(client: reqwest::Client, temp_dir: PathBuf) -> Self {
        Self {
            client,
            temp_dir,
            download_timeout: Duration::from_secs(300),
        }
    }

    async fn download(&self, url: &str) -> Result<PathBuf, ImportError> {
        let unavailable = |e: reqwest::Error| ImportError::SourceUnavailable(format!("{}: {}", url, e));

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| ImportError::FatalRun(format!("Temp folder unavailable: {}", e)))?;

        let mut response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unavailable)?;

        let path = self.temp_dir.join(format!("import-{}.csv", Uuid::new_v4()));
        let io_fatal = |e: std::io::Error| ImportError::FatalRun(format!("Download write failed: {}", e));
        let mut file = File::create(&path).await.map_err(io_fatal)?;

        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(unavailable)? {
            file.write_all(&chunk).await.map_err(io_fatal)?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(io_fatal)?;

        info!(url, bytes, path = %path.display(), "Remote source downloaded");
        Ok(path)
    }
}

#[async_trait::async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(
        &self,
        kind: SourceKind,
        config: &ImportConfig,
    ) -> Result<Box<dyn RecordSource>, ImportError> {
        let location = config.location(kind).ok_or_else(|| {
            ImportError::SourceUnavailable(crate::services::validator::SOURCE_LOCATION_MISSING.to_string())
        })?;

        match kind {
            SourceKind::Local => {
                debug!(path = %location, "Opening local source");
                let source = LineSource::open(Path::new(&location), config.skip_header).await?;
                Ok(Box::new(source))
            }
            SourceKind::Remote => {
                let path = self.download(location.trim()).await?;
                match LineSource::open(&path, config.skip_header).await {
                    Ok(source) => Ok(Box::new(source.owning_temp_file(path))),
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&path).await;
                        Err(e)
                    }
                }
            }
        }
    }
}
