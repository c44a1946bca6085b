//! Reads pre-extracted records from JSON-lines files.
//!
//! Layout: `<root>/<mode>/*.jsonl`, falling back to `<root>/*.jsonl` when the
//! mode has no directory of its own. Files are read in name order, one
//! record per non-blank line.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use renec_core::{JobMode, RawRecord, Scope};

use super::{decode_line, screen, Extractor, RecordStream};
use crate::error::ExtractionError;

const DEFAULT_BUFFER: usize = 256;

pub struct JsonlExtractor {
    root: PathBuf,
    buffer: usize,
}

impl JsonlExtractor {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl Extractor for JsonlExtractor {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn extract(&self, mode: JobMode, scope: &Scope) -> RecordStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let root = self.root.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_files(&root, mode, &scope, &tx).await {
                // The receiver may already be gone; nothing else to tell.
                let _ = tx.send(Err(e)).await;
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

/// `*.jsonl` files for the mode, sorted by name.
async fn source_files(root: &Path, mode: JobMode) -> Result<Vec<PathBuf>, ExtractionError> {
    let mode_dir = root.join(mode.as_str());
    let dir = if tokio::fs::metadata(&mode_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        mode_dir
    } else {
        root.to_path_buf()
    };

    let io_err = |source| ExtractionError::Io { path: dir.clone(), source };
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn stream_files(
    root: &Path,
    mode: JobMode,
    scope: &Scope,
    tx: &mpsc::Sender<Result<RawRecord, ExtractionError>>,
) -> Result<(), ExtractionError> {
    let files = source_files(root, mode).await?;
    if files.is_empty() {
        warn!(root = %root.display(), mode = %mode, "no jsonl files to extract");
    }

    for path in files {
        let file = tokio::fs::File::open(&path).await.map_err(|source| ExtractionError::Io {
            path: path.clone(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0;
        let mut sent = 0u64;

        while let Some(line) = lines.next_line().await.map_err(|source| ExtractionError::Io {
            path: path.clone(),
            source,
        })? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let Some(item) = screen(decode_line(line.as_bytes(), &path, line_no), scope)? else {
                continue;
            };
            if let Err(e) = &item {
                debug!(error = %e, "malformed record forwarded");
            }
            if tx.send(item).await.is_err() {
                debug!(path = %path.display(), "consumer dropped, stopping extraction");
                return Ok(());
            }
            sent += 1;
        }
        debug!(path = %path.display(), records = sent, "jsonl file extracted");
    }
    Ok(())
}
