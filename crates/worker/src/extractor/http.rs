//! Streams newline-delimited JSON records from an extraction service.
//!
//! `GET {base}/extract?mode=<mode>[&kinds=a,b][&keys=k1,k2]` must answer with
//! one [`RawRecord`] per line. The body is consumed incrementally.

use std::path::Path;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use renec_core::{EntityKind, JobMode, RawRecord, Scope};

use super::{decode_line, screen, Extractor, RecordStream};
use crate::error::ExtractionError;

const DEFAULT_BUFFER: usize = 256;

pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
    buffer: usize,
}

impl HttpExtractor {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    fn query(mode: JobMode, scope: &Scope) -> Vec<(&'static str, String)> {
        let mut query = vec![("mode", mode.as_str().to_string())];
        if !scope.kinds.is_empty() {
            let kinds: Vec<&str> = scope.kinds.iter().map(EntityKind::as_str).collect();
            query.push(("kinds", kinds.join(",")));
        }
        if !scope.keys.is_empty() {
            let keys: Vec<&str> = scope.keys.iter().map(String::as_str).collect();
            query.push(("keys", keys.join(",")));
        }
        query
    }
}

impl Extractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    fn extract(&self, mode: JobMode, scope: &Scope) -> RecordStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let request = self
            .client
            .get(format!("{}/extract", self.base_url))
            .query(&Self::query(mode, scope));
        let scope = scope.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_body(request, &scope, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

async fn stream_body(
    request: reqwest::RequestBuilder,
    scope: &Scope,
    tx: &mpsc::Sender<Result<RawRecord, ExtractionError>>,
) -> Result<(), ExtractionError> {
    let response = request.send().await?.error_for_status()?;
    let mut body = response.bytes_stream();
    let mut pending = BytesMut::new();
    let mut splitter = LineSplitter::default();

    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        while let Some(line) = splitter.next_line(&mut pending) {
            if !forward(&line, splitter.line_no, scope, tx).await? {
                return Ok(());
            }
        }
    }
    if !pending.is_empty() {
        let line = pending.split().freeze();
        splitter.line_no += 1;
        forward(&line, splitter.line_no, scope, tx).await?;
    }
    Ok(())
}

#[derive(Default)]
struct LineSplitter {
    line_no: usize,
}

impl LineSplitter {
    /// Split one complete line (without the newline) off the front.
    fn next_line(&mut self, buf: &mut BytesMut) -> Option<bytes::Bytes> {
        let pos = buf.iter().position(|b| *b == b'\n')?;
        let line = buf.split_to(pos).freeze();
        buf.advance(1);
        self.line_no += 1;
        Some(line)
    }
}

/// Parse and send one line. `Ok(false)` once the consumer is gone.
async fn forward(
    line: &[u8],
    line_no: usize,
    scope: &Scope,
    tx: &mpsc::Sender<Result<RawRecord, ExtractionError>>,
) -> Result<bool, ExtractionError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(true);
    }
    let Some(item) = screen(decode_line(line, Path::new("http"), line_no), scope)? else {
        return Ok(true);
    };
    if let Err(e) = &item {
        debug!(error = %e, "malformed record forwarded");
    }
    if tx.send(item).await.is_err() {
        debug!("consumer dropped, stopping http extraction");
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_only() {
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"b\""[..]);
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.next_line(&mut buf).as_deref(), Some(&b"{\"a\":1}"[..]));
        assert!(splitter.next_line(&mut buf).is_none());
        buf.extend_from_slice(b":2}\r\n");
        assert_eq!(splitter.next_line(&mut buf).as_deref(), Some(&b"{\"b\":2}\r"[..]));
        assert_eq!(splitter.line_no, 2);
    }

    #[test]
    fn query_carries_scope() {
        let scope = Scope::kinds([EntityKind::Certifier]).with_keys(["CERT-001"]);
        let query = HttpExtractor::query(JobMode::FreshnessCheck, &scope);
        assert_eq!(
            query,
            vec![
                ("mode", "freshness_check".to_string()),
                ("kinds", "certifier".to_string()),
                ("keys", "CERT-001".to_string()),
            ]
        );
    }
}
