//! Streaming merger
//!
//! Reassembles content that arrives in arbitrary byte chunks into one string. A
//! multi-byte character split across two chunks is held back until its remaining
//! bytes arrive, so the output never contains a character torn in half.

use crate::error::{Result, VaultRootError};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of a merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedContent {
    pub text: String,
    pub chunks: usize,
    pub bytes: usize,
    /// The producer went quiet for longer than the chunk timeout
    pub timed_out: bool,
}

/// Bounded chunk reassembly with a per-chunk wait timeout
#[derive(Debug, Clone)]
pub struct StreamMerger {
    max_bytes: usize,
    chunk_timeout: Duration,
}

impl StreamMerger {
    pub fn new(max_bytes: usize, chunk_timeout: Duration) -> Self {
        Self {
            max_bytes,
            chunk_timeout,
        }
    }

    /// Bounded channel whose receiver can be passed to [`merge_channel`].
    ///
    /// Producers block on `send` once `capacity` chunks are waiting.
    ///
    /// [`merge_channel`]: StreamMerger::merge_channel
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        mpsc::channel(capacity.max(1))
    }

    /// Merge chunks from a fallible stream
    pub async fn merge<S, B, E>(&self, mut stream: S) -> Result<MergedContent>
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Into<VaultRootError>,
    {
        let mut decoder = Utf8Decoder::default();
        let mut merged = MergedContent::default();

        loop {
            let next = match tokio::time::timeout(self.chunk_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        "Stream stalled for {:?} after {} chunks, keeping partial content",
                        self.chunk_timeout,
                        merged.chunks
                    );
                    merged.timed_out = true;
                    break;
                }
            };

            let chunk = match next {
                Some(chunk) => chunk.map_err(Into::into)?,
                None => break,
            };
            let bytes = chunk.as_ref();

            merged.bytes += bytes.len();
            if merged.bytes > self.max_bytes {
                return Err(VaultRootError::StreamOverflow {
                    limit: self.max_bytes,
                });
            }
            merged.chunks += 1;
            decoder.push(bytes, &mut merged.text);
        }

        decoder.finish(&mut merged.text);
        Ok(merged)
    }

    /// Merge chunks from a bounded channel until all senders are dropped
    pub async fn merge_channel(&self, rx: mpsc::Receiver<Vec<u8>>) -> Result<MergedContent> {
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, VaultRootError>(chunk), rx))
        });
        self.merge(Box::pin(stream)).await
    }
}

/// Incremental UTF-8 decoder that carries incomplete sequences between chunks
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);

        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = consumed + e.valid_up_to();
                    // Prefix up to valid_up_to is known-good
                    out.push_str(
                        std::str::from_utf8(&self.pending[consumed..valid_up_to])
                            .unwrap_or_default(),
                    );
                    match e.error_len() {
                        // Truncated sequence at the end, wait for more bytes
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + len;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
    }

    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}
