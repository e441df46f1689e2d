//! Continuous Recording + Segmenter: the batch fallback used when a
//! call's domain/phase is configured for batch transcription instead of
//! the realtime snoop+ExternalMedia path. Never run concurrently with
//! the realtime STT session for the same call.

mod segmenter;

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

pub use segmenter::{PendingSegment, Segmenter};

const DEFAULT_BATCH_WORKERS: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("stt error: {0}")]
    Stt(#[from] callcore_stt::SttError),
}

pub type Result<T> = std::result::Result<T, RecordingError>;

/// Transcription of one closed segment, tagged with its position in the
/// call so out-of-order worker completions can be re-sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Runs closed segments through a bounded pool of batch STT workers and
/// emits `TranscriptSegment`s re-sorted by `start_ms`, regardless of
/// completion order.
pub struct BatchTranscriber {
    http_base_url: String,
    api_key: String,
    language: String,
    concurrency: usize,
}

impl BatchTranscriber {
    pub fn new(http_base_url: impl Into<String>, api_key: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            http_base_url: http_base_url.into(),
            api_key: api_key.into(),
            language: language.into(),
            concurrency: DEFAULT_BATCH_WORKERS,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Spawns one task per segment (bounded by a semaphore to
    /// `self.concurrency`), each fetching its own audio via `fetch_audio`
    /// and transcribing via the batch HTTP endpoint. Returns a receiver
    /// delivering results in `start_ms` order as soon as every segment with
    /// an earlier `start_ms` has itself completed and been delivered.
    pub fn transcribe_ordered<F, Fut>(&self, segments: Vec<PendingSegment>, fetch_audio: F) -> mpsc::Receiver<Result<TranscriptSegment>>
    where
        F: Fn(PendingSegment) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Vec<u8>> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(segments.len().max(1));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let http_base_url = self.http_base_url.clone();
        let api_key = self.api_key.clone();
        let language = self.language.clone();
        let fetch_audio = Arc::new(fetch_audio);

        tokio::spawn(async move {
            let (done_tx, mut done_rx) = mpsc::channel::<(usize, PendingSegment, Result<String>)>(segments.len().max(1));

            for (index, segment) in segments.iter().copied().enumerate() {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let http_base_url = http_base_url.clone();
                let api_key = api_key.clone();
                let language = language.clone();
                let fetch_audio = fetch_audio.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let audio = (*fetch_audio)(segment).await;
                    let text = callcore_stt::transcribe_batch(&http_base_url, &api_key, audio, &language)
                        .await
                        .map_err(RecordingError::from);
                    let _ = done_tx.send((index, segment, text)).await;
                });
            }
            drop(done_tx);

            let mut pending: BinaryHeap<ReadySegment> = BinaryHeap::new();
            let mut next_to_emit = 0usize;
            while let Some((index, segment, text)) = done_rx.recv().await {
                match text {
                    Ok(text) => pending.push(ReadySegment { index, segment, text }),
                    Err(err) => {
                        tracing::warn!(index, %err, "batch transcription failed for segment");
                        continue;
                    }
                }
                while let Some(ready) = pending.peek() {
                    if ready.index != next_to_emit {
                        break;
                    }
                    let ready = pending.pop().unwrap();
                    next_to_emit += 1;
                    if out_tx
                        .send(Ok(TranscriptSegment {
                            index: ready.index,
                            start_ms: ready.segment.start_ms,
                            end_ms: ready.segment.end_ms,
                            text: ready.text,
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        out_rx
    }
}

struct ReadySegment {
    index: usize,
    segment: PendingSegment,
    text: String,
}

impl PartialEq for ReadySegment {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl Eq for ReadySegment {}
impl PartialOrd for ReadySegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ReadySegment {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the lowest index first.
        other.index.cmp(&self.index)
    }
}
