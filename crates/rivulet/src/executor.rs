use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::RingBuffer,
    options::StreamOptions,
    segment::{SegmentInfo, StreamSegment},
    SegmentSource,
};

/// How far ahead of the committed position fetching may run.
const ORDER_QUEUE_SIZE: usize = 20;

/// Fetch-and-write stage.
///
/// A semaphore-bounded set of fetch tasks runs concurrently, while a bounded
/// FIFO of `(info, handle)` pairs is drained by a single committer that
/// appends each payload to the ring buffer. Fetches may complete in any
/// order; commits happen strictly in submission order.
pub(crate) struct FetchExecutor<S> {
    source: Arc<S>,
    buffer: Arc<RingBuffer>,
    closing: CancellationToken,
    permits: Arc<Semaphore>,
    attempts: u32,
}

impl<S> FetchExecutor<S>
where
    S: SegmentSource + Send + Sync + 'static,
{
    pub(crate) fn new(
        source: Arc<S>,
        buffer: Arc<RingBuffer>,
        closing: CancellationToken,
        options: &StreamOptions,
    ) -> Self {
        Self {
            source,
            buffer,
            closing,
            permits: Arc::new(Semaphore::new(options.segment_threads.max(1))),
            attempts: options.segment_attempts.max(1),
        }
    }

    /// Runs until the source channel closes (end of stream) or the pipeline
    /// is cancelled, then closes the buffer so the reader observes
    /// end-of-stream.
    pub(crate) async fn run(self, segments: mpsc::UnboundedReceiver<Vec<S::Segment>>) {
        let (queue, mut ordered) = mpsc::channel::<(SegmentInfo, JoinHandle<Option<Bytes>>)>(
            ORDER_QUEUE_SIZE,
        );

        let submitter = tokio::spawn(Self::submit(
            self.source.clone(),
            self.permits.clone(),
            self.closing.clone(),
            self.attempts,
            segments,
            queue,
        ));

        while let Some((info, handle)) = ordered.recv().await {
            if self.closing.is_cancelled() {
                handle.abort();
                continue;
            }
            match handle.await {
                Ok(Some(bytes)) => {
                    tracing::debug!(
                        sequence = info.sequence,
                        "Download of segment {} complete",
                        info.name
                    );
                    self.buffer.write(bytes).await;
                }
                // failed or skipped segment, already logged
                Ok(None) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!(sequence = info.sequence, "Segment task failed: {e}");
                }
            }
        }

        // Everything submitted has been committed or dropped.
        self.buffer.close();
        submitter.abort();
    }

    /// Producer side: pulls descriptor batches from the source and turns each
    /// descriptor into a pooled fetch task, preserving submission order in
    /// the bounded queue.
    async fn submit(
        source: Arc<S>,
        permits: Arc<Semaphore>,
        closing: CancellationToken,
        attempts: u32,
        mut segments: mpsc::UnboundedReceiver<Vec<S::Segment>>,
        queue: mpsc::Sender<(SegmentInfo, JoinHandle<Option<Bytes>>)>,
    ) {
        loop {
            let batch = tokio::select! {
                batch = segments.recv() => match batch {
                    Some(batch) => batch,
                    None => return,
                },
                _ = closing.cancelled() => return,
            };

            for segment in batch {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    return;
                };
                if closing.is_cancelled() {
                    return;
                }

                let info = SegmentInfo::from(&segment);
                let handle = tokio::spawn(fetch_one(
                    source.clone(),
                    segment,
                    attempts,
                    closing.clone(),
                    permit,
                ));
                if queue.send((info, handle)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Bounded retry loop around one segment fetch. Only transport errors are
/// retried; a decrypt or protocol failure drops the segment immediately.
/// `None` means the segment was dropped and the stream continues without it.
async fn fetch_one<S>(
    source: Arc<S>,
    segment: S::Segment,
    attempts: u32,
    closing: CancellationToken,
    _permit: OwnedSemaphorePermit,
) -> Option<Bytes>
where
    S: SegmentSource + Send + Sync + 'static,
{
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            result = source.fetch(&segment) => result,
            _ = closing.cancelled() => return None,
        };

        match result {
            Ok(bytes) => return Some(bytes),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    sequence = segment.sequence(),
                    "Failed to fetch segment {}, retrying ({attempt}/{attempts}): {e}",
                    segment.name()
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    sequence = segment.sequence(),
                    "Failed to fetch segment {}, dropping: {e}",
                    segment.name()
                );
                return None;
            }
        }
    }
}
