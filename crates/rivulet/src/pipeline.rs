use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    buffer::RingBuffer, executor::FetchExecutor, options::StreamOptions, RivuletResult,
    SegmentSource,
};

/// Handles handed to a [`SegmentSource`] state machine: the shared buffer for
/// reload throttling and the pipeline's closing signal.
#[derive(Clone)]
pub struct SourceContext {
    buffer: Arc<RingBuffer>,
    closing: CancellationToken,
}

impl SourceContext {
    pub(crate) fn new(buffer: Arc<RingBuffer>, closing: CancellationToken) -> Self {
        Self { buffer, closing }
    }

    /// Waits until the buffer has room again, so a slow consumer pauses
    /// playlist/manifest reloads instead of growing memory. Returns
    /// immediately once the pipeline is closing.
    pub async fn wait_free(&self) {
        tokio::select! {
            _ = self.buffer.wait_free() => {}
            _ = self.closing.cancelled() => {}
        }
    }

    /// Interruptible sleep. `false` means the pipeline is closing and the
    /// state machine should wind down.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.closing.cancelled() => false,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }
}

/// Wires a segment source to the fetch executor and the ring buffer, and
/// owns the lifecycle of both pipeline tasks.
///
/// All state is scoped to this instance; independent streams can run in the
/// same process.
pub struct StreamPipeline {
    buffer: Arc<RingBuffer>,
    closing: CancellationToken,
    executor: Option<tokio::task::JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl StreamPipeline {
    /// Starts the producer and committer for `source`. Fatal stream errors
    /// (variant playlist, DRM, failed first load) surface here, before any
    /// bytes are produced.
    pub async fn open<S>(source: S, options: &StreamOptions) -> RivuletResult<Self>
    where
        S: SegmentSource + Send + Sync + 'static,
    {
        let buffer = Arc::new(RingBuffer::new(options.ringbuffer_size));
        let closing = CancellationToken::new();

        let receiver = source
            .segments(SourceContext::new(buffer.clone(), closing.clone()))
            .await?;

        let executor = FetchExecutor::new(Arc::new(source), buffer.clone(), closing.clone(), options);
        let handle = tokio::spawn(executor.run(receiver));

        Ok(Self {
            buffer,
            closing,
            executor: Some(handle),
            shutdown_timeout: options.stream_timeout,
        })
    }

    pub(crate) fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    /// Signals every waiting stage, closes the buffer and waits (bounded) for
    /// the committer to wind down. Calling this more than once is harmless.
    pub async fn close(&mut self) {
        if !self.closing.is_cancelled() {
            tracing::debug!("Closing stream pipeline");
        }
        self.closing.cancel();
        self.buffer.close();

        if let Some(mut handle) = self.executor.take() {
            if tokio::time::timeout(self.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.closing.cancel();
        self.buffer.close();
    }
}
