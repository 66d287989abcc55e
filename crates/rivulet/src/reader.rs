use std::time::Duration;

use bytes::Bytes;

use crate::{
    options::StreamOptions, pipeline::StreamPipeline, RivuletError, RivuletResult, SegmentSource,
};

/// The reader end of an open stream: drains the ring buffer the pipeline
/// fills.
pub struct StreamReader {
    pipeline: StreamPipeline,
    timeout: Duration,
}

impl StreamReader {
    /// Opens the pipeline for `source` and returns its reader.
    pub async fn open<S>(source: S, options: &StreamOptions) -> RivuletResult<Self>
    where
        S: SegmentSource + Send + Sync + 'static,
    {
        Ok(Self {
            pipeline: StreamPipeline::open(source, options).await?,
            timeout: options.stream_timeout,
        })
    }

    /// Reads up to `max_size` bytes. An empty payload means end-of-stream.
    /// A reader blocked longer than `stream-timeout` while the pipeline is
    /// still alive gets [`RivuletError::ReadTimeout`], which may be retried.
    pub async fn read(&mut self, max_size: usize) -> RivuletResult<Bytes> {
        self.pipeline.buffer().read_timeout(max_size, self.timeout).await
    }

    /// Shuts the pipeline down. Idempotent.
    pub async fn close(&mut self) {
        self.pipeline.close().await;
    }

    /// Adapts this reader to blocking [`std::io::Read`] for synchronous
    /// consumers (players, file writers), driven on `handle`. Must be used
    /// from outside the runtime's async context, e.g. a dedicated thread.
    pub fn into_blocking(self, handle: tokio::runtime::Handle) -> BlockingReader {
        BlockingReader {
            reader: self,
            handle,
        }
    }
}

/// Synchronous facade over [`StreamReader`].
pub struct BlockingReader {
    reader: StreamReader,
    handle: tokio::runtime::Handle,
}

impl BlockingReader {
    pub fn close(&mut self) {
        let reader = &mut self.reader;
        self.handle.block_on(reader.close());
    }
}

impl std::io::Read for BlockingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let reader = &mut self.reader;
        match self.handle.block_on(reader.read(buf.len())) {
            Ok(bytes) if bytes.is_empty() => Ok(0),
            Ok(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Err(RivuletError::ReadTimeout) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read timeout",
            )),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }
    }
}
