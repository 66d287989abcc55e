use std::{
    collections::HashMap,
    io::Read,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use rivulet::{
    RivuletError, RivuletResult, SegmentSource, SourceContext, StreamOptions, StreamReader,
    StreamSegment,
};
use tokio::sync::mpsc;

use crate::read_to_end;

#[derive(Clone)]
struct TestSegment {
    sequence: u64,
    payload: Bytes,
    /// Simulated fetch latency, to force out-of-order completion.
    delay: Duration,
    /// How many leading attempts fail before one succeeds.
    fail_attempts: u32,
    transient: bool,
}

impl TestSegment {
    fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
            delay: Duration::ZERO,
            fail_attempts: 0,
            transient: true,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self, attempts: u32, transient: bool) -> Self {
        self.fail_attempts = attempts;
        self.transient = transient;
        self
    }
}

impl StreamSegment for TestSegment {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn name(&self) -> &str {
        "test.ts"
    }
}

/// In-memory source: one batch of predefined segments, or a channel that
/// stays open forever to simulate a stalled live stream.
struct TestSource {
    segments: Vec<TestSegment>,
    attempts: Arc<Mutex<HashMap<u64, u32>>>,
    hang: bool,
    stall_guard: Mutex<Option<mpsc::UnboundedSender<Vec<TestSegment>>>>,
}

impl TestSource {
    fn new(segments: Vec<TestSegment>) -> Self {
        Self {
            segments,
            attempts: Arc::new(Mutex::new(HashMap::new())),
            hang: false,
            stall_guard: Mutex::new(None),
        }
    }

    fn stalled() -> Self {
        Self {
            segments: Vec::new(),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            hang: true,
            stall_guard: Mutex::new(None),
        }
    }
}

impl SegmentSource for TestSource {
    type Segment = TestSegment;

    async fn segments(
        &self,
        _cx: SourceContext,
    ) -> RivuletResult<mpsc::UnboundedReceiver<Vec<TestSegment>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.hang {
            // keep the channel open so the stream never ends by itself
            *self.stall_guard.lock().unwrap() = Some(tx);
        } else if !self.segments.is_empty() {
            let _ = tx.send(self.segments.clone());
        }
        Ok(rx)
    }

    async fn fetch(&self, segment: &TestSegment) -> RivuletResult<Bytes> {
        if !segment.delay.is_zero() {
            tokio::time::sleep(segment.delay).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(segment.sequence).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempt <= segment.fail_attempts {
            return if segment.transient {
                Err(RivuletError::IOError(std::io::Error::other("fetch failed")))
            } else {
                Err(RivuletError::UnsupportedKeyMethod("bogus".to_string()))
            };
        }

        Ok(segment.payload.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_completion_commits_in_order() -> anyhow::Result<()> {
    // later segments finish first: completion order is the reverse of
    // submission order
    let segments = (0..8u64)
        .map(|i| {
            TestSegment::new(i, vec![b'0' + i as u8])
                .delayed(Duration::from_millis((8 - i) * 50))
        })
        .collect::<Vec<_>>();

    let options = StreamOptions::default().segment_threads(4);
    let mut reader = StreamReader::open(TestSource::new(segments), &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"01234567");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_segment_is_skipped_not_fatal() -> anyhow::Result<()> {
    let segments = vec![
        TestSegment::new(0, &b"aa"[..]),
        // never succeeds within the allowed attempts
        TestSegment::new(1, &b"bb"[..]).failing(10, true),
        TestSegment::new(2, &b"cc"[..]),
    ];

    let options = StreamOptions::default().segment_attempts(2);
    let mut reader = StreamReader::open(TestSource::new(segments), &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"aacc", "a lost segment must not kill the stream");
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried() -> anyhow::Result<()> {
    let segments = vec![
        TestSegment::new(0, &b"aa"[..]).failing(2, true),
        TestSegment::new(1, &b"bb"[..]),
    ];
    let source = TestSource::new(segments);
    let attempts = source.attempts.clone();

    let options = StreamOptions::default().segment_attempts(3);
    let mut reader = StreamReader::open(source, &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"aabb");
    assert_eq!(attempts.lock().unwrap()[&0], 3);
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() -> anyhow::Result<()> {
    let segments = vec![
        TestSegment::new(0, &b"aa"[..]).failing(1, false),
        TestSegment::new(1, &b"bb"[..]),
    ];
    let source = TestSource::new(segments);
    let attempts = source.attempts.clone();

    let options = StreamOptions::default().segment_attempts(5);
    let mut reader = StreamReader::open(source, &options).await?;

    let bytes = read_to_end(&mut reader).await;
    assert_eq!(bytes, b"bb");
    assert_eq!(
        attempts.lock().unwrap()[&0],
        1,
        "a decrypt-style failure must not be refetched"
    );
    reader.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stalled_pipeline_reports_read_timeout() -> anyhow::Result<()> {
    let options = StreamOptions::default().stream_timeout(Duration::from_millis(200));
    let mut reader = StreamReader::open(TestSource::stalled(), &options).await?;

    let result = reader.read(16).await;
    assert!(
        matches!(result, Err(RivuletError::ReadTimeout)),
        "a stalled stream is a timeout, not end-of-stream"
    );

    // the reader is still usable afterwards and close() succeeds
    reader.close().await;
    let bytes = reader.read(16).await?;
    assert!(bytes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> anyhow::Result<()> {
    let segments = vec![TestSegment::new(0, &b"aa"[..])];
    let options = StreamOptions::default();
    let mut reader = StreamReader::open(TestSource::new(segments), &options).await?;

    reader.close().await;
    reader.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_reader_adapter() -> anyhow::Result<()> {
    let segments = vec![TestSegment::new(0, &b"aa"[..]), TestSegment::new(1, &b"bb"[..])];
    let options = StreamOptions::default();
    let reader = StreamReader::open(TestSource::new(segments), &options).await?;

    let handle = tokio::runtime::Handle::current();
    let bytes = tokio::task::spawn_blocking(move || {
        let mut blocking = reader.into_blocking(handle);
        let mut out = Vec::new();
        blocking.read_to_end(&mut out).expect("blocking read");
        blocking.close();
        out
    })
    .await?;

    assert_eq!(bytes, b"aabb");
    Ok(())
}
