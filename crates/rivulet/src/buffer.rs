use std::{collections::VecDeque, sync::Mutex, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::{RivuletError, RivuletResult};

/// Fixed-capacity byte ring between the pipeline's commit stage and the
/// public reader.
///
/// Chunks are admitted while the buffered total stays within the capacity; a
/// chunk larger than the whole capacity is admitted alone so one oversized
/// segment cannot wedge the pipeline. `close` is idempotent and terminal:
/// reads drain whatever is left and then return an empty payload, writes are
/// dropped.
///
/// Exactly one writer task and one reader may operate concurrently.
pub struct RingBuffer {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Notify,
    not_full: Notify,
}

struct State {
    chunks: VecDeque<Bytes>,
    used: usize,
    closed: bool,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                chunks: VecDeque::new(),
                used: 0,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered bytes not yet read.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Appends `data`, waiting while the buffer is full. Dropped silently
    /// once the buffer is closed.
    pub async fn write(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }

        let notified = self.not_full.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return;
                }
                if state.used == 0 || state.used + data.len() <= self.capacity {
                    state.used += data.len();
                    state.chunks.push_back(data);
                    drop(state);
                    self.not_empty.notify_waiters();
                    return;
                }
            }
            notified.as_mut().await;
            notified.set(self.not_full.notified());
        }
    }

    /// Reads up to `max_size` bytes, waiting while the buffer is empty and
    /// not closed. An empty result means end-of-stream.
    pub async fn read(&self, max_size: usize) -> Bytes {
        if max_size == 0 {
            return Bytes::new();
        }

        let notified = self.not_empty.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if !state.chunks.is_empty() {
                    let out = Self::pop(&mut state, max_size);
                    drop(state);
                    self.not_full.notify_waiters();
                    return out;
                }
                if state.closed {
                    return Bytes::new();
                }
            }
            notified.as_mut().await;
            notified.set(self.not_empty.notified());
        }
    }

    /// Like [`read`](Self::read), but gives up after `timeout` with a
    /// distinct error so callers can tell a stalled pipeline from
    /// end-of-stream.
    pub async fn read_timeout(&self, max_size: usize, timeout: Duration) -> RivuletResult<Bytes> {
        tokio::time::timeout(timeout, self.read(max_size))
            .await
            .map_err(|_| RivuletError::ReadTimeout)
    }

    /// Waits until at least one byte of room is available, so producers can
    /// pause playlist reloads while the consumer is behind.
    pub async fn wait_free(&self) {
        let notified = self.not_full.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if state.closed || state.used < self.capacity {
                    return;
                }
            }
            notified.as_mut().await;
            notified.set(self.not_full.notified());
        }
    }

    /// Marks the buffer terminal and wakes both sides. Buffered bytes stay
    /// readable until drained. Calling this more than once has no further
    /// effect.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    fn pop(state: &mut State, max_size: usize) -> Bytes {
        let front = state.chunks.front_mut().expect("non-empty buffer");
        if front.len() >= max_size {
            let out = front.split_to(max_size);
            if front.is_empty() {
                state.chunks.pop_front();
            }
            state.used -= out.len();
            return out;
        }

        let mut out = BytesMut::with_capacity(max_size.min(state.used));
        while out.len() < max_size {
            let Some(front) = state.chunks.front_mut() else {
                break;
            };
            let room = max_size - out.len();
            if front.len() > room {
                out.extend_from_slice(&front.split_to(room));
            } else {
                out.extend_from_slice(front);
                state.chunks.pop_front();
            }
        }
        state.used -= out.len();
        out.freeze()
    }
}
