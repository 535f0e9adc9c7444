//! One direction of a connection: a bounded byte buffer with one writer and one reader.

use super::error::{TransportError, TransportResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
pub(crate) struct Pipe {
    state: Mutex<PipeState>,
}

#[derive(Debug)]
struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Writer finished; the reader drains what is left, then sees end-of-stream.
    write_closed: bool,
    /// Reader went away; buffered bytes are discarded and writes fail.
    read_closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl Pipe {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PipeState {
                buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
                capacity,
                write_closed: false,
                read_closed: false,
                read_waker: None,
                write_waker: None,
            }),
        }
    }

    pub(crate) fn poll_read(
        &self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
    ) -> Poll<TransportResult<usize>> {
        let mut state = self.state.lock();

        if state.read_closed {
            return Poll::Ready(Err(TransportError::EndOfStream));
        }
        if dst.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if !state.buf.is_empty() {
            let n = dst.len().min(state.buf.len());
            for (slot, byte) in dst.iter_mut().zip(state.buf.drain(..n)) {
                *slot = byte;
            }
            if let Some(waker) = state.write_waker.take() {
                waker.wake();
            }
            return Poll::Ready(Ok(n));
        }

        if state.write_closed {
            return Poll::Ready(Err(TransportError::EndOfStream));
        }

        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub(crate) fn poll_write(&self, cx: &mut Context<'_>, src: &[u8]) -> Poll<TransportResult<usize>> {
        let mut state = self.state.lock();

        if state.write_closed || state.read_closed {
            return Poll::Ready(Err(TransportError::ConnectionClosed));
        }
        if src.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let available = state.capacity - state.buf.len();
        if available == 0 {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = available.min(src.len());
        state.buf.extend(&src[..n]);
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(n))
    }

    /// Stop writing. Idempotent.
    pub(crate) fn close_write(&self) {
        let mut state = self.state.lock();
        state.write_closed = true;
        Self::wake_all(&mut state);
    }

    /// Stop reading and drop anything still buffered. Idempotent.
    pub(crate) fn close_read(&self) {
        let mut state = self.state.lock();
        state.read_closed = true;
        state.buf.clear();
        Self::wake_all(&mut state);
    }

    pub(crate) fn is_write_closed(&self) -> bool {
        self.state.lock().write_closed
    }

    pub(crate) fn is_read_closed(&self) -> bool {
        self.state.lock().read_closed
    }

    pub(crate) fn buffered(&self) -> usize {
        self.state.lock().buf.len()
    }

    fn wake_all(state: &mut PipeState) {
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
        if let Some(waker) = state.write_waker.take() {
            waker.wake();
        }
    }
}
