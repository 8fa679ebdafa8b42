//! Deadline-guarded connection.
//!
//! # Responsibilities
//! - Enforce a deadline on a fresh connection covering the handshake and first byte
//! - Clear that deadline once the first read completes
//! - Generate unique connection IDs for tracing
//!
//! A peer that completes the TCP handshake and then sends nothing would
//! otherwise hold the connection open until the outer request timer fires.
//! Slow-but-alive peers are not affected once data has started to flow.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Marker carried inside the `io::Error` returned when the handshake deadline elapses.
#[derive(Debug, thiserror::Error)]
#[error("deadline elapsed before the peer sent its first byte")]
pub struct HandshakeTimedOut;

impl HandshakeTimedOut {
    fn into_io() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, HandshakeTimedOut)
    }

    /// Check whether an I/O error was produced by an elapsed handshake deadline.
    pub fn is(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::TimedOut
            && err.get_ref().is_some_and(|inner| inner.is::<HandshakeTimedOut>())
    }
}

/// Deadline state of a connection.
#[derive(Debug)]
enum DeadlineState {
    /// Deadline armed; reads and writes fail once it elapses.
    Guarded(Pin<Box<Sleep>>),
    /// Deadline cleared for the rest of the connection's life.
    Unguarded,
}

/// A connection that enforces a deadline until its first read completes.
///
/// Reads and writes behave like the underlying stream. While guarded, any
/// operation attempted after the deadline fails with [`io::ErrorKind::TimedOut`]
/// (see [`HandshakeTimedOut::is`]). The first read to complete, successfully
/// or not, moves the connection to the unguarded state; later reads are passed
/// straight through.
#[derive(Debug)]
pub struct GuardedConnection<S> {
    inner: S,
    state: DeadlineState,
    id: ConnectionId,
}

impl<S> GuardedConnection<S> {
    /// Wrap `inner`, arming a deadline `timeout` from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            state: DeadlineState::Guarded(Box::pin(tokio::time::sleep(timeout))),
            id: ConnectionId::new(),
        }
    }

    /// Whether the handshake deadline is still armed.
    pub fn is_guarded(&self) -> bool {
        matches!(self.state, DeadlineState::Guarded(_))
    }

    /// The armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            DeadlineState::Guarded(sleep) => Some(sleep.deadline()),
            DeadlineState::Unguarded => None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn release(&mut self) {
        if self.is_guarded() {
            self.state = DeadlineState::Unguarded;
            tracing::trace!(connection_id = %self.id, "Handshake deadline cleared");
        }
    }

    /// Returns an error if the connection is guarded and its deadline has passed.
    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if let DeadlineState::Guarded(sleep) = &mut self.state {
            if sleep.as_mut().poll(cx).is_ready() {
                tracing::debug!(connection_id = %self.id, "Handshake deadline elapsed");
                return Err(HandshakeTimedOut::into_io());
            }
        }
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for GuardedConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Err(e) = this.poll_deadline(cx) {
            this.release();
            return Poll::Ready(Err(e));
        }

        let result = ready!(Pin::new(&mut this.inner).poll_read(cx, buf));
        this.release();
        Poll::Ready(result)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for GuardedConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(&mut this.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
