//! A stream wrapper that gives up on reads and writes that stall.
//!
//! Every socket operation a session performs goes through a
//! [`TimeoutStream`]: if a read, or a write/flush/close, stays pending for
//! longer than the configured timeout, it fails with
//! [`io::ErrorKind::TimedOut`].  Reads and writes are timed separately.
//!
//! Once a session starts relaying, the read timeout is switched off with
//! [`TimeoutStream::clear_read_timeout`]: one quiet direction is normal
//! there, and the relay keeps its own idle timer for the whole session.

use futures::io::{AsyncRead, AsyncWrite};
use pin_project::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// A timer that starts when an operation first returns `Pending`, and
/// stops when it completes.
#[derive(Debug)]
struct Deadline {
    /// How long an operation may stay pending, or `None` for no limit.
    timeout: Option<Duration>,
    /// The running timer, if any.
    ///
    /// Created lazily, then reset and reused.
    sleep: Option<Pin<Box<Sleep>>>,
    /// True if `sleep` is counting down for the current operation.
    armed: bool,
}

impl Deadline {
    /// Make a new, unarmed deadline.
    fn new(timeout: Duration) -> Self {
        Deadline {
            timeout: Some(timeout),
            sleep: None,
            armed: false,
        }
    }

    /// Note that the current operation is pending; return true if it has
    /// now been pending for too long.
    ///
    /// Registers the waker in `cx` with the timer.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };
        let when = Instant::now() + timeout;
        let sleep = self
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(when)));
        if !self.armed {
            sleep.as_mut().reset(when);
            self.armed = true;
        }
        if sleep.as_mut().poll(cx).is_ready() {
            self.armed = false;
            true
        } else {
            false
        }
    }

    /// Note that the current operation completed.
    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Stop timing operations altogether.
    fn clear(&mut self) {
        self.timeout = None;
        self.armed = false;
        self.sleep = None;
    }
}

/// Build the error we return when an operation times out.
fn timed_out(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, what)
}

/// Wrapper that applies one fixed timeout to every pending read and write
/// on an inner stream.
#[derive(Debug)]
#[pin_project]
pub struct TimeoutStream<S> {
    /// The wrapped stream.
    #[pin]
    inner: S,
    /// Deadline for the read in progress.
    read: Deadline,
    /// Deadline for the write, flush or close in progress.
    write: Deadline,
}

impl<S> TimeoutStream<S> {
    /// Wrap `inner` so that stalled operations fail after `timeout`.
    pub fn new(inner: S, timeout: Duration) -> Self {
        TimeoutStream {
            inner,
            read: Deadline::new(timeout),
            write: Deadline::new(timeout),
        }
    }

    /// Let reads wait as long as they like from now on.
    ///
    /// Writes, flushes and closes keep their timeout.
    pub fn clear_read_timeout(&mut self) {
        self.read.clear();
    }

    /// Return a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Discard the timeouts and return the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// Run one poll of an inner operation under `deadline`.
fn with_deadline<T>(
    deadline: &mut Deadline,
    cx: &mut Context<'_>,
    what: &'static str,
    poll: Poll<io::Result<T>>,
) -> Poll<io::Result<T>> {
    match poll {
        Poll::Ready(r) => {
            deadline.disarm();
            Poll::Ready(r)
        }
        Poll::Pending if deadline.poll_expired(cx) => Poll::Ready(Err(timed_out(what))),
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let poll = this.inner.poll_read(cx, buf);
        with_deadline(this.read, cx, "read timed out", poll)
    }
}

impl<S: AsyncWrite> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let poll = this.inner.poll_write(cx, buf);
        with_deadline(this.write, cx, "write timed out", poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let poll = this.inner.poll_flush(cx);
        with_deadline(this.write, cx, "flush timed out", poll)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let poll = this.inner.poll_close(cx);
        with_deadline(this.write, cx, "close timed out", poll)
    }
}
