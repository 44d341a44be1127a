//! Relay bytes in both directions between a client and its destination.
//!
//! The two directions run concurrently inside the session's task.  As soon
//! as either one sees end-of-stream or an error, the whole session is over:
//! the other direction is abandoned, and both connections are closed.
//! There's no half-closed state.

use futures::future::{self, Either};
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::fmt;
use std::io;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Size of the buffer each direction reads into.
pub const RELAY_BUF_LEN: usize = 4096;

/// One of the two directions of a relay.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum Direction {
    /// Bytes read from the client and written to the destination.
    ClientToDestination,
    /// Bytes read from the destination and written to the client.
    DestinationToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToDestination => write!(f, "client->destination"),
            Direction::DestinationToClient => write!(f, "destination->client"),
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
#[non_exhaustive]
pub struct RelayOutcome {
    /// The direction that stopped first, and so ended the session.
    ///
    /// `None` if neither direction moved any data for the whole idle
    /// timeout.
    pub ended_by: Option<Direction>,
    /// The error that stopped it, or `None` for a clean end-of-stream.
    pub error: Option<io::Error>,
    /// Bytes written to the destination.
    pub client_to_destination: u64,
    /// Bytes written to the client.
    pub destination_to_client: u64,
}

/// When a session last moved data, in either direction.
///
/// Stored as milliseconds since the relay started, so that both copy loops
/// can update it through a shared reference.
struct Activity {
    /// When the relay started.
    start: Instant,
    /// Milliseconds from `start` to the latest read or write.
    last_ms: AtomicU64,
}

impl Activity {
    /// Start tracking activity from now.
    fn new() -> Self {
        Activity {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record that data just moved.
    fn touch(&self) {
        let ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Return when data last moved.
    fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Resolve once `idle` has passed with no activity at all.
async fn idle_timeout(activity: &Activity, idle: Duration) -> io::Error {
    loop {
        let deadline = activity.last() + idle;
        if Instant::now() >= deadline {
            return io::Error::new(io::ErrorKind::TimedOut, "session idle for too long");
        }
        tokio::time::sleep_until(deadline).await;
    }
}

/// Copy from `reader` to `writer` until end-of-stream or an error.
///
/// Each chunk is fully written and flushed before the next read, so a
/// slow writer holds back the reader.
async fn copy_one_way<R, W>(
    mut reader: R,
    mut writer: W,
    copied: &mut u64,
    activity: &Activity,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0_u8; RELAY_BUF_LEN];
    loop {
        let n = reader.read(&mut buf[..]).await?;
        if n == 0 {
            return Ok(()); // EOF
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        *copied += n as u64;
    }
}

/// Relay traffic between `client` and `destination` until either side
/// closes or fails, or until nothing has moved in either direction for
/// `idle`; then close both.
///
/// A direction that stays quiet is fine as long as the other one is busy.
/// Stalled writes are not this function's concern: wrap the streams (see
/// [`TimeoutStream`](crate::TimeoutStream)) if they need a limit.
///
/// Both streams are consumed: when this returns, they have been closed
/// and dropped.
pub async fn relay<C, D>(client: C, destination: D, idle: Duration) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    D: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_r, mut client_w) = client.split();
    let (mut dest_r, mut dest_w) = destination.split();
    let mut client_to_destination = 0;
    let mut destination_to_client = 0;
    let activity = Activity::new();

    let (ended_by, result) = {
        let upstream = pin!(copy_one_way(
            &mut client_r,
            &mut dest_w,
            &mut client_to_destination,
            &activity
        ));
        let downstream = pin!(copy_one_way(
            &mut dest_r,
            &mut client_w,
            &mut destination_to_client,
            &activity
        ));
        let idle = pin!(idle_timeout(&activity, idle));
        // Whichever finishes first wins; the rest are dropped mid-flight.
        match future::select(future::select(upstream, downstream), idle).await {
            Either::Left((Either::Left((r, _)), _)) => (Some(Direction::ClientToDestination), r),
            Either::Left((Either::Right((r, _)), _)) => (Some(Direction::DestinationToClient), r),
            Either::Right((e, _)) => (None, Err(e)),
        }
    };

    // Tell both peers we're done.  The sockets themselves close when the
    // halves are dropped, which happens exactly once, here.
    let _ = dest_w.close().await;
    let _ = client_w.close().await;
    drop((client_r, client_w, dest_r, dest_w));

    RelayOutcome {
        ended_by,
        error: result.err(),
        client_to_destination,
        destination_to_client,
    }
}
