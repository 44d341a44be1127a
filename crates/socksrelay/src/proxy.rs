//! Implement a simple SOCKS5 proxy that relays connections over TCP.
//!
//! A proxy is launched with [`run_socks_proxy()`], which listens for new
//! connections and then runs one independent session per connection.

use futures::io::{AsyncWrite, AsyncWriteExt};
use std::io::Error as IoError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use anyhow::{Context, Result};

use crate::cfg::TimeoutConfig;

pub(crate) mod socks;

/// Per-session settings, shared (by copy) with every connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Timeout applied to every read and write on both connections.
    pub io_timeout: Duration,
    /// Timeout for resolving and connecting to the destination.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Construct a new SessionConfig.
    pub fn new(io_timeout: Duration, connect_timeout: Duration) -> Self {
        SessionConfig {
            io_timeout,
            connect_timeout,
        }
    }
}

impl From<&TimeoutConfig> for SessionConfig {
    fn from(cfg: &TimeoutConfig) -> Self {
        SessionConfig::new(cfg.io(), cfg.connect())
    }
}

/// write_all the data to the writer & flush the writer if write_all is successful.
pub(crate) async fn write_all_and_flush<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(buf)
        .await
        .context("Error while writing SOCKS reply")?;
    writer
        .flush()
        .await
        .context("Error while flushing SOCKS stream")
}

/// write_all the data to the writer & close the writer if write_all is successful.
pub(crate) async fn write_all_and_close<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(buf)
        .await
        .context("Error while writing SOCKS reply")?;
    writer
        .close()
        .await
        .context("Error while closing SOCKS stream")
}

/// Return true if a given IoError, when received from accept, is a fatal
/// error.
fn accept_err_is_fatal(err: &IoError) -> bool {
    #![allow(clippy::match_like_matches_macro)]

    /// Re-declaration of WSAEMFILE with the right type to match
    /// `raw_os_error()`.
    #[cfg(windows)]
    const WSAEMFILE: i32 = winapi::shared::winerror::WSAEMFILE as i32;

    // Currently, EMFILE and ENFILE aren't distinguished by ErrorKind;
    // we need to use OS-specific errors. :P
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(libc::EMFILE) | Some(libc::ENFILE) => false,
        #[cfg(windows)]
        Some(WSAEMFILE) => false,
        _ => true,
    }
}

/// Accept connections on `listener` forever, running a SOCKS session for
/// each one in its own task.
///
/// Returns only if accepting fails in a way we can't recover from.
pub async fn serve(listener: TcpListener, session: SessionConfig) -> Result<()> {
    let mut n_accepted: u64 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                if accept_err_is_fatal(&err) {
                    return Err(err).context("Failed to receive incoming stream on SOCKS port");
                }
                warn!("Incoming stream failed: {}", err);
                continue;
            }
        };
        n_accepted += 1;
        let conn_id = n_accepted;
        debug!("Accepted connection {} from {}", conn_id, peer);

        tokio::spawn(async move {
            if let Err(e) = socks::handle_socks_conn(stream, peer, session).await {
                debug!("Connection {} from {} exited with error: {:#}", conn_id, peer, e);
            }
        });
    }
}

/// Launch a SOCKS proxy on `listen`, and run indefinitely.
pub async fn run_socks_proxy(listen: SocketAddr, session: SessionConfig) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Can't listen on {}", listen))?;
    let local = listener
        .local_addr()
        .context("Listener has no local address")?;
    info!("Listening on {}.", local);
    serve(listener, session).await
}
