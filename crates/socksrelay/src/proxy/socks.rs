//! SOCKS5 session handling: negotiate, connect, relay.

use futures::io::{AsyncRead, AsyncWrite};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt as _};
use tracing::{debug, info, instrument, warn};

use socksrelay_proto::{
    METHOD_SELECTION_NO_AUTH, SocksAddr, SocksReader, SocksReply, SocksRequest, SocksStatus,
    read_greeting, read_request,
};

use anyhow::{Context, Result};

use super::{SessionConfig, write_all_and_close, write_all_and_flush};
use crate::relay::relay;
use crate::timeout::TimeoutStream;

/// A connection to a destination, with our usual I/O timeout applied.
pub type DestinationStream = TimeoutStream<Compat<TcpStream>>;

/// The result of a successful handshake.
#[derive(Debug)]
#[non_exhaustive]
pub struct Negotiated<S> {
    /// The client connection, ready for relaying.
    pub client: S,
    /// The newly opened destination connection.
    pub destination: DestinationStream,
    /// What the client asked for.
    pub request: SocksRequest,
    /// The local endpoint of `destination`, as reported to the client.
    pub bound: SocketAddrV4,
}

/// Pick the SOCKS reply code that best describes a failed connect.
fn connect_error_status(err: &io::Error) -> SocksStatus {
    use io::ErrorKind as EK;
    match err.kind() {
        EK::ConnectionRefused => SocksStatus::CONNECTION_REFUSED,
        EK::TimedOut => SocksStatus::TTL_EXPIRED,
        EK::HostUnreachable => SocksStatus::HOST_UNREACHABLE,
        EK::NetworkUnreachable => SocksStatus::NETWORK_UNREACHABLE,
        _ => SocksStatus::GENERAL_FAILURE,
    }
}

/// Convert the local address of a destination connection into the IPv4
/// endpoint we put in our reply.
fn bound_ipv4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(a) => {
            let ip = a.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED);
            SocketAddrV4::new(ip, a.port())
        }
    }
}

/// Keep the IPv4 addresses from a resolver answer, in order.
///
/// Fails with `HostUnreachable` if there are none.
fn keep_ipv4<I>(addrs: I) -> io::Result<Vec<SocketAddrV4>>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let addrs: Vec<_> = addrs
        .into_iter()
        .filter_map(|a| match a {
            SocketAddr::V4(a) => Some(a),
            SocketAddr::V6(_) => None,
        })
        .collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::HostUnreachable,
            "no IPv4 address for destination",
        ));
    }
    Ok(addrs)
}

/// Find the IPv4 addresses to try for `request`.
///
/// Hostnames go to the system resolver; anything it returns other than
/// IPv4 is ignored.  An empty hostname never names anything, so it isn't
/// looked up.
async fn resolve_ipv4(request: &SocksRequest) -> io::Result<Vec<SocketAddrV4>> {
    let port = request.port();
    match request.addr() {
        SocksAddr::Ip(ip) => Ok(vec![SocketAddrV4::new(*ip, port)]),
        SocksAddr::Hostname(host) if host.as_ref().is_empty() => Err(io::Error::new(
            io::ErrorKind::HostUnreachable,
            "empty hostname",
        )),
        SocksAddr::Hostname(host) => {
            keep_ipv4(tokio::net::lookup_host((host.as_ref(), port)).await?)
        }
    }
}

/// Open a TCP connection to the destination named in `request`.
///
/// Tries each resolved address in turn, and reports the last failure if
/// none of them work.
async fn connect_any(request: &SocksRequest) -> io::Result<(TcpStream, SocketAddrV4)> {
    let mut last_err = None;
    for target in resolve_ipv4(request).await? {
        match TcpStream::connect(target).await {
            Ok(stream) => {
                let bound = bound_ipv4(stream.local_addr()?);
                return Ok((stream, bound));
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", target, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no address to connect to")))
}

/// As [`connect_any`], but bounded by the connect timeout, and with the
/// I/O timeout applied to the resulting stream.
async fn connect_destination(
    request: &SocksRequest,
    cfg: &SessionConfig,
) -> io::Result<(DestinationStream, SocketAddrV4)> {
    let (stream, bound) = tokio::time::timeout(cfg.connect_timeout, connect_any(request))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    Ok((TimeoutStream::new(stream.compat(), cfg.io_timeout), bound))
}

/// Send a failure reply, if we still can, and close the client stream.
///
/// Errors here are ignored: the session is over either way.
async fn reply_failure<W>(writer: &mut W, status: SocksStatus)
where
    W: AsyncWrite + Unpin,
{
    let reply = SocksReply::failure(status);
    let _ = write_all_and_close(writer, &reply.encode()).await;
}

/// Run the SOCKS5 handshake on a freshly accepted `client` stream.
///
/// On success, the destination connection is open and the client has been
/// told so; nothing has been relayed yet.  On failure, the client has been
/// sent a failure reply where possible and its stream has been closed.
pub async fn negotiate<S>(client: S, cfg: &SessionConfig) -> Result<Negotiated<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = SocksReader::new(client);

    // If the greeting is bad, the client isn't speaking SOCKS5: there's no
    // sensible reply to send it.
    let greeting = read_greeting(&mut reader)
        .await
        .context("Error while reading SOCKS greeting")?;
    if !greeting.offers_no_auth() {
        debug!(
            "Client offered methods {:?}; selecting no-auth anyway",
            greeting.methods()
        );
    }
    write_all_and_flush(reader.get_mut(), &METHOD_SELECTION_NO_AUTH).await?;

    let request = match read_request(&mut reader).await {
        Ok(r) => r,
        Err(e) => {
            reply_failure(reader.get_mut(), e.reply_status()).await;
            return Err(e).context("Error while reading SOCKS request");
        }
    };
    let mut client = reader.into_inner();
    debug!(
        "Got a socks request: {} {}:{}",
        request.command(),
        request.addr(),
        request.port()
    );

    let (destination, bound) = match connect_destination(&request, cfg).await {
        Ok(conn) => conn,
        Err(e) => {
            reply_failure(&mut client, connect_error_status(&e)).await;
            return Err(e).with_context(|| {
                format!("Can't connect to {}:{}", request.addr(), request.port())
            });
        }
    };
    info!("Connected to {}:{}", request.addr(), request.port());

    let reply = SocksReply::new(SocksStatus::SUCCEEDED, bound);
    write_all_and_flush(&mut client, &reply.encode()).await?;

    Ok(Negotiated {
        client,
        destination,
        request,
        bound,
    })
}

/// Given a just-accepted TCP connection from `peer`, run one whole SOCKS
/// session on it: handshake, connect, relay, close.
#[instrument(skip_all, fields(peer = %peer), level = "trace")]
pub async fn handle_socks_conn(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: SessionConfig,
) -> Result<()> {
    let client = TimeoutStream::new(stream.compat(), cfg.io_timeout);
    let Negotiated {
        mut client,
        mut destination,
        request,
        ..
    } = negotiate(client, &cfg).await?;

    // While relaying, one side may well stay quiet for a long time; only
    // the session as a whole going idle ends it.
    client.clear_read_timeout();
    destination.clear_read_timeout();
    let outcome = relay(client, destination, cfg.io_timeout).await;
    match (&outcome.error, outcome.ended_by) {
        (None, ended_by) => debug!(
            "Relay {} -> {}:{} closed by {} ({} bytes up, {} bytes down)",
            peer,
            request.addr(),
            request.port(),
            ended_by.map_or_else(|| "nobody".to_owned(), |d| d.to_string()),
            outcome.client_to_destination,
            outcome.destination_to_client
        ),
        (Some(e), Some(dir)) => warn!(
            "Relay {} -> {}:{} ended on {} error: {}",
            peer,
            request.addr(),
            request.port(),
            dir,
            e
        ),
        (Some(e), None) => debug!(
            "Relay {} -> {}:{} ended: {}",
            peer,
            request.addr(),
            request.port(),
            e
        ),
    }

    Ok(())
}
