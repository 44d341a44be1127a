//! Read the client side of a SOCKS5 handshake.
//!
//! Every field is read with [`SocksReader`], which either returns exactly
//! the number of bytes asked for or fails.  We never read past the end of
//! the request, so the underlying stream is ready for relaying as soon as
//! [`read_request`] returns.

use crate::msg::{ATYP_HOSTNAME, ATYP_IPV4};
use crate::{Error, Result, SOCKS_VERSION, SocksAddr, SocksCmd, SocksGreeting, SocksRequest};

use futures::io::{AsyncRead, AsyncReadExt};

use std::net::Ipv4Addr;

/// Exact-length reader over a client stream.
///
/// This is the only place that handshake bytes are consumed.
#[derive(Debug)]
pub struct SocksReader<R> {
    /// The client stream.
    inner: R,
}

impl<R: AsyncRead + Unpin> SocksReader<R> {
    /// Wrap a stream.
    pub fn new(inner: R) -> Self {
        SocksReader { inner }
    }

    /// Fill `buf` completely from the stream.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.inner
            .read_exact(buf)
            .await
            .map_err(|e| Error::from_read(e, buf.len()))
    }

    /// Read exactly `N` bytes.
    pub async fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0_u8; N];
        self.fill(&mut buf[..]).await?;
        Ok(buf)
    }

    /// Read exactly `n` bytes.  If `n` is zero, nothing is read.
    pub async fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; n];
        self.fill(&mut buf[..]).await?;
        Ok(buf)
    }

    /// Read a single byte.
    pub async fn take_u8(&mut self) -> Result<u8> {
        let [b] = self.take_array().await?;
        Ok(b)
    }

    /// Read a big-endian u16.
    pub async fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array().await?))
    }

    /// Return a mutable reference to the underlying stream, so that
    /// replies can be written to it.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Reject any version byte that isn't 5.
fn check_version(version: u8) -> Result<()> {
    if version != SOCKS_VERSION {
        return Err(Error::BadProtocol(version));
    }
    Ok(())
}

/// Read the client's greeting: `VER NMETHODS METHODS`.
pub async fn read_greeting<R>(r: &mut SocksReader<R>) -> Result<SocksGreeting>
where
    R: AsyncRead + Unpin,
{
    let [version, nmethods] = r.take_array().await?;
    check_version(version)?;
    let methods = r.take(nmethods.into()).await?;
    Ok(SocksGreeting::new(methods))
}

/// Read the client's request: `VER CMD RSV ATYP DST.ADDR DST.PORT`.
///
/// Fails without reading the address if the command isn't `CONNECT`, or if
/// the address type isn't IPv4 or a hostname.
pub async fn read_request<R>(r: &mut SocksReader<R>) -> Result<SocksRequest>
where
    R: AsyncRead + Unpin,
{
    let [version, cmd, _reserved, atyp] = r.take_array().await?;
    check_version(version)?;

    let cmd = SocksCmd::from(cmd);
    if cmd != SocksCmd::CONNECT {
        return Err(Error::CommandNotSupported(cmd));
    }

    let addr = match atyp {
        ATYP_IPV4 => {
            let octets: [u8; 4] = r.take_array().await?;
            SocksAddr::Ip(Ipv4Addr::from(octets))
        }
        ATYP_HOSTNAME => {
            let hlen = r.take_u8().await?;
            let hostname = r.take(hlen.into()).await?;
            let hostname = String::from_utf8(hostname)
                .map_err(|_| Error::Syntax("bad utf8 on hostname"))?
                .try_into()?;
            SocksAddr::Hostname(hostname)
        }
        other => return Err(Error::AddrTypeNotSupported(other)),
    };
    let port = r.take_u16().await?;

    Ok(SocksRequest::new(cmd, addr, port))
}
