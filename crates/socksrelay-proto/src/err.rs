//! Declare an error type for socksrelay_proto
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::msg::{SocksCmd, SocksStatus};

/// An error that occurs while reading a SOCKS5 handshake.
#[derive(Clone, Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The stream ended before a complete field arrived.
    #[error("SOCKS message truncated: stream closed while reading a {wanted}-byte field")]
    Truncated {
        /// The length of the field we were reading.
        wanted: usize,
    },

    /// Reading from the underlying stream failed.
    #[error("I/O error while reading SOCKS handshake")]
    Io(#[source] Arc<io::Error>),

    /// The SOCKS client declared a SOCKS version number that isn't
    /// one we support.
    ///
    /// In all likelihood, this is somebody trying to use the port for
    /// some protocol other than SOCKS5.
    #[error("Unrecognized SOCKS protocol version {0}")]
    BadProtocol(u8),

    /// The client asked for something other than `CONNECT`.
    #[error("SOCKS command {0} not supported")]
    CommandNotSupported(SocksCmd),

    /// The client gave an address type we don't accept (IPv6, or garbage).
    #[error("SOCKS address type {0:#04x} not supported")]
    AddrTypeNotSupported(u8),

    /// A field was present but its contents made no sense.
    #[error("SOCKS protocol syntax violation: {0}")]
    Syntax(&'static str),
}

impl Error {
    /// Return the reply code we should send the client when a handshake
    /// fails with this error.
    ///
    /// Errors that happen before the client has sent its greeting can't be
    /// answered at all; that is up to the caller.
    pub fn reply_status(&self) -> SocksStatus {
        match self {
            Error::CommandNotSupported(_) => SocksStatus::COMMAND_NOT_SUPPORTED,
            Error::AddrTypeNotSupported(_) => SocksStatus::ADDRTYPE_NOT_SUPPORTED,
            Error::Truncated { .. } | Error::Io(_) | Error::BadProtocol(_) | Error::Syntax(_) => {
                SocksStatus::GENERAL_FAILURE
            }
        }
    }

    /// Wrap an I/O error from an exact read of `wanted` bytes.
    pub(crate) fn from_read(err: io::Error, wanted: usize) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated { wanted }
        } else {
            Error::Io(Arc::new(err))
        }
    }
}
