//! Structures that represent SOCKS5 messages

use crate::{Error, NO_AUTHENTICATION, Result, SOCKS_VERSION};

use caret::caret_int;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Address type code for an IPv4 address.
pub(crate) const ATYP_IPV4: u8 = 0x01;
/// Address type code for a length-prefixed hostname.
pub(crate) const ATYP_HOSTNAME: u8 = 0x03;

/// Our reply to every greeting: version 5, "no authentication required".
///
/// We never select any other method. A client that insists on
/// authentication will give up at this point, or fail later.
pub const METHOD_SELECTION_NO_AUTH: [u8; 2] = [SOCKS_VERSION, NO_AUTHENTICATION];

caret_int! {
    /// Command from the socks client telling us what to do.
    ///
    /// Unknown values are kept, so that they can be reported.
    pub struct SocksCmd(u8) {
        /// Connect to a remote TCP address:port.
        CONNECT = 1,
        /// Not supported.
        BIND = 2,
        /// Not supported.
        UDP_ASSOCIATE = 3,
    }
}

caret_int! {
    /// Possible reply status values from a SOCKS5 handshake.
    ///
    /// Note that the documentation for these values is kind of scant,
    /// and is limited to what the RFC says.
    pub struct SocksStatus(u8) {
        /// RFC 1928: "succeeded"
        SUCCEEDED = 0x00,
        /// RFC 1928: "general SOCKS server failure"
        GENERAL_FAILURE = 0x01,
        /// RFC 1928: "connection not allowable by ruleset"
        NOT_ALLOWED = 0x02,
        /// RFC 1928: "Network unreachable"
        NETWORK_UNREACHABLE = 0x03,
        /// RFC 1928: "Host unreachable"
        HOST_UNREACHABLE = 0x04,
        /// RFC 1928: "Connection refused"
        CONNECTION_REFUSED = 0x05,
        /// RFC 1928: "TTL expired"
        ///
        /// We also send this when connecting to the destination timed out.
        TTL_EXPIRED = 0x06,
        /// RFC 1928: "Command not supported"
        COMMAND_NOT_SUPPORTED = 0x07,
        /// RFC 1928: "Address type not supported"
        ADDRTYPE_NOT_SUPPORTED = 0x08,
    }
}

impl SocksStatus {
    /// Return true if this status reports success.
    pub fn is_success(self) -> bool {
        self == SocksStatus::SUCCEEDED
    }
}

/// A hostname for use with SOCKS.  It is limited in length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksHostname(String);

impl TryFrom<String> for SocksHostname {
    type Error = Error;
    fn try_from(s: String) -> Result<SocksHostname> {
        if s.len() > 255 {
            return Err(Error::Syntax("hostname too long"));
        }
        Ok(SocksHostname(s))
    }
}

impl AsRef<str> for SocksHostname {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<SocksHostname> for String {
    fn from(s: SocksHostname) -> String {
        s.0
    }
}

/// A destination address sent as part of a SOCKS request.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SocksAddr {
    /// A hostname, to be resolved by whoever opens the connection.
    Hostname(SocksHostname),
    /// A literal IPv4 address.
    Ip(Ipv4Addr),
}

impl fmt::Display for SocksAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksAddr::Ip(a) => write!(f, "{}", a),
            SocksAddr::Hostname(h) => write!(f, "{}", h.0),
        }
    }
}

/// The client's opening message: the authentication methods it offers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksGreeting {
    /// Offered method identifiers, in the order the client sent them.
    methods: Vec<u8>,
}

impl SocksGreeting {
    /// Construct a greeting from a list of offered methods.
    pub fn new(methods: Vec<u8>) -> Self {
        SocksGreeting { methods }
    }

    /// Return the methods the client offered.
    pub fn methods(&self) -> &[u8] {
        &self.methods[..]
    }

    /// Return true if the client said it can do without authentication.
    ///
    /// We select "no authentication" whatever this says.
    pub fn offers_no_auth(&self) -> bool {
        self.methods.contains(&NO_AUTHENTICATION)
    }
}

/// A completed SOCKS request, as negotiated on a SOCKS connection.
///
/// Once this request is done, we know where to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksRequest {
    /// The command requested by the SOCKS client.
    cmd: SocksCmd,
    /// The target address.
    addr: SocksAddr,
    /// The target port.
    port: u16,
}

impl SocksRequest {
    /// Create a SocksRequest with a given set of fields.
    pub fn new(cmd: SocksCmd, addr: SocksAddr, port: u16) -> Self {
        SocksRequest { cmd, addr, port }
    }

    /// Return the command that the client requested.
    pub fn command(&self) -> SocksCmd {
        self.cmd
    }

    /// Return the address that the client wants to connect to.
    pub fn addr(&self) -> &SocksAddr {
        &self.addr
    }

    /// Return the port that the client wants to connect to.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Our answer to a [`SocksRequest`].
///
/// The bound address is always sent as IPv4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocksReply {
    /// Whether the request worked.
    status: SocksStatus,
    /// Local endpoint of the destination connection.
    bound: SocketAddrV4,
}

impl SocksReply {
    /// Length of an encoded reply.
    pub const LEN: usize = 10;

    /// Construct a reply for a given status and bound endpoint.
    pub fn new(status: SocksStatus, bound: SocketAddrV4) -> Self {
        SocksReply { status, bound }
    }

    /// Construct a failure reply.  There is nothing bound, so we send
    /// `0.0.0.0:0`.
    pub fn failure(status: SocksStatus) -> Self {
        SocksReply::new(status, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
    }

    /// Return the status of this reply.
    pub fn status(&self) -> SocksStatus {
        self.status
    }

    /// Return the bound endpoint of this reply.
    pub fn bound(&self) -> SocketAddrV4 {
        self.bound
    }

    /// Encode this reply as `VER REP RSV ATYP BND.ADDR BND.PORT`.
    pub fn encode(&self) -> [u8; SocksReply::LEN] {
        let mut w = [0_u8; SocksReply::LEN];
        w[0] = SOCKS_VERSION;
        w[1] = self.status.into();
        w[2] = 0; // reserved.
        w[3] = ATYP_IPV4;
        w[4..8].copy_from_slice(&self.bound.ip().octets());
        w[8..10].copy_from_slice(&self.bound.port().to_be_bytes());
        w
    }
}
