use std::fmt;
use std::net::SocketAddr;

/// The sole demultiplexing key for everything in this crate: the remote
/// peer's socket address, compared bytewise over family, address bytes,
/// and port. `std::net::SocketAddr`'s `PartialEq` already does exactly
/// that, so this is a thin newtype rather than a reimplementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity(SocketAddr);

impl PeerIdentity {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for PeerIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}
