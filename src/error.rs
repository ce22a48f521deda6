use std::fmt;

/// Crate-wide error type. `Startup` is fatal (non-zero exit); everything
/// else is scoped to one peer/session and must never be allowed to
/// propagate across peers.
#[derive(Debug)]
pub enum ProxyError {
    /// Bad listen/backend address, bind failure, bad keystore file, DTLS
    /// config construction failure.
    Startup(String),

    /// Keystore load/parse failure. Folded into `Startup` at the call site
    /// in `main`/`run` but kept distinct here so `Keystore::load` can report
    /// precisely what went wrong.
    Keystore(String),

    /// DTLS protocol failure for a single peer (bad record, failed
    /// handshake, unknown PSK identity). The peer simply never reaches
    /// `CONNECTED`; no session is created.
    Dtls(String),

    /// Socket I/O failure. Transient (`WouldBlock`) errors are handled at
    /// the call site and never constructed as this variant; this variant
    /// represents an unrecoverable backend socket error that tears down
    /// the owning session.
    Io(std::io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Startup(msg)  => write!(f, "startup failed: {msg}"),
            ProxyError::Keystore(msg) => write!(f, "keystore load failed: {msg}"),
            ProxyError::Dtls(msg)     => write!(f, "dtls error: {msg}"),
            ProxyError::Io(err)       => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
