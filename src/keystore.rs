// PSK credential store. Loaded once at startup from a text file; consulted
// on every DTLS handshake's PSK lookup.

use crate::error::{ProxyError, Result};

/// One `(identity, key)` pair, immutable after load.
struct Entry {
    identity: Vec<u8>,
    key: Vec<u8>,
}

/// An ordered, immutable sequence of PSK entries. Lookup is a linear scan in
/// load order (sessions/peers are few, and load order determines which
/// entry wins on a duplicate identity).
///
/// Backed by a plain `Vec`, not `RwLock<Vec<_>>`: every lookup happens on
/// the single task driving a given peer's DTLS handshake, and the store
/// itself is never mutated after `load`, so there is nothing to
/// synchronize.
pub struct Keystore {
    entries: Vec<Entry>,
}

impl Keystore {
    /// Parses `identity:hex_key` lines. Blank lines and lines starting with
    /// `#` are ignored.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (identity, hex_key) = line.split_once(':').ok_or_else(|| {
                ProxyError::Keystore(format!("line {}: expected 'identity:hex_key'", lineno + 1))
            })?;

            if identity.is_empty() {
                return Err(ProxyError::Keystore(format!(
                    "line {}: empty identity",
                    lineno + 1
                )));
            }

            let key = hex::decode(hex_key.trim()).map_err(|e| {
                ProxyError::Keystore(format!("line {}: invalid hex key: {e}", lineno + 1))
            })?;

            if key.is_empty() {
                return Err(ProxyError::Keystore(format!(
                    "line {}: empty key",
                    lineno + 1
                )));
            }

            entries.push(Entry {
                identity: identity.as_bytes().to_vec(),
                key,
            });
        }

        if entries.is_empty() {
            return Err(ProxyError::Keystore("no PSK entries found".to_string()));
        }

        Ok(Self { entries })
    }

    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::Keystore(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&contents)
    }

    /// Linear scan, length first then bytewise, first hit wins. Returns the
    /// exact stored key bytes on match, `None` on no match. The caller (the
    /// `dtls` crate's PSK callback) maps `None` to a fatal decrypt-error
    /// alert and `Some` to the key it uses for the handshake.
    pub fn lookup(&self, identity: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.identity.len() == identity.len() && e.identity == identity)
            .map(|e| e.key.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
