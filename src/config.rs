// Magic numbers live here, not scattered through the modules that use them.

/// Largest datagram accepted from a peer. Matches the DTLS engine's maximum
/// record buffer. The listen loop's recv buffer is one byte larger than
/// this (see `net::listen::run`), so a datagram that genuinely fills this
/// length is received in full and only a datagram that would have
/// overflowed it is reported as truncated and dropped.
pub const MAX_DATAGRAM_LEN: usize = 1500;

/// Idle interval after which a session with no traffic in either direction
/// is torn down. Spec leaves the exact value implementation-defined,
/// recommending 60-600s; we default to the low end for a constrained-device
/// backend where a dead session wastes a backend socket quickly.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Upper bound on the DTLS handshake itself, independent of the idle timer
/// (which only starts once a session exists).
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Router channel capacity per peer; a peer producing datagrams faster than
/// its DTLS task can drain them backpressures the listen loop's `send`,
/// which is intentional (UDP, no retry guarantee anyway).
pub const PEER_CHANNEL_CAPACITY: usize = 128;
