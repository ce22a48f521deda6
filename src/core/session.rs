// Per-peer session lifecycle and the table that owns it: demultiplexing,
// backend socket ownership, and inactivity-driven expiry all meet here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::identity::PeerIdentity;
use crate::proxy::ProxyCore;

/// A connected peer's state. `backend_socket`, the reader task below, and
/// the idle timer are created together in `start_session` and torn down
/// together in `stop_session`.
pub struct Session {
    pub peer_identity: PeerIdentity,
    pub index: usize,

    /// The DTLS connection for this peer. Shared between the task that
    /// reads decrypted application data (feeding the backend) and the
    /// backend-read task (which writes back through this connection) —
    /// `DTLSConn`'s `read`/`write` both take `&self`, so concurrent use
    /// from two tasks in different directions is the intended API shape.
    pub dtls_conn: Arc<dtls::conn::DTLSConn>,

    backend_socket: StdMutex<Option<Arc<UdpSocket>>>,
    backend_task: StdMutex<Option<JoinHandle<()>>>,
    idle_task: StdMutex<Option<JoinHandle<()>>>,

    /// Updated on every observed datagram in either direction; consulted by
    /// the idle-timer task to decide whether the deadline has really
    /// elapsed or was just pushed out.
    pub last_active: Arc<StdMutex<Instant>>,

    stopped: AtomicBool,

    /// Non-owning back-reference so watcher tasks can reach the session
    /// table (to call `free_session`) and the backend address, without the
    /// proxy core needing to hand every task its own clone of everything.
    /// Safe because the proxy outlives all sessions by construction
    /// (shutdown stops every session before the core itself is dropped).
    proxy: Weak<ProxyCore>,
}

impl Session {
    fn new(
        peer_identity: PeerIdentity,
        index: usize,
        dtls_conn: Arc<dtls::conn::DTLSConn>,
        proxy: Weak<ProxyCore>,
    ) -> Self {
        Self {
            peer_identity,
            index,
            dtls_conn,
            backend_socket: StdMutex::new(None),
            backend_task: StdMutex::new(None),
            idle_task: StdMutex::new(None),
            last_active: Arc::new(StdMutex::new(Instant::now())),
            stopped: AtomicBool::new(false),
            proxy,
        }
    }

    pub fn touch(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Creates the backend socket, connects it, spawns its readable
    /// watcher, arms the idle timer. Rolls back on any failure.
    pub async fn start(self: &Arc<Self>, backend_addr: SocketAddr, idle_timeout: Duration) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(backend_addr).await?;
        let socket = Arc::new(socket);

        *self.backend_socket.lock().unwrap() = Some(Arc::clone(&socket));

        let backend_task = tokio::spawn(run_backend_reader(Arc::clone(self), Arc::clone(&socket)));
        *self.backend_task.lock().unwrap() = Some(backend_task);

        let idle_task = tokio::spawn(run_idle_timer(Arc::clone(self), idle_timeout));
        *self.idle_task.lock().unwrap() = Some(idle_task);

        debug!(
            "[session] started peer={} index={} backend={}",
            self.peer_identity, self.index, backend_addr
        );
        Ok(())
    }

    /// Deregisters the backend watcher, disarms the idle timer, closes the
    /// backend socket. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return; // already stopped
        }

        if let Some(handle) = self.backend_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.idle_task.lock().unwrap().take() {
            handle.abort();
        }
        // Dropping the last `Arc<UdpSocket>` closes the backend socket.
        self.backend_socket.lock().unwrap().take();

        debug!("[session] stopped peer={} index={}", self.peer_identity, self.index);
    }

    fn backend_socket(&self) -> Option<Arc<UdpSocket>> {
        self.backend_socket.lock().unwrap().clone()
    }

    /// Exposed so the peer-side read loop (`net::dtls_conn`) can forward
    /// decrypted application data to the backend without `Session` growing
    /// a `deliver_plaintext` method of its own — the loop that calls this
    /// already owns the retry/error policy for that send.
    pub fn backend_socket_handle(&self) -> Option<Arc<UdpSocket>> {
        self.backend_socket()
    }

    fn proxy(&self) -> Option<Arc<ProxyCore>> {
        self.proxy.upgrade()
    }
}

/// One `recv` from the backend socket, forwarded into the DTLS connection
/// for re-encryption and delivery to the peer (send-on-wire happens inside
/// `dtls_conn.write`). Any error other than the socket having been closed
/// out from under it (which only happens via our own `stop`) tears the
/// session down.
async fn run_backend_reader(session: Arc<Session>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; crate::config::MAX_DATAGRAM_LEN];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => {
                session.touch();
                if let Err(e) = session.dtls_conn.write(&buf[..n], None).await {
                    warn!(
                        "[session] dtls write failed peer={} : {e}",
                        session.peer_identity
                    );
                    break;
                }
            }
            Err(e) => {
                warn!(
                    "[session] backend recv failed peer={} : {e}",
                    session.peer_identity
                );
                break;
            }
        }
    }

    teardown(&session).await;
}

/// A single resettable timer per session. Rechecks `last_active` on every
/// wake rather than assuming the first deadline it computed still holds,
/// since a write can race the sleep.
async fn run_idle_timer(session: Arc<Session>, idle: Duration) {
    loop {
        if session.is_stopped() {
            return;
        }

        let deadline = *session.last_active.lock().unwrap() + idle;
        let now = Instant::now();

        if now >= deadline {
            break;
        }

        tokio::time::sleep_until(deadline.into()).await;
    }

    info!(
        "[session] idle timeout peer={} index={}",
        session.peer_identity, session.index
    );

    let _ = session.dtls_conn.close().await;
    teardown(&session).await;
}

/// Shared by every path that can end a session's life (idle timeout,
/// backend fatal error, peer close-notify observed by the read loop in
/// `net::dtls_conn`): stop, then remove from the table. `stop` is
/// idempotent so whichever path gets here first does the real work.
pub async fn teardown(session: &Arc<Session>) {
    session.stop();
    if let Some(proxy) = session.proxy() {
        proxy.sessions.free_session(&session.peer_identity);
        proxy.router.remove(&session.peer_identity).await;
    }
}

/// Peer identity -> session, populated only after the DTLS handshake
/// completes.
pub struct SessionTable {
    sessions: StdMutex<HashMap<PeerIdentity, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Allocates the smallest unused non-negative index and creates the
    /// session. Fails if the identity is already present.
    pub fn new_session(
        &self,
        peer_identity: PeerIdentity,
        dtls_conn: Arc<dtls::conn::DTLSConn>,
        proxy: Weak<ProxyCore>,
    ) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap();

        if sessions.contains_key(&peer_identity) {
            return Err(ProxyError::Dtls(format!(
                "session already exists for peer {peer_identity}"
            )));
        }

        let index = smallest_unused_index(sessions.values().map(|s| s.index));
        let session = Arc::new(Session::new(peer_identity, index, dtls_conn, proxy));
        sessions.insert(peer_identity, Arc::clone(&session));

        info!("[session-table] new session peer={peer_identity} index={index}");
        Ok(session)
    }

    pub fn find_session(&self, peer_identity: &PeerIdentity) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(peer_identity).cloned()
    }

    /// Caller must have called `Session::stop` first (enforced here only by
    /// `teardown` always doing so, not by a runtime check).
    pub fn free_session(&self, peer_identity: &PeerIdentity) {
        if self.sessions.lock().unwrap().remove(peer_identity).is_some() {
            info!("[session-table] freed session peer={peer_identity}");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Walks every live session exactly once; used by shutdown iteration.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn smallest_unused_index(used: impl Iterator<Item = usize>) -> usize {
    let mut used: Vec<usize> = used.collect();
    used.sort_unstable();
    let mut candidate = 0usize;
    for idx in used {
        if idx == candidate {
            candidate += 1;
        } else if idx > candidate {
            break;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_unused_index_fills_gaps() {
        assert_eq!(smallest_unused_index(std::iter::empty()), 0);
        assert_eq!(smallest_unused_index(vec![0, 1, 2].into_iter()), 3);
        assert_eq!(smallest_unused_index(vec![0, 2, 3].into_iter()), 1);
        assert_eq!(smallest_unused_index(vec![1, 2, 3].into_iter()), 0);
    }
}
