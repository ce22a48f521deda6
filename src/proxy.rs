// Wires the listen socket, the DTLS configuration, and the session table
// together: the proxy's top-level owned state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::SessionTable;
use crate::error::{ProxyError, Result};
use crate::identity::PeerIdentity;
use crate::keystore::Keystore;
use crate::net::{listen, PacketRouter};

/// Reserves the shape of a multi-backend design without implementing
/// selection — `count` is always 1 and `cursor` is never advanced. A
/// future multi-backend design would resolve `count` addresses and
/// round-robin `cursor` over them.
pub struct BackendTarget {
    addrs: Vec<SocketAddr>,
    cursor: AtomicUsize,
}

impl BackendTarget {
    pub fn single(addr: SocketAddr) -> Self {
        Self {
            addrs: vec![addr],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        let idx = self.cursor.load(Ordering::Relaxed) % self.addrs.len();
        self.addrs[idx]
    }

    pub fn count(&self) -> usize {
        self.addrs.len()
    }
}

pub struct ProxyCore {
    pub listen_socket: Arc<UdpSocket>,
    pub backend: BackendTarget,
    pub keystore: Arc<Keystore>,
    pub sessions: Arc<SessionTable>,
    pub router: Arc<PacketRouter>,
    pub idle_timeout: Duration,

    listen_task: StdMutex<Option<JoinHandle<()>>>,

    /// One entry per live `net::dtls_conn::run_peer_connection` task, from
    /// the moment it is spawned (first datagram from a new peer) until it
    /// exits — this outlives `SessionTable` entries on one end (a
    /// mid-handshake peer has a task here but no session yet) and overlaps
    /// them on the other (an established session's task is still the one
    /// relaying its traffic). `shutdown` aborts every entry here so no
    /// per-peer processing survives it, regardless of handshake state.
    peer_tasks: StdMutex<HashMap<PeerIdentity, JoinHandle<()>>>,
}

pub struct ProxyArgs {
    pub listen_addr: String,
    pub backend_addr: String,
    pub psk_file: std::path::PathBuf,
    pub idle_timeout: Duration,
}

impl ProxyCore {
    /// Resolves both addresses (via the standard resolver, which handles
    /// bracketed IPv6 `host:port` parsing by splitting on the address's
    /// structure rather than a naive last-`:` split), loads the keystore,
    /// and binds the listen socket. Any failure here is fatal.
    pub async fn bind(args: ProxyArgs) -> Result<Arc<Self>> {
        let listen_addr = resolve_one(&args.listen_addr).await?;
        let backend_addr = resolve_one(&args.backend_addr).await?;

        let keystore = Keystore::load(&args.psk_file).await?;
        info!("[proxy] keystore loaded, {} entries", keystore.len());

        let socket = UdpSocket::bind(listen_addr)
            .await
            .map_err(|e| ProxyError::Startup(format!("bind {listen_addr}: {e}")))?;
        info!("[proxy] listening on {listen_addr}");
        info!("[proxy] backend {backend_addr}");

        Ok(Arc::new(Self {
            listen_socket: Arc::new(socket),
            backend: BackendTarget::single(backend_addr),
            keystore: Arc::new(keystore),
            sessions: Arc::new(SessionTable::new()),
            router: Arc::new(PacketRouter::new()),
            idle_timeout: args.idle_timeout,
            listen_task: StdMutex::new(None),
            peer_tasks: StdMutex::new(HashMap::new()),
        }))
    }

    /// Starts the listen loop as the one long-lived task; every per-peer
    /// task it spawns is independent of it.
    pub fn run(self: &Arc<Self>) {
        let handle = tokio::spawn(listen::run(Arc::clone(self)));
        *self.listen_task.lock().unwrap() = Some(handle);
    }

    /// Registers the `JoinHandle` of a freshly spawned per-peer connection
    /// task so `shutdown` can reach it later. Called from `net::listen`
    /// right after `tokio::spawn`.
    pub(crate) fn track_peer_task(&self, peer: PeerIdentity, handle: JoinHandle<()>) {
        self.peer_tasks.lock().unwrap().insert(peer, handle);
    }

    /// Drops the tracked handle once a per-peer connection task exits on
    /// its own, so `peer_tasks` doesn't grow unbounded over the proxy's
    /// lifetime.
    pub(crate) fn untrack_peer_task(&self, peer: &PeerIdentity) {
        self.peer_tasks.lock().unwrap().remove(peer);
    }

    /// Stops every per-peer connection task (covering both established
    /// sessions and peers still mid-handshake, which have no `Session` yet
    /// but do have a task relaying on their behalf), stops every session
    /// (backend sockets closed, timers disarmed), clears the router, and
    /// stops the listen task. Sessions themselves are left in the table
    /// until the caller drops the `ProxyCore`, so nothing still racing
    /// against the DTLS engine dereferences freed state.
    pub async fn shutdown(&self) {
        info!("[proxy] shutting down, {} live session(s)", self.sessions.len());

        // Abort every per-peer task first: the read loop inside it holds
        // its own clone of the session's backend socket, so stopping the
        // session alone does not stop that task from continuing to relay.
        for (_, handle) in self.peer_tasks.lock().unwrap().drain() {
            handle.abort();
        }

        for session in self.sessions.all() {
            session.stop();
        }

        if let Some(handle) = self.listen_task.lock().unwrap().take() {
            handle.abort();
        }

        for session in self.sessions.all() {
            self.sessions.free_session(&session.peer_identity);
        }

        self.router.clear().await;

        info!("[proxy] shutdown complete");
    }
}

async fn resolve_one(host_port: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| ProxyError::Startup(format!("cannot resolve {host_port}: {e}")))?
        .next()
        .ok_or_else(|| ProxyError::Startup(format!("no address found for {host_port}")))
}
