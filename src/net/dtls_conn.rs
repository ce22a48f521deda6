// DTLS handshake and relay surface, built on the `dtls` crate's actual
// integration points: an async `Conn` for transport and a `Config.psk`
// closure for PSK lookup.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::config;
use crate::core::session::teardown;
use crate::identity::PeerIdentity;
use crate::keystore::Keystore;
use crate::net::router::PeerPacketTx;
use crate::proxy::ProxyCore;

/// Spawned the first time a datagram is seen from a peer. Registers a route
/// in the packet router, then drives the handshake and (on success) the
/// plaintext-delivery loop to completion. Exactly one of these tasks exists
/// per live peer identity at a time.
pub async fn run_peer_connection(
    proxy: Arc<ProxyCore>,
    peer_addr: SocketAddr,
    first_datagram: Vec<u8>,
) {
    let peer_identity = PeerIdentity::new(peer_addr);
    let (adapter, tx) = ListenConn::new(Arc::clone(&proxy.listen_socket), peer_addr);

    proxy.router.insert(peer_identity, tx.clone()).await;
    // The datagram that caused this task to be spawned has already been
    // consumed by the listen loop's router lookup (it found no route), so
    // feed it in directly rather than losing it.
    let _ = tx.send(first_datagram).await;

    let timeout = tokio::time::Duration::from_secs(config::HANDSHAKE_TIMEOUT_SECS);
    let result = tokio::time::timeout(timeout, handshake(adapter, &proxy.keystore)).await;

    let dtls_conn = match result {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            warn!("[dtls] handshake failed peer={peer_identity}: {e}");
            proxy.router.remove(&peer_identity).await;
            return;
        }
        Err(_) => {
            warn!("[dtls] handshake timeout peer={peer_identity}");
            proxy.router.remove(&peer_identity).await;
            return;
        }
    };

    info!("[dtls] handshake complete peer={peer_identity}");

    // event(CONNECTED): new_session, then start_session.
    let session = match proxy
        .sessions
        .new_session(peer_identity, Arc::clone(&dtls_conn), Arc::downgrade(&proxy))
    {
        Ok(s) => s,
        Err(e) => {
            warn!("[dtls] new_session failed peer={peer_identity}: {e}");
            proxy.router.remove(&peer_identity).await;
            return;
        }
    };

    if let Err(e) = session
        .start(proxy.backend.addr(), proxy.idle_timeout)
        .await
    {
        warn!("[dtls] start_session failed peer={peer_identity}: {e}");
        proxy.sessions.free_session(&peer_identity);
        proxy.router.remove(&peer_identity).await;
        return;
    }

    // deliver-plaintext: one decrypted application-data record forwarded
    // to the backend as exactly one datagram.
    let backend_socket = session_backend_socket(&session);
    let mut buf = vec![0u8; config::MAX_DATAGRAM_LEN];
    loop {
        match dtls_conn.read(&mut buf, None).await {
            Ok(0) => {
                debug!("[dtls] close_notify peer={peer_identity}");
                break;
            }
            Ok(n) => {
                session.touch();
                if let Some(sock) = &backend_socket {
                    if let Err(e) = sock.send(&buf[..n]).await {
                        warn!("[dtls] backend send failed peer={peer_identity}: {e}");
                        break;
                    }
                }
            }
            Err(e) => {
                debug!("[dtls] read ended peer={peer_identity}: {e}");
                break;
            }
        }
    }

    teardown(&session).await;
}

fn session_backend_socket(session: &Arc<crate::core::Session>) -> Option<Arc<UdpSocket>> {
    // `Session` keeps the backend socket private; the read loop only needs
    // to send, which is exposed via this accessor kept next to the loop
    // that uses it rather than widening `Session`'s public surface.
    session.backend_socket_handle()
}

async fn handshake(
    conn: ListenConn,
    keystore: &Arc<Keystore>,
) -> Result<Arc<dtls::conn::DTLSConn>, Box<dyn std::error::Error + Send + Sync>> {
    use dtls::cipher_suite::CipherSuiteId;

    let keystore = Arc::clone(keystore);
    let psk_lookup = move |identity: &[u8]| -> webrtc_util::Result<Vec<u8>> {
        keystore
            .lookup(identity)
            .map(|key| key.to_vec())
            .ok_or_else(|| webrtc_util::Error::Other("unknown PSK identity".to_string()))
    };

    let dtls_config = dtls::config::Config {
        psk: Some(Arc::new(psk_lookup)),
        psk_identity_hint: Some(Vec::new()),
        // AES-128-CCM-8 is tinydtls's default PSK suite and the one the
        // original proxy this crate is based on was built against.
        cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Ccm8],
        extended_master_secret: dtls::config::ExtendedMasterSecretType::Require,
        ..Default::default()
    };

    let dtls_conn = dtls::conn::DTLSConn::new(conn, dtls_config, false, None).await?;
    Ok(Arc::new(dtls_conn))
}

/// Adapts the shared listen socket into a per-peer `webrtc_util::Conn` the
/// `dtls` crate can drive: outbound writes go straight out the listen
/// socket (send-on-wire), inbound reads come from the `mpsc` channel fed by
/// the listen loop's demultiplexer.
pub struct ListenConn {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    rx: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
}

impl ListenConn {
    pub fn new(socket: Arc<UdpSocket>, peer_addr: SocketAddr) -> (Self, PeerPacketTx) {
        let (tx, rx) = mpsc::channel(config::PEER_CHANNEL_CAPACITY);
        let adapter = Self {
            socket,
            peer_addr,
            rx: AsyncMutex::new(rx),
        };
        (adapter, tx)
    }
}

#[async_trait]
impl webrtc_util::Conn for ListenConn {
    async fn connect(&self, _addr: SocketAddr) -> webrtc_util::Result<()> {
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> webrtc_util::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(webrtc_util::Error::Other(
                "peer packet channel closed".to_string(),
            )),
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> webrtc_util::Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        Ok((n, self.peer_addr))
    }

    async fn send(&self, buf: &[u8]) -> webrtc_util::Result<usize> {
        // send-on-wire: non-blocking, best-effort, never retried — UDP
        // datagrams are atomic, so a short write is simply reported.
        self.socket
            .send_to(buf, self.peer_addr)
            .await
            .map_err(|e| webrtc_util::Error::Other(e.to_string()))
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> webrtc_util::Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> webrtc_util::Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| webrtc_util::Error::Other(e.to_string()))
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn close(&self) -> webrtc_util::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}
