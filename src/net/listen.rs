// The listen socket's readable handler: one datagram at a time via
// `recv_from` into a fixed buffer, demultiplexed to the peer's DTLS
// connection task (spawning one if none exists yet).

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config;
use crate::identity::PeerIdentity;
use crate::net::dtls_conn::run_peer_connection;
use crate::proxy::ProxyCore;

pub async fn run(proxy: Arc<ProxyCore>) {
    // One byte larger than the accepted max so a datagram that exactly
    // fills `MAX_DATAGRAM_LEN` is received whole; only a datagram that
    // would have overflowed even this buffer is truncation evidence.
    let mut buf = vec![0u8; config::MAX_DATAGRAM_LEN + 1];

    loop {
        let (len, peer_addr) = match proxy.listen_socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("[listen] recv_from error: {e}");
                continue;
            }
        };

        // tokio's safe `recv_from` does not surface `MSG_TRUNC` directly;
        // filling the oversized buffer past the accepted max is the
        // detectable proxy for truncation and is dropped rather than fed
        // to the DTLS engine as a partial record.
        if len > config::MAX_DATAGRAM_LEN {
            warn!("[listen] datagram from {peer_addr} possibly truncated, dropping");
            continue;
        }

        let peer_identity = PeerIdentity::new(peer_addr);
        let packet = buf[..len].to_vec();

        trace!("[listen] recv {len} bytes from {peer_addr}");

        if proxy.router.inject(&peer_identity, packet.clone()).await {
            continue;
        }

        debug!("[listen] no route for {peer_addr}, spawning connection task");
        let task_proxy = Arc::clone(&proxy);
        let handle = tokio::spawn(async move {
            run_peer_connection(Arc::clone(&task_proxy), peer_addr, packet).await;
            task_proxy.untrack_peer_task(&peer_identity);
        });
        proxy.track_peer_task(peer_identity, handle);
    }
}
