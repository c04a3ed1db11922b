//! UDP listener read loop: one shared socket receives every client
//! datagram, derives a destination key from the IPv4 header, gets or
//! creates a session for `(client, server)`, and forwards the payload.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::error;

use crate::ipv4;
use crate::session::{SessionManagerHandle, UDP_PACKET_SIZE};

/// Run until `stop_rx` reports true. Each datagram is handed to a detached
/// task so one slow session lookup never blocks the next read.
pub async fn run(socket: Arc<UdpSocket>, sessions: SessionManagerHandle, mut stop_rx: watch::Receiver<bool>) {
    let mut buf = vec![0u8; UDP_PACKET_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, client_addr)) => {
                        let dst = ipv4::extract_destination(&buf[..n]);
                        let payload = buf[..n].to_vec();
                        let sessions = sessions.clone();
                        tokio::spawn(async move {
                            match sessions.get_or_create(client_addr, dst).await {
                                Ok(handle) => {
                                    if let Err(e) = handle.send(&payload).await {
                                        error!(client = %client_addr, error = %e, "error forwarding datagram to backend");
                                    }
                                }
                                Err(e) => error!(client = %client_addr, error = %e, "error creating session"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "udp read error");
                    }
                }
            }

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}
