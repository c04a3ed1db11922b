//! UDP "ping" probe: send a 20-byte zero payload, wait at most `timeout`
//! for any reply.

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::types::Target;

/// 20-byte zero payload, matching probe traffic backends expect to echo.
const PROBE_PAYLOAD: [u8; 20] = [0u8; 20];

pub struct ProbeOutcome {
    pub live: bool,
    pub rtt: Duration,
}

/// Resolve `target`, send the probe payload, and wait up to `timeout` for
/// any reply. Resolve failure or timeout both yield `live = false`.
pub async fn probe(target: &Target, timeout: Duration) -> ProbeOutcome {
    let addr = format!("{target}");
    let start = Instant::now();

    let result = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&addr).await?;
        socket.send(&PROBE_PAYLOAD).await?;
        let mut buf = [0u8; 64];
        socket.recv(&mut buf).await?;
        Ok::<_, std::io::Error>(())
    };

    match tokio::time::timeout(timeout, result).await {
        Ok(Ok(())) => ProbeOutcome { live: true, rtt: start.elapsed() },
        Ok(Err(e)) => {
            debug!(target = %target, error = %e, "probe failed");
            ProbeOutcome { live: false, rtt: Duration::ZERO }
        }
        Err(_) => {
            debug!(target = %target, "probe timed out");
            ProbeOutcome { live: false, rtt: Duration::ZERO }
        }
    }
}
