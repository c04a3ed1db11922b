//! IPv4 header parsing consumed as an opaque helper: given a raw datagram
//! payload, return the destination address carried in its leading IPv4
//! header so the session layer has something stable to key the ring on.

use std::net::{IpAddr, Ipv4Addr};

/// Destination address field offset in a standard (no-options) IPv4 header.
const DST_OFFSET: usize = 16;
const DST_LEN: usize = 4;

/// Extract the destination address from the first 20 bytes of `datagram`.
/// Datagrams too short to carry a full header (synthetic test traffic,
/// malformed packets) still need a deterministic ring key, so this never
/// fails: it folds whatever leading bytes exist into a pseudo-address
/// instead of dropping the packet.
pub fn extract_destination(datagram: &[u8]) -> IpAddr {
    if datagram.len() >= DST_OFFSET + DST_LEN {
        let b = &datagram[DST_OFFSET..DST_OFFSET + DST_LEN];
        return IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]));
    }

    let mut padded = [0u8; DST_LEN];
    let n = datagram.len().min(DST_LEN);
    padded[..n].copy_from_slice(&datagram[..n]);
    IpAddr::V4(Ipv4Addr::from(padded))
}
