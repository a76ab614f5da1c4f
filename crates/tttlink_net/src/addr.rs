//! Local address discovery for hosting.

use crate::error::{TransportError, TransportErrorKind};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, instrument, warn};

/// Unroutable probe target. Nothing is ever sent to it.
const PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 254, 254, 254), 1);

/// Finds the address this machine would use to reach the local network.
///
/// Connecting a UDP socket makes the OS pick a route and source address
/// without sending a packet.
///
/// # Errors
///
/// Returns [`TransportErrorKind::NoLocalAddress`] when no route exists or
/// the only candidate is loopback.
#[instrument]
pub fn detect_local_ip() -> Result<IpAddr, TransportError> {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(PROBE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            debug!(%ip, "Detected local address");
            Ok(ip)
        }
        Ok(ip) => {
            warn!(%ip, "Only a loopback address is available");
            Err(TransportErrorKind::NoLocalAddress.into())
        }
        Err(e) => {
            warn!(error = %e, "Local address probe failed");
            Err(TransportErrorKind::NoLocalAddress.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_address_is_never_loopback() {
        // Sandboxes may have no route at all; both answers are fine.
        match detect_local_ip() {
            Ok(ip) => assert!(!ip.is_loopback()),
            Err(e) => assert_eq!(e.kind, TransportErrorKind::NoLocalAddress),
        }
    }
}
