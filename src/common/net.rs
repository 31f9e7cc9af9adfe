use anyhow::Result;
use std::net::{IpAddr, UdpSocket};

const FALLBACK_ADDRESS: &str = "127.0.0.1";
const ROUTE_TARGET: &str = "8.8.8.8:80";

/// Returns the address this host uses to reach the outside world.
///
/// Connecting a UDP socket only selects a route, no packet leaves the host.
/// Falls back to the loopback address when no route is available.
pub fn local_address() -> String {
    match outward_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::debug!("Could not determine outward address ({}), using {}", e, FALLBACK_ADDRESS);
            FALLBACK_ADDRESS.to_string()
        }
    }
}

fn outward_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}
