//! Server side of discovery: answers `DISCOVER_SERVER_REQUEST` broadcasts.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::{unix_timestamp, ServerAnnouncement, DISCOVERY_REQUEST, MAX_DATAGRAM};

const RECEIVE_BACKOFF: Duration = Duration::from_millis(50);

/// Stopped until [`start`](Self::start), listening until [`stop`](Self::stop).
pub struct DiscoveryResponder {
    server_name: String,
    server_port: u16,
    discovery_port: u16,
    listener: Option<(SocketAddr, JoinHandle<()>)>,
}

impl DiscoveryResponder {
    /// # Arguments
    /// - `server_name`: name put in every announcement
    /// - `server_port`: TCP port announced to clients
    /// - `discovery_port`: UDP port to listen on (0 picks a free one)
    pub fn new(server_name: impl Into<String>, server_port: u16, discovery_port: u16) -> Self {
        Self {
            server_name: server_name.into(),
            server_port,
            discovery_port,
            listener: None,
        }
    }

    /// Bind the discovery socket and start answering requests.
    /// Calling it while already listening returns the existing address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some((addr, _)) = &self.listener {
            return Ok(*addr);
        }

        let socket = bind_broadcast_socket(self.discovery_port)
            .with_context(|| format!("binding discovery port {}", self.discovery_port))?;
        let local_addr = socket.local_addr()?;

        info!("📡 UDP discovery listening on port {}", local_addr.port());

        let server_name = self.server_name.clone();
        let server_port = self.server_port;
        let handle = tokio::spawn(async move {
            answer_requests(socket, server_name, server_port).await;
        });

        self.listener = Some((local_addr, handle));
        Ok(local_addr)
    }

    /// Close the socket. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some((addr, handle)) = self.listener.take() {
            handle.abort();
            info!("🛑 UDP discovery on port {} stopped", addr.port());
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|(addr, _)| *addr)
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// UDP socket with `SO_REUSEADDR` and `SO_BROADCAST`, bound on all interfaces.
fn bind_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn answer_requests(socket: UdpSocket, server_name: String, server_port: u16) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier replies surface here; keep serving.
                warn!("⚠️  Discovery receive failed: {}", e);
                tokio::time::sleep(RECEIVE_BACKOFF).await;
                continue;
            }
        };

        let payload = String::from_utf8_lossy(&buf[..len]);
        if payload.trim() != DISCOVERY_REQUEST {
            debug!("Ignoring {} byte datagram from {}", len, peer);
            continue;
        }

        let announcement = ServerAnnouncement {
            server_name: server_name.clone(),
            host: peer.ip().to_string(),
            port: server_port,
            timestamp: unix_timestamp(),
        };

        let reply = match serde_json::to_vec(&announcement) {
            Ok(reply) => reply,
            Err(e) => {
                error!("❌ Failed to encode discovery reply: {}", e);
                continue;
            }
        };

        match socket.send_to(&reply, peer).await {
            Ok(_) => info!("📨 Sent discovery reply to {}", peer),
            Err(e) => warn!("⚠️  Failed to send discovery reply to {}: {}", peer, e),
        }
    }
}
