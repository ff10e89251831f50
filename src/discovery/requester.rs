//! Client side of discovery: broadcast once, collect replies until the
//! window closes.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use super::{ServerAnnouncement, DISCOVERY_REQUEST, MAX_DATAGRAM};

/// A server that answered, addressed by where its reply came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredServer {
    pub server_name: String,
    /// Observed source address of the reply.
    pub host: IpAddr,
    pub port: u16,
    pub timestamp: f64,
}

impl DiscoveredServer {
    /// TCP endpoint to connect to.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

pub struct DiscoveryRequester {
    broadcast_address: String,
    discovery_port: u16,
}

impl DiscoveryRequester {
    pub fn new(broadcast_address: impl Into<String>, discovery_port: u16) -> Self {
        Self {
            broadcast_address: broadcast_address.into(),
            discovery_port,
        }
    }

    /// Broadcast a request and return every reply received within `window`,
    /// in arrival order. An empty list means no server answered.
    pub async fn discover_servers(&self, window: Duration) -> Result<Vec<DiscoveredServer>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding discovery request socket")?;
        socket.set_broadcast(true)?;

        let target = (self.broadcast_address.as_str(), self.discovery_port);
        if let Err(e) = socket.send_to(DISCOVERY_REQUEST.as_bytes(), target).await {
            warn!(
                "⚠️  Discovery broadcast to {}:{} failed: {}",
                self.broadcast_address, self.discovery_port, e
            );
            return Ok(Vec::new());
        }
        debug!(
            "Sent discovery request to {}:{}",
            self.broadcast_address, self.discovery_port
        );

        let deadline = Instant::now() + window;
        let mut servers = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    // e.g. ICMP port unreachable when nobody listens locally
                    debug!("Discovery receive error: {}", e);
                    continue;
                }
            };

            match serde_json::from_slice::<ServerAnnouncement>(&buf[..len]) {
                Ok(announcement) => {
                    let server = DiscoveredServer {
                        server_name: announcement.server_name,
                        host: from.ip(),
                        port: announcement.port,
                        timestamp: announcement.timestamp,
                    };
                    info!(
                        "🔎 Found server '{}' at {}",
                        server.server_name,
                        server.address()
                    );
                    servers.push(server);
                }
                Err(e) => debug!("Skipping non-JSON reply from {}: {}", from, e),
            }
        }

        Ok(servers)
    }

    /// First server to answer within `window`, `None` if nobody did.
    pub async fn discover_first_server(&self, window: Duration) -> Result<Option<DiscoveredServer>> {
        let servers = self.discover_servers(window).await?;
        if servers.is_empty() {
            info!("No server answered discovery within {:?}", window);
        }
        Ok(servers.into_iter().next())
    }
}
