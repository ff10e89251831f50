//! # Server Discovery
//!
//! Lets a client find the server without a configured address. The client
//! broadcasts the ASCII token [`DISCOVERY_REQUEST`] on the discovery port;
//! every running server answers unicast with a [`ServerAnnouncement`].
//!
//! ```text
//! client  --(broadcast) DISCOVER_SERVER_REQUEST-->  responder
//! client  <--(unicast) {"server_name", "host", "port", "timestamp"}--
//! ```
//!
//! The responder does not know its own reachable address. The requester
//! therefore trusts the source address it observed the reply from.

pub mod requester;
pub mod responder;

pub use requester::{DiscoveredServer, DiscoveryRequester};
pub use responder::DiscoveryResponder;

use serde::{Deserialize, Serialize};

/// Literal request payload.
pub const DISCOVERY_REQUEST: &str = "DISCOVER_SERVER_REQUEST";

/// Name servers announce unless configured otherwise.
pub const DEFAULT_SERVER_NAME: &str = "ProductionServer";

/// Largest datagram either side reads.
const MAX_DATAGRAM: usize = 1024;

/// Discovery reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAnnouncement {
    pub server_name: String,
    /// Address the responder saw the request come from.
    pub host: String,
    /// TCP port operators should connect to.
    pub port: u16,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
}

fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
