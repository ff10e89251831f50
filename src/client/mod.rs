//! # Client Components
//!
//! ## Core Client ([`client`])
//! One connection, one request at a time, pushes routed to a separate
//! receiver.
//!
//! ## Client Middleware ([`middleware`])
//! Server lookup (configured or discovered), connection retries, login,
//! the local task view and heartbeats.

pub mod client;
pub mod middleware;
pub mod view;

pub use client::ClientCore;
pub use middleware::{ClientConfig, ClientMiddleware};
pub use view::TaskView;
