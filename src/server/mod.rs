//! # Server Components
//!
//! ## Middleware ([`middleware`])
//! Accepts connections, decodes requests and answers them, and runs the
//! discovery responder next to the TCP listener.
//!
//! ## Task Engine ([`engine`])
//! Task creation, status and quantity tracking, new-task pushes.
//!
//! ## Sessions ([`sessions`])
//! Which connection each online operator is reachable on.

pub mod engine;
pub mod middleware;
pub mod sessions;

pub use engine::TaskEngine;
pub use middleware::{ConnectionState, ServerConfig, ServerMiddleware};
pub use sessions::{SessionHandle, SessionRegistry};
