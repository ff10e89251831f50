//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`model`]: Operators, tasks and the two-conveyor layout
//! - [`messages`]: Request, response and push message definitions
//! - [`connection`]: Line-delimited JSON framing over TCP
//! - [`config`]: Configuration parsing utilities
//! - [`error`]: Domain error taxonomy

pub mod config;
pub mod connection;
pub mod error;
pub mod messages;
pub mod model;
