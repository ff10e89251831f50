pub mod client;
pub mod common;
pub mod discovery;
pub mod server;
pub mod store;

pub use common::error::{HubError, HubResult};
pub use server::ServerMiddleware;
