//! # Client Middleware
//!
//! Everything around the raw connection:
//! - **Server lookup**: configured address, or UDP discovery when none is set
//! - **Connection retries**: a few attempts with a pause in between
//! - **Login** and the initial task fetch
//! - **Task view**: merges `new_task` pushes into the local conveyors
//! - **Heartbeats** on a fixed interval while running
//!
//! The actual request/response traffic is done by
//! [`ClientCore`](super::client::ClientCore).
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config: ClientConfig = load_config("config/client.toml")?;
//! let mut middleware = ClientMiddleware::start(config).await?;
//! middleware.run().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::client::ClientCore;
use super::view::TaskView;
use crate::common::config::DiscoveryConfig;
use crate::common::error::{HubError, HubResult};
use crate::common::messages::{Notification, UserType};
use crate::common::model::Task;
use crate::discovery::DiscoveryRequester;

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const RETRY_INTERVAL_SECS: u64 = 2;

/// Client configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [client]
/// username = "operator1"
/// password = "pass1"
/// # server_address = "192.168.1.10:12345"   # omit to use discovery
///
/// [discovery]
/// port = 12346
/// timeout_secs = 5
///
/// [requests]
/// timeout_secs = 10
/// heartbeat_secs = 5
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientInfo,
    pub discovery: DiscoveryConfig,
    pub requests: RequestConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub username: String,
    pub password: String,
    /// Skips discovery when set
    pub server_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// How long a request waits for its response
    pub timeout_secs: u64,
    /// Interval between heartbeats while running
    pub heartbeat_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            heartbeat_secs: 5,
        }
    }
}

pub struct ClientMiddleware {
    config: ClientConfig,
    core: Arc<ClientCore>,
    user_type: UserType,
    view: TaskView,
}

impl ClientMiddleware {
    /// Find the server, connect, log in and fetch the operator's tasks.
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let address = resolve_server(&config).await?;
        let core = Arc::new(connect_with_retry(&address, &config).await?);

        let user_type = core
            .login(&config.client.username, &config.client.password)
            .await
            .with_context(|| format!("logging in as '{}'", config.client.username))?;
        info!(
            "🔓 Logged in as '{}' ({:?})",
            config.client.username, user_type
        );

        let mut middleware = Self {
            config,
            core,
            user_type,
            view: TaskView::default(),
        };
        if user_type == UserType::Operator {
            middleware.refresh_tasks().await?;
        }
        Ok(middleware)
    }

    pub fn core(&self) -> Arc<ClientCore> {
        self.core.clone()
    }

    pub fn user_type(&self) -> UserType {
        self.user_type
    }

    pub fn view(&self) -> &TaskView {
        &self.view
    }

    /// Re-fetch this operator's tasks and replace the local view.
    pub async fn refresh_tasks(&mut self) -> HubResult<()> {
        let tasks = self
            .core
            .get_operator_tasks(&self.config.client.username)
            .await?;
        self.view.replace(tasks);
        info!("📋 {} active tasks", self.view.active_count());
        Ok(())
    }

    /// Report a produced batch and mirror the result locally.
    pub async fn report_quantity(
        &mut self,
        conveyor: usize,
        task_id: &str,
        completed_quantity: u64,
    ) -> HubResult<()> {
        self.core
            .update_task_quantity(
                &self.config.client.username,
                conveyor,
                task_id,
                completed_quantity,
            )
            .await?;
        if let Some(task) = self.view.find_mut(conveyor, task_id) {
            task.add_completed_quantity(completed_quantity);
        }
        Ok(())
    }

    /// Merge one push into the view. Returns the conveyor and task if it
    /// was new.
    pub fn apply_notification(&mut self, notification: Notification) -> Option<(usize, Task)> {
        let Notification::NewTask { task, conveyor } = notification;
        if self.view.merge_new_task(task.clone(), conveyor) {
            Some((conveyor, task))
        } else {
            None
        }
    }

    /// Process pushes and send heartbeats until the connection drops.
    pub async fn run(&mut self) -> Result<()> {
        let mut notifications = self
            .core
            .take_notifications()
            .await
            .context("notification stream already taken")?;
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.requests.heartbeat_secs.max(1)));

        loop {
            tokio::select! {
                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        return Err(HubError::ConnectionLost.into());
                    };
                    if let Some((conveyor, task)) = self.apply_notification(notification) {
                        info!(
                            "📥 New task {} on conveyor {}: {} {}, {} {} ({:?})",
                            task.id,
                            conveyor,
                            task.material,
                            task.color,
                            task.planned_quantity,
                            task.unit,
                            task.priority
                        );
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.core.heartbeat().await {
                        warn!("💔 Heartbeat failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
        }
    }
}

/// Configured address, or the first server that answers discovery.
async fn resolve_server(config: &ClientConfig) -> Result<String> {
    if let Some(address) = &config.client.server_address {
        return Ok(address.clone());
    }

    info!("🔎 Looking for a server on UDP port {}", config.discovery.port);
    let requester = DiscoveryRequester::new(
        config.discovery.broadcast_address.clone(),
        config.discovery.port,
    );
    let server = requester
        .discover_first_server(Duration::from_secs(config.discovery.timeout_secs))
        .await?
        .ok_or(HubError::DiscoveryTimeout)?;

    info!("✅ Using server '{}' at {}", server.server_name, server.address());
    Ok(server.address().to_string())
}

async fn connect_with_retry(address: &str, config: &ClientConfig) -> Result<ClientCore> {
    let timeout = Duration::from_secs(config.requests.timeout_secs);
    let mut attempt = 1;

    loop {
        match ClientCore::connect(address, timeout).await {
            Ok(core) => return Ok(core),
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(
                    "🔄 Connect to {} failed ({}), attempt {}/{}",
                    address, e, attempt, MAX_CONNECT_ATTEMPTS
                );
                attempt += 1;
                sleep(Duration::from_secs(RETRY_INTERVAL_SECS)).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("connecting to {}", address));
            }
        }
    }
}
