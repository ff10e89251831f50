//! # Server Middleware - Connections and Protocol Dispatch
//!
//! The middleware owns everything between the socket and the
//! [`TaskEngine`]:
//!
//! ### 1. Listening
//! - Binds the TCP listener (failure is fatal at startup)
//! - Spawns one task per accepted connection, no connection limit
//! - Starts the UDP [`DiscoveryResponder`] next to it
//!
//! ### 2. Per-connection protocol
//! - Splits incoming bytes into lines, decodes each as a [`Request`]
//! - Routes by request kind and answers every request with one [`Response`]
//! - A line that is not JSON closes that connection only
//!
//! ### 3. Sessions
//! - Successful operator logins register the connection in the
//!   [`SessionRegistry`] and mark the operator active
//! - A second login for the same operator waits on standby and takes over
//!   pushes when the first connection closes
//! - The operator is marked inactive when its last connection closes
//!
//! ## Connection Flow
//!
//! ```text
//! Client -> Server  {"type":"login",...}
//! Server -> Client  {"status":"success","user_type":"operator"}
//! Client -> Server  {"type":"get_operator_tasks","operator":"operator1"}
//! Server -> Client  {"status":"success","type":"operator_tasks_response",...}
//! Server -> Client  {"type":"new_task",...}        (any time, unsolicited)
//! ```
//!
//! Requests are not gated on authentication: any connection may issue any
//! request once connected, as the existing clients expect.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::engine::TaskEngine;
use super::sessions::{ConnectionId, SessionHandle, SessionRegistry, OUTBOUND_CAPACITY};
use crate::common::config::{DiscoveryConfig, DEFAULT_SERVER_PORT};
use crate::common::connection::{LineReader, LineWriter};
use crate::common::error::HubError;
use crate::common::messages::{Decoded, Reply, Request, Response, UserType};
use crate::discovery::{DiscoveryResponder, DEFAULT_SERVER_NAME};
use crate::store::{DictionaryStore, OperatorStore};

/// The manager's fixed credentials. The manager is never stored or
/// registered as a session.
pub const MANAGER_USERNAME: &str = "manager";
pub const MANAGER_PASSWORD: &str = "manager";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Complete server configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [server]
/// name = "ProductionServer"
/// address = "0.0.0.0:12345"
///
/// [discovery]
/// enabled = true
/// port = 12346
///
/// [storage]
/// data_dir = "data"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity and listen address of this server
    pub server: ServerInfo,
    /// UDP discovery responder settings
    pub discovery: DiscoveryConfig,
    /// Where snapshot files live
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Name announced to discovering clients
    pub name: String,
    /// TCP address to listen on (e.g., "0.0.0.0:12345")
    pub address: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            address: format!("0.0.0.0:{}", DEFAULT_SERVER_PORT),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `operators.json` and the reference lists
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Operator { username: String },
    Manager,
}

// ============================================================================
// SERVER MIDDLEWARE
// ============================================================================

pub struct ServerMiddleware {
    config: ServerConfig,
    store: Arc<OperatorStore>,
    dictionaries: DictionaryStore,
    sessions: Arc<SessionRegistry>,
    engine: TaskEngine,
    next_conn_id: AtomicU64,
}

impl ServerMiddleware {
    /// Open the stores under the configured data directory, seed first-run
    /// content and clear presence flags left over from a previous run.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let data_dir = &config.storage.data_dir;

        let store = Arc::new(
            OperatorStore::open(data_dir)
                .await
                .with_context(|| format!("opening data directory {}", data_dir.display()))?,
        );
        let operators = store.load().await.context("loading operator snapshot")?;
        store.reset_presence().await?;

        let dictionaries = DictionaryStore::open(data_dir).await?;
        dictionaries.seed_all().await.context("seeding reference lists")?;

        info!(
            "📂 Loaded {} operators from {}",
            operators.len(),
            store.path().display()
        );

        let sessions = Arc::new(SessionRegistry::new());
        let engine = TaskEngine::new(store.clone(), sessions.clone());

        Ok(Arc::new(Self {
            config,
            store,
            dictionaries,
            sessions,
            engine,
            next_conn_id: AtomicU64::new(1),
        }))
    }

    pub fn store(&self) -> &OperatorStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    /// Main entry point: bind, start discovery, accept forever.
    ///
    /// Only a bind failure returns; the caller should report it and exit.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address)
            .await
            .with_context(|| format!("binding {}", self.config.server.address))?;
        let local_addr = listener.local_addr()?;

        info!(
            "🚀 Server '{}' listening on {}",
            self.config.server.name, local_addr
        );

        let mut responder = None;
        if self.config.discovery.enabled {
            let mut discovery = DiscoveryResponder::new(
                self.config.server.name.clone(),
                local_addr.port(),
                self.config.discovery.port,
            );
            discovery.start().await?;
            responder = Some(discovery);
        }

        self.serve(listener).await;

        if let Some(mut discovery) = responder {
            discovery.stop();
        }
        Ok(())
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(socket, peer).await;
                    });
                }
                Err(e) => {
                    error!("❌ Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Read and answer requests on one connection until it closes.
    async fn handle_connection(&self, socket: TcpStream, peer: SocketAddr) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        info!("🔗 Connection {} from {}", conn_id, peer);

        let (read_half, write_half) = socket.into_split();
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(write_outbound(conn_id, write_half, rx));

        let handle = SessionHandle::new(conn_id, peer, tx);
        let mut reader = LineReader::new(read_half);
        let mut state = ConnectionState::Unauthenticated;

        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("🔌 Connection {} closed by peer", conn_id);
                    break;
                }
                Err(e) => {
                    warn!("⚠️  Connection {} read failed: {}", conn_id, e);
                    break;
                }
            };

            let response = match Request::decode(&line) {
                Ok(Decoded::Request(request)) => {
                    debug!("📥 Connection {} -> {}", conn_id, request.kind());
                    self.handle_request(request, &mut state, &handle).await
                }
                Ok(Decoded::Invalid(reason)) => {
                    warn!("⚠️  Connection {} sent an invalid request: {}", conn_id, reason);
                    Response::error(format!("invalid request: {}", reason))
                }
                Err(e) => {
                    warn!(
                        "❌ Connection {} sent malformed JSON, closing: {}",
                        conn_id, e
                    );
                    break;
                }
            };

            if !handle.reply(&response).await {
                debug!("Connection {} writer gone", conn_id);
                break;
            }
        }

        self.close_session(&state, conn_id).await;
        drop(handle);
        if let Err(e) = writer.await {
            error!("❌ Writer task for connection {} failed: {}", conn_id, e);
        }
        info!("👋 Connection {} from {} finished", conn_id, peer);
    }

    /// Route one request to its handler.
    pub async fn handle_request(
        &self,
        request: Request,
        state: &mut ConnectionState,
        handle: &SessionHandle,
    ) -> Response {
        let result = match request {
            Request::Login { username, password } => {
                self.login(&username, &password, state, handle).await
            }

            Request::GetOperators => self.store.load().await.map(|operators| {
                let operators: BTreeMap<_, _> = operators
                    .into_iter()
                    .map(|op| {
                        let summary = op.summary();
                        (op.username, summary)
                    })
                    .collect();
                Response::Success(Reply::Operators { operators })
            }),

            Request::GetOperatorTasks { operator } => self
                .engine
                .tasks_for(&operator)
                .await
                .map(Response::operator_tasks),

            Request::AddTask {
                operator,
                conveyor,
                task,
            } => self
                .engine
                .create_task(&operator, conveyor, task)
                .await
                .map(|task| Response::Success(Reply::TaskCreated { task_id: task.id })),

            Request::AddOperator { username, password } => self
                .store
                .add_operator(&username, &password)
                .await
                .map(|()| Response::ok()),

            Request::RemoveOperator { username } => self
                .store
                .remove_operator(&username)
                .await
                .map(|removed| Response::Success(Reply::OperatorRemoved { removed })),

            Request::UpdateOperatorPassword { username, password } => self
                .store
                .update_password(&username, &password)
                .await
                .map(|()| {
                    info!("🔑 Password changed for '{}'", username);
                    Response::ok()
                }),

            Request::UpdateTaskStatus {
                operator,
                conveyor,
                task_id,
                status,
            } => self
                .engine
                .update_status(&operator, conveyor, &task_id, status)
                .await
                .map(|_| Response::ok()),

            Request::UpdateTaskQuantity {
                operator,
                conveyor,
                task_id,
                completed_quantity,
            } => self
                .engine
                .update_quantity(&operator, conveyor, &task_id, completed_quantity)
                .await
                .map(|_| Response::ok()),

            Request::GetDictionary { name } => self
                .dictionaries
                .load(&name)
                .await
                .map(|values| Response::Success(Reply::Dictionary { name, values })),

            Request::Heartbeat => Ok(Response::Alive),

            Request::Unknown => Ok(Response::error("unknown message type")),
        };

        result.unwrap_or_else(|e| {
            match &e {
                HubError::Io(_) | HubError::Snapshot { .. } | HubError::ProtocolDecode(_) => {
                    error!("❌ Request on connection {} failed: {}", handle.conn_id(), e)
                }
                _ => debug!("Request on connection {} rejected: {}", handle.conn_id(), e),
            }
            Response::from(&e)
        })
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        state: &mut ConnectionState,
        handle: &SessionHandle,
    ) -> Result<Response, HubError> {
        if *state != ConnectionState::Unauthenticated {
            return Err(HubError::AlreadyAuthenticated);
        }

        if let Some(operator) = self.store.find_by_username(username).await? {
            if operator.password == password {
                self.sessions.register(username, handle.clone()).await;
                self.store.update_status(username, true).await?;
                *state = ConnectionState::Operator {
                    username: username.to_string(),
                };
                info!("🔓 Operator '{}' logged in from {}", username, handle.peer());
                return Ok(Response::Success(Reply::Login {
                    user_type: UserType::Operator,
                }));
            }
        }

        if username == MANAGER_USERNAME && password == MANAGER_PASSWORD {
            *state = ConnectionState::Manager;
            info!("🔓 Manager logged in from {}", handle.peer());
            return Ok(Response::Success(Reply::Login {
                user_type: UserType::Manager,
            }));
        }

        warn!("🔒 Failed login for '{}' from {}", username, handle.peer());
        Err(HubError::AuthenticationFailure)
    }

    /// Drop this connection from the operator's sessions. The operator is
    /// marked offline only once no authenticated connection remains.
    async fn close_session(&self, state: &ConnectionState, conn_id: ConnectionId) {
        let ConnectionState::Operator { username } = state else {
            return;
        };

        match self.sessions.unregister(username, conn_id).await {
            Some(0) => {}
            Some(remaining) => {
                debug!(
                    "'{}' still online via {} connection(s)",
                    username, remaining
                );
                return;
            }
            None => return,
        }

        match self.store.update_status(username, false).await {
            Ok(()) => info!("🔌 Operator '{}' went offline", username),
            Err(HubError::OperatorNotFound(_)) => {
                debug!("Operator '{}' was removed while online", username)
            }
            Err(e) => error!("❌ Failed to mark '{}' offline: {}", username, e),
        }
    }
}

/// Drain one connection's outbound queue onto its socket.
async fn write_outbound(
    conn_id: ConnectionId,
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
) {
    let mut writer = LineWriter::new(write_half);
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.write_line(&line).await {
            warn!("⚠️  Write to connection {} failed: {}", conn_id, e);
            break;
        }
    }
}
