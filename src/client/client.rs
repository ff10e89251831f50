//! # Client Core
//!
//! One TCP connection to the server and nothing else: no discovery, no
//! retries, no local task state. Those belong to the
//! [`ClientMiddleware`](super::middleware::ClientMiddleware).
//!
//! A background reader task splits the incoming lines in two:
//! - responses (objects carrying `status`) go to whoever is waiting in
//!   [`ClientCore::request`]
//! - `new_task` pushes go to the notification receiver
//!
//! Requests are serialized: only one is in flight at a time, so the next
//! response always belongs to it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let core = ClientCore::connect("127.0.0.1:12345", Duration::from_secs(10)).await?;
//! let user_type = core.login("operator1", "pass1").await?;
//! let tasks = core.get_operator_tasks("operator1").await?;
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::common::connection::{LineReader, LineWriter};
use crate::common::error::{HubError, HubResult};
use crate::common::messages::{Notification, Reply, Request, Response, ServerMessage, UserType};
use crate::common::model::{ConveyorTasks, OperatorSummary, TaskFields, TaskStatus};

/// Pushes buffered before the oldest unread ones start being dropped.
const NOTIFICATION_CAPACITY: usize = 100;

/// Write half plus the response stream, locked together for one exchange.
struct Exchange {
    writer: LineWriter<OwnedWriteHalf>,
    responses: mpsc::Receiver<Response>,
}

pub struct ClientCore {
    server: SocketAddr,
    timeout: Duration,
    exchange: Mutex<Exchange>,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
    reader: JoinHandle<()>,
}

impl ClientCore {
    /// Open a connection and start the background reader.
    ///
    /// # Arguments
    /// - `addr`: server TCP endpoint
    /// - `timeout`: how long [`request`](Self::request) waits for an answer
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> HubResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let server = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (response_tx, response_rx) = mpsc::channel(1);
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let reader = tokio::spawn(read_incoming(read_half, response_tx, notification_tx));

        info!("🔗 Connected to server at {}", server);

        Ok(Self {
            server,
            timeout,
            exchange: Mutex::new(Exchange {
                writer: LineWriter::new(write_half),
                responses: response_rx,
            }),
            notifications: Mutex::new(Some(notification_rx)),
            reader,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Take the receiver for `new_task` pushes. Only the first call gets it.
    pub async fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.lock().await.take()
    }

    /// Send one request and wait for its response.
    ///
    /// # Returns
    /// - `Ok(Response)`: whatever the server answered, errors included
    /// - `Err(RequestTimeout)`: nothing arrived in time
    /// - `Err(ConnectionLost)`: the server closed the connection
    pub async fn request(&self, request: &Request) -> HubResult<Response> {
        let mut exchange = self.exchange.lock().await;

        // A response that arrived after an earlier timeout is not ours.
        while let Ok(stale) = exchange.responses.try_recv() {
            debug!("Discarding late response: {:?}", stale);
        }

        exchange.writer.send(request).await.map_err(|e| match e {
            HubError::Io(_) => HubError::ConnectionLost,
            other => other,
        })?;
        debug!("📤 Sent {} to {}", request.kind(), self.server);

        match tokio::time::timeout(self.timeout, exchange.responses.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(HubError::ConnectionLost),
            Err(_) => {
                warn!(
                    "⏱️  No answer to {} within {:?}",
                    request.kind(),
                    self.timeout
                );
                Err(HubError::RequestTimeout(self.timeout.as_secs()))
            }
        }
    }

    /// Like [`request`](Self::request) but turns an error response into
    /// [`HubError::Rejected`].
    async fn expect_success(&self, request: &Request) -> HubResult<Reply> {
        match self.request(request).await? {
            Response::Success(reply) => Ok(reply),
            Response::Error { message } => Err(HubError::Rejected(message)),
            Response::Alive => Err(HubError::UnexpectedResponse(format!(
                "alive in answer to {}",
                request.kind()
            ))),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> HubResult<UserType> {
        let request = Request::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.expect_success(&request).await? {
            Reply::Login { user_type } => Ok(user_type),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_operators(&self) -> HubResult<BTreeMap<String, OperatorSummary>> {
        match self.expect_success(&Request::GetOperators).await? {
            Reply::Operators { operators } => Ok(operators),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_operator_tasks(&self, operator: &str) -> HubResult<ConveyorTasks> {
        let request = Request::GetOperatorTasks {
            operator: operator.to_string(),
        };
        match self.expect_success(&request).await? {
            Reply::OperatorTasks { tasks, .. } => Ok(tasks),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the id the server assigned.
    pub async fn add_task(
        &self,
        operator: &str,
        conveyor: usize,
        task: TaskFields,
    ) -> HubResult<String> {
        let request = Request::AddTask {
            operator: operator.to_string(),
            conveyor,
            task,
        };
        match self.expect_success(&request).await? {
            Reply::TaskCreated { task_id } => Ok(task_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn add_operator(&self, username: &str, password: &str) -> HubResult<()> {
        self.expect_success(&Request::AddOperator {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// `Ok(false)` when there was no such operator.
    pub async fn remove_operator(&self, username: &str) -> HubResult<bool> {
        let request = Request::RemoveOperator {
            username: username.to_string(),
        };
        match self.expect_success(&request).await? {
            Reply::OperatorRemoved { removed } => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_operator_password(&self, username: &str, password: &str) -> HubResult<()> {
        self.expect_success(&Request::UpdateOperatorPassword {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn update_task_status(
        &self,
        operator: &str,
        conveyor: usize,
        task_id: &str,
        status: TaskStatus,
    ) -> HubResult<()> {
        self.expect_success(&Request::UpdateTaskStatus {
            operator: operator.to_string(),
            conveyor,
            task_id: task_id.to_string(),
            status,
        })
        .await
        .map(|_| ())
    }

    pub async fn update_task_quantity(
        &self,
        operator: &str,
        conveyor: usize,
        task_id: &str,
        completed_quantity: u64,
    ) -> HubResult<()> {
        self.expect_success(&Request::UpdateTaskQuantity {
            operator: operator.to_string(),
            conveyor,
            task_id: task_id.to_string(),
            completed_quantity,
        })
        .await
        .map(|_| ())
    }

    pub async fn get_dictionary(&self, name: &str) -> HubResult<Vec<String>> {
        let request = Request::GetDictionary {
            name: name.to_string(),
        };
        match self.expect_success(&request).await? {
            Reply::Dictionary { values, .. } => Ok(values),
            other => Err(unexpected(other)),
        }
    }

    pub async fn heartbeat(&self) -> HubResult<()> {
        match self.request(&Request::Heartbeat).await? {
            Response::Alive => Ok(()),
            Response::Error { message } => Err(HubError::Rejected(message)),
            other => Err(HubError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(reply: Reply) -> HubError {
    HubError::UnexpectedResponse(format!("{:?}", reply))
}

/// Route every incoming line until the server hangs up. Dropping the
/// response sender on exit is what wakes a pending request with
/// `ConnectionLost`.
async fn read_incoming(
    read_half: OwnedReadHalf,
    responses: mpsc::Sender<Response>,
    notifications: mpsc::Sender<Notification>,
) {
    let mut reader = LineReader::new(read_half);

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("🔌 Server closed the connection");
                break;
            }
            Err(e) => {
                warn!("⚠️  Connection to server failed: {}", e);
                break;
            }
        };

        match ServerMessage::decode(&line) {
            Ok(ServerMessage::Response(response)) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            Ok(ServerMessage::Notification(notification)) => {
                match notifications.try_send(notification) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("⚠️  Notification backlog full, push dropped")
                    }
                    Err(TrySendError::Closed(_)) => debug!("Nobody listens for pushes"),
                }
            }
            Err(e) => warn!("⚠️  Ignoring undecodable line from server: {}", e),
        }
    }
}
