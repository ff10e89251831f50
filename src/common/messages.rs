//! # Message Protocol
//!
//! Every message on the TCP connection is one JSON object on one line. The
//! client sends [`Request`]s tagged by `type`; the server answers each with a
//! [`Response`] tagged by `status` and may interleave [`Notification`]s
//! (tagged by `type`) on operator connections at any time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{HubError, HubResult};
use super::model::{ConveyorTasks, OperatorSummary, Task, TaskFields, TaskStatus};

// ============================================================================
// CLIENT -> SERVER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Login {
        username: String,
        password: String,
    },
    GetOperators,
    GetOperatorTasks {
        operator: String,
    },
    AddTask {
        operator: String,
        conveyor: usize,
        task: TaskFields,
    },
    AddOperator {
        username: String,
        password: String,
    },
    /// Idempotent: removing an unknown operator still succeeds.
    RemoveOperator {
        username: String,
    },
    UpdateOperatorPassword {
        username: String,
        password: String,
    },
    UpdateTaskStatus {
        operator: String,
        conveyor: usize,
        task_id: String,
        status: TaskStatus,
    },
    UpdateTaskQuantity {
        operator: String,
        conveyor: usize,
        task_id: String,
        /// Produced since the last report; added to the stored total.
        completed_quantity: u64,
    },
    GetDictionary {
        name: String,
    },
    Heartbeat,
    /// Any `type` this server does not know.
    #[serde(other)]
    Unknown,
}

/// Outcome of decoding one request line.
#[derive(Debug)]
pub enum Decoded {
    Request(Request),
    /// Valid JSON that is not a usable request; answered, connection kept.
    Invalid(String),
}

impl Request {
    /// Decode one line. Text that is not JSON at all is a
    /// [`HubError::ProtocolDecode`], which closes the connection. JSON without
    /// a string `type` is an unknown kind, not an invalid request.
    pub fn decode(line: &str) -> HubResult<Decoded> {
        let value: Value = serde_json::from_str(line)?;
        if !value.get("type").is_some_and(Value::is_string) {
            return Ok(Decoded::Request(Request::Unknown));
        }
        Ok(match serde_json::from_value::<Request>(value) {
            Ok(request) => Decoded::Request(request),
            Err(e) => Decoded::Invalid(e.to_string()),
        })
    }

    /// Name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::GetOperators => "get_operators",
            Request::GetOperatorTasks { .. } => "get_operator_tasks",
            Request::AddTask { .. } => "add_task",
            Request::AddOperator { .. } => "add_operator",
            Request::RemoveOperator { .. } => "remove_operator",
            Request::UpdateOperatorPassword { .. } => "update_operator_password",
            Request::UpdateTaskStatus { .. } => "update_task_status",
            Request::UpdateTaskQuantity { .. } => "update_task_quantity",
            Request::GetDictionary { .. } => "get_dictionary",
            Request::Heartbeat => "heartbeat",
            Request::Unknown => "unknown",
        }
    }
}

// ============================================================================
// SERVER -> CLIENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Operator,
    Manager,
}

/// Marker carried as `type` on task-list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TasksTag {
    #[serde(rename = "operator_tasks_response")]
    OperatorTasksResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success(Reply),
    /// Heartbeat answer.
    Alive,
    Error { message: String },
}

/// Payload of a successful response. Variant order matters for decoding:
/// `Done` matches any object and must stay last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    OperatorTasks {
        #[serde(rename = "type")]
        kind: TasksTag,
        tasks: ConveyorTasks,
    },
    Login {
        user_type: UserType,
    },
    Operators {
        operators: BTreeMap<String, OperatorSummary>,
    },
    TaskCreated {
        task_id: String,
    },
    OperatorRemoved {
        removed: bool,
    },
    Dictionary {
        name: String,
        values: Vec<String>,
    },
    Done {},
}

impl Response {
    pub fn ok() -> Self {
        Response::Success(Reply::Done {})
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn operator_tasks(tasks: ConveyorTasks) -> Self {
        Response::Success(Reply::OperatorTasks {
            kind: TasksTag::OperatorTasksResponse,
            tasks,
        })
    }
}

impl From<&HubError> for Response {
    fn from(err: &HubError) -> Self {
        Response::error(err.to_string())
    }
}

/// Unsolicited server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    NewTask { task: Task, conveyor: usize },
}

/// Anything the server can put on an operator's line.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

impl ServerMessage {
    /// Responses always carry `status`; pushes never do.
    pub fn decode(line: &str) -> HubResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("status").is_some() {
            Ok(ServerMessage::Response(serde_json::from_value(value)?))
        } else {
            Ok(ServerMessage::Notification(serde_json::from_value(value)?))
        }
    }
}

/// Serialize `message` as one `\n`-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> HubResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
