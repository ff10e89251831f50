//! # Domain Model
//!
//! Operators, tasks and the two-conveyor task layout shared by the server,
//! the snapshot files and the client library. Field names are the wire and
//! on-disk names.

use serde::{Deserialize, Serialize};

/// Number of physical conveyors each operator works.
pub const CONVEYOR_COUNT: usize = 2;

/// Unit used when a task is created without one.
pub const DEFAULT_UNIT: &str = "pcs";

/// Timestamp layout used for `created` / `completed`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-conveyor task lists: index 0 is conveyor 0, index 1 is conveyor 1.
pub type ConveyorTasks = [Vec<Task>; CONVEYOR_COUNT];

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Active,
    Completed,
}

/// A unit of production work queued on one conveyor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier, unique within the operator's conveyor list.
    pub id: String,
    pub material: String,
    pub color: String,
    pub speed: String,
    pub temperature: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub planned_quantity: u64,
    #[serde(default)]
    pub completed_quantity: u64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Apply a status change, stamping the completion time on the
    /// transition into `Completed`. An already completed task keeps its
    /// original stamp; reopening clears it.
    pub fn set_status(&mut self, status: TaskStatus) {
        match (self.status, status) {
            (TaskStatus::Active, TaskStatus::Completed) => {
                self.completed = Some(now_timestamp());
            }
            (_, TaskStatus::Active) => self.completed = None,
            (TaskStatus::Completed, TaskStatus::Completed) => {}
        }
        self.status = status;
    }

    /// Add a batch of produced quantity. Reaching the plan completes an
    /// active task; going past it is allowed.
    pub fn add_completed_quantity(&mut self, produced: u64) {
        self.completed_quantity = self.completed_quantity.saturating_add(produced);
        if self.planned_quantity > 0
            && self.completed_quantity >= self.planned_quantity
            && self.status == TaskStatus::Active
        {
            self.set_status(TaskStatus::Completed);
        }
    }

    /// Completion ratio in percent, or `None` when nothing is planned.
    pub fn progress_percent(&self) -> Option<f64> {
        if self.planned_quantity == 0 {
            return None;
        }
        Some(self.completed_quantity as f64 * 100.0 / self.planned_quantity as f64)
    }
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

/// Client-supplied part of a task; the server fills in the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFields {
    pub material: String,
    pub color: String,
    pub speed: String,
    pub temperature: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub planned_quantity: u64,
    #[serde(default)]
    pub unit: Option<String>,
}

impl TaskFields {
    /// Build an active task with the given id and creation stamp.
    pub fn into_task(self, id: String, created: String) -> Task {
        let unit = self
            .unit
            .filter(|unit| !unit.trim().is_empty())
            .unwrap_or_else(default_unit);

        Task {
            id,
            material: self.material,
            color: self.color,
            speed: self.speed,
            temperature: self.temperature,
            priority: self.priority.unwrap_or_default(),
            planned_quantity: self.planned_quantity,
            completed_quantity: 0,
            unit,
            status: TaskStatus::Active,
            created,
            completed: None,
        }
    }
}

/// Persisted operator record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub tasks: ConveyorTasks,
}

impl Operator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            active: false,
            tasks: Default::default(),
        }
    }

    /// Tasks on `conveyor`, or `None` for an index outside the two conveyors.
    pub fn conveyor_mut(&mut self, conveyor: usize) -> Option<&mut Vec<Task>> {
        self.tasks.get_mut(conveyor)
    }

    pub fn find_task_mut(&mut self, conveyor: usize, task_id: &str) -> Option<&mut Task> {
        self.conveyor_mut(conveyor)?
            .iter_mut()
            .find(|task| task.id == task_id)
    }

    pub fn summary(&self) -> OperatorSummary {
        OperatorSummary {
            active: self.active,
            tasks: self.tasks.clone(),
        }
    }
}

/// What `get_operators` exposes per operator (no password).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSummary {
    pub active: bool,
    pub tasks: ConveyorTasks,
}

/// Accounts created on first start when no snapshot exists.
pub fn default_operators() -> Vec<Operator> {
    vec![
        Operator::new("operator1", "pass1"),
        Operator::new("operator2", "pass2"),
        Operator::new("operator3", "pass3"),
    ]
}
