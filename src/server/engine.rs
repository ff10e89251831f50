//! # Task Engine
//!
//! Creates tasks, tracks their progress and completion, and tells online
//! operators about new work. All state changes go through the
//! [`OperatorStore`]; pushes go through the [`SessionRegistry`] and never
//! affect the outcome of the request that triggered them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};

use super::sessions::SessionRegistry;
use crate::common::error::{HubError, HubResult};
use crate::common::messages::Notification;
use crate::common::model::{
    now_timestamp, ConveyorTasks, Task, TaskFields, TaskStatus, CONVEYOR_COUNT,
};
use crate::store::OperatorStore;

pub struct TaskEngine {
    store: Arc<OperatorStore>,
    sessions: Arc<SessionRegistry>,
    /// Disambiguates ids created within the same second.
    sequence: AtomicU64,
}

impl TaskEngine {
    pub fn new(store: Arc<OperatorStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            sessions,
            sequence: AtomicU64::new(1),
        }
    }

    /// Queue a new task on `operator`'s `conveyor` and push it to them if
    /// they are online.
    ///
    /// # Returns
    /// - `Ok(Task)`: the stored task, id and defaults filled in
    /// - `Err(OperatorNotFound)` / `Err(InvalidConveyor)`
    pub async fn create_task(
        &self,
        operator: &str,
        conveyor: usize,
        fields: TaskFields,
    ) -> HubResult<Task> {
        let task = fields.into_task(self.next_task_id(conveyor), now_timestamp());

        let stored = task.clone();
        self.store
            .modify(operator, move |op| {
                op.conveyor_mut(conveyor)
                    .ok_or(HubError::InvalidConveyor(conveyor))?
                    .push(stored);
                Ok(())
            })
            .await?;

        info!(
            "📋 Task {} queued for '{}' on conveyor {} ({} {} planned)",
            task.id, operator, conveyor, task.planned_quantity, task.unit
        );

        self.notify_new_task(operator, &task, conveyor).await;
        Ok(task)
    }

    /// Set a task's status. Moving into `Completed` stamps the time.
    pub async fn update_status(
        &self,
        operator: &str,
        conveyor: usize,
        task_id: &str,
        status: TaskStatus,
    ) -> HubResult<Task> {
        let task = self
            .with_task(operator, conveyor, task_id, |task| task.set_status(status))
            .await?;
        info!("🔄 Task {} of '{}' is now {:?}", task_id, operator, task.status);
        Ok(task)
    }

    /// Add `completed_quantity` to what the task has produced so far.
    /// Reaching the plan completes the task.
    pub async fn update_quantity(
        &self,
        operator: &str,
        conveyor: usize,
        task_id: &str,
        completed_quantity: u64,
    ) -> HubResult<Task> {
        let task = self
            .with_task(operator, conveyor, task_id, |task| {
                task.add_completed_quantity(completed_quantity)
            })
            .await?;

        if task.is_completed() {
            info!(
                "✅ Task {} of '{}' at {}/{} {}, completed",
                task_id, operator, task.completed_quantity, task.planned_quantity, task.unit
            );
        } else {
            debug!(
                "Task {} of '{}' at {}/{} {}",
                task_id, operator, task.completed_quantity, task.planned_quantity, task.unit
            );
        }
        Ok(task)
    }

    pub async fn tasks_for(&self, operator: &str) -> HubResult<ConveyorTasks> {
        self.store
            .find_by_username(operator)
            .await?
            .map(|op| op.tasks)
            .ok_or_else(|| HubError::OperatorNotFound(operator.to_string()))
    }

    async fn with_task<F>(
        &self,
        operator: &str,
        conveyor: usize,
        task_id: &str,
        f: F,
    ) -> HubResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        if conveyor >= CONVEYOR_COUNT {
            return Err(HubError::InvalidConveyor(conveyor));
        }
        self.store
            .modify(operator, |op| {
                let task = op
                    .find_task_mut(conveyor, task_id)
                    .ok_or_else(|| HubError::TaskNotFound(task_id.to_string()))?;
                f(task);
                Ok(task.clone())
            })
            .await
    }

    async fn notify_new_task(&self, operator: &str, task: &Task, conveyor: usize) {
        let notification = Notification::NewTask {
            task: task.clone(),
            conveyor,
        };
        if self.sessions.send_to(operator, &notification).await {
            info!("📨 Pushed task {} to '{}'", task.id, operator);
        } else {
            debug!("'{}' offline, task {} waits for next fetch", operator, task.id);
        }
    }

    fn next_task_id(&self, conveyor: usize) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("task_{}_{}_{}", chrono::Utc::now().timestamp(), conveyor, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sessions::SessionHandle;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn engine() -> (TempDir, Arc<SessionRegistry>, TaskEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(OperatorStore::open(dir.path()).await.unwrap());
        let sessions = Arc::new(SessionRegistry::new());
        let engine = TaskEngine::new(store, sessions.clone());
        (dir, sessions, engine)
    }

    fn fields(planned: u64) -> TaskFields {
        TaskFields {
            material: "PET".into(),
            color: "white".into(),
            speed: "4".into(),
            temperature: "230".into(),
            planned_quantity: planned,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn quantity_updates_drive_completion() {
        let (_dir, _sessions, engine) = engine().await;
        let task = engine.create_task("operator1", 0, fields(100)).await.unwrap();

        let after_first = engine
            .update_quantity("operator1", 0, &task.id, 60)
            .await
            .unwrap();
        assert_eq!(after_first.status, TaskStatus::Active);
        assert!(after_first.completed.is_none());

        let after_second = engine
            .update_quantity("operator1", 0, &task.id, 40)
            .await
            .unwrap();
        assert_eq!(after_second.completed_quantity, 100);
        assert_eq!(after_second.status, TaskStatus::Completed);
        assert!(after_second.completed.is_some());

        let stored = engine.tasks_for("operator1").await.unwrap();
        assert_eq!(stored[0][0], after_second);
    }

    #[tokio::test]
    async fn unknown_operator_and_task_are_reported() {
        let (_dir, _sessions, engine) = engine().await;
        assert!(matches!(
            engine.create_task("ghost", 0, fields(1)).await,
            Err(HubError::OperatorNotFound(_))
        ));
        assert!(matches!(
            engine.update_status("operator1", 0, "missing", TaskStatus::Completed).await,
            Err(HubError::TaskNotFound(_))
        ));
        assert!(matches!(
            engine.update_quantity("operator1", 1, "missing", 3).await,
            Err(HubError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn conveyor_out_of_range_is_rejected() {
        let (_dir, _sessions, engine) = engine().await;
        assert!(matches!(
            engine.create_task("operator1", 2, fields(1)).await,
            Err(HubError::InvalidConveyor(2))
        ));
        assert!(engine.tasks_for("operator1").await.unwrap().iter().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn task_lookup_is_scoped_to_conveyor() {
        let (_dir, _sessions, engine) = engine().await;
        let task = engine.create_task("operator2", 1, fields(5)).await.unwrap();
        assert!(matches!(
            engine.update_status("operator2", 0, &task.id, TaskStatus::Completed).await,
            Err(HubError::TaskNotFound(_))
        ));
        let done = engine
            .update_status("operator2", 1, &task.id, TaskStatus::Completed)
            .await
            .unwrap();
        assert!(done.completed.is_some());
    }

    #[tokio::test]
    async fn rapid_creation_yields_unique_ids() {
        let (_dir, _sessions, engine) = engine().await;
        let mut ids = HashSet::new();
        for _ in 0..20 {
            let task = engine.create_task("operator3", 0, fields(1)).await.unwrap();
            assert!(ids.insert(task.id));
        }
    }

    #[tokio::test]
    async fn online_operator_gets_exactly_one_push() {
        let (_dir, sessions, engine) = engine().await;
        let (tx, mut rx) = mpsc::channel(8);
        sessions
            .register("operator1", SessionHandle::new(7, "127.0.0.1:1".parse().unwrap(), tx))
            .await;

        let task = engine.create_task("operator1", 1, fields(10)).await.unwrap();

        let line = rx.recv().await.unwrap();
        let pushed: Notification = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(pushed, Notification::NewTask { task, conveyor: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_creation() {
        let (_dir, sessions, engine) = engine().await;
        let (tx, rx) = mpsc::channel(1);
        sessions
            .register("operator1", SessionHandle::new(7, "127.0.0.1:1".parse().unwrap(), tx))
            .await;
        drop(rx);

        assert!(engine.create_task("operator1", 0, fields(3)).await.is_ok());
        assert_eq!(engine.tasks_for("operator1").await.unwrap()[0].len(), 1);
    }
}
