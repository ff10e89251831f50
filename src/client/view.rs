//! Local copy of one operator's two conveyors, kept in step with the server
//! by full fetches and `new_task` pushes.

use crate::common::model::{ConveyorTasks, Task, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskView {
    tasks: ConveyorTasks,
}

impl TaskView {
    pub fn new(tasks: ConveyorTasks) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &ConveyorTasks {
        &self.tasks
    }

    /// Replace everything with a fresh fetch.
    pub fn replace(&mut self, tasks: ConveyorTasks) {
        self.tasks = tasks;
    }

    /// Add a pushed task unless a task with the same id is already on that
    /// conveyor. Returns whether the view changed.
    pub fn merge_new_task(&mut self, task: Task, conveyor: usize) -> bool {
        let Some(queue) = self.tasks.get_mut(conveyor) else {
            return false;
        };
        if queue.iter().any(|existing| existing.id == task.id) {
            return false;
        }
        queue.push(task);
        true
    }

    pub fn find_mut(&mut self, conveyor: usize, task_id: &str) -> Option<&mut Task> {
        self.tasks
            .get_mut(conveyor)?
            .iter_mut()
            .find(|task| task.id == task_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .flatten()
            .filter(|task| task.status == TaskStatus::Active)
            .count()
    }
}
