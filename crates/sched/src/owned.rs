//! Dense storage for the tasks a TaskMaster currently owns.

use std::collections::HashMap;

use kestrel_core::TaskId;

use crate::task::Task;

/// Owned tasks, kept contiguous for the update sweep and indexed by id.
///
/// Removal is `swap_remove`: the last task moves into the hole and its index
/// entry is patched, so both views always describe the same set.
#[derive(Debug, Default)]
pub struct OwnedTasks {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

impl OwnedTasks {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    /// Take ownership of `task`. A task whose id is already owned is handed back.
    pub fn insert(&mut self, task: Task) -> Result<(), Task> {
        let id = task.id();
        if self.index.contains_key(&id) {
            return Err(task);
        }
        self.index.insert(id, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let slot = self.index.remove(&id)?;
        let task = self.tasks.swap_remove(slot);
        if let Some(moved) = self.tasks.get(slot) {
            self.index.insert(moved.id(), slot);
        }
        Some(task)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&slot| &self.tasks[slot])
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        let slot = *self.index.get(&id)?;
        Some(&mut self.tasks[slot])
    }

    /// Task at dense position `slot`, for index-based sweeps.
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut Task> {
        self.tasks.get_mut(slot)
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().map(Task::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Remove every task, in storage order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.index.clear();
        std::mem::take(&mut self.tasks)
    }
}
