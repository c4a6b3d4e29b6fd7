//! Queueing and admission control for lookup tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::task::{Task, MAX_ACTIVE_TASKS};

/// Admits tasks against a cap on concurrently running lookups.
///
/// Tasks get monotonically-assigned ids in admission order and run FIFO:
/// whenever any active task completes, the longest-queued task is promoted
/// and started. One manager serves one RPC server.
pub struct TaskManager {
    max_active: usize,
    next_task_id: AtomicU32,
    active: Mutex<Vec<Arc<Task>>>,
    queued: Mutex<VecDeque<Arc<Task>>>,
    self_ref: Weak<TaskManager>,
}

impl TaskManager {
    pub fn new() -> Arc<TaskManager> {
        Self::with_capacity(MAX_ACTIVE_TASKS)
    }

    pub fn with_capacity(max_active: usize) -> Arc<TaskManager> {
        Arc::new_cyclic(|self_ref| TaskManager {
            max_active,
            next_task_id: AtomicU32::new(0),
            active: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Assign the task its id and either start it immediately or queue it
    /// behind the active cap.
    pub fn add_task(&self, task: Arc<Task>) {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        task.set_task_id(id);

        let manager = self.self_ref.clone();
        task.add_listener(move |done| {
            if let Some(manager) = manager.upgrade() {
                manager.task_finished(done.task_id());
            }
        });

        let start_now = {
            let mut active = self.active.lock().expect("active lock");
            if active.len() < self.max_active {
                active.push(Arc::clone(&task));
                true
            } else {
                self.queued
                    .lock()
                    .expect("queued lock")
                    .push_back(Arc::clone(&task));
                false
            }
        };

        if start_now {
            task.start();
        } else {
            debug!(task = id, "task queued behind active cap");
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active lock").len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.lock().expect("queued lock").len()
    }

    /// Kill every queued and active task.
    pub fn kill_all(&self) {
        let mut doomed: Vec<Arc<Task>> = self
            .queued
            .lock()
            .expect("queued lock")
            .drain(..)
            .collect();
        doomed.extend(self.active.lock().expect("active lock").drain(..));
        for task in doomed {
            task.kill();
        }
    }

    fn task_finished(&self, id: u32) {
        self.active
            .lock()
            .expect("active lock")
            .retain(|task| task.task_id() != id);
        self.dequeue();
    }

    /// Promote queued tasks while there is room. Started outside the locks;
    /// a task that completes synchronously re-enters through its listener.
    fn dequeue(&self) {
        loop {
            let next = {
                let mut active = self.active.lock().expect("active lock");
                if active.len() >= self.max_active {
                    return;
                }
                let Some(task) = self.queued.lock().expect("queued lock").pop_front() else {
                    return;
                };
                active.push(Arc::clone(&task));
                task
            };
            debug!(task = next.task_id(), "promoting queued task");
            next.start();
        }
    }
}
