use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tracing::{debug, info};

use quorum_core::{Task, TaskResult, TaskStatus};

/// Ready-set ordering: highest priority first, then earliest creation,
/// then id.
type ReadyKey = (Reverse<u8>, i64, String);

fn ready_key(task: &Task) -> ReadyKey {
    (
        Reverse(task.priority),
        task.created_at,
        task.task_id.clone(),
    )
}

struct Inner {
    tasks: HashMap<String, Task>,
    results: HashMap<String, TaskResult>,
    ready: BTreeSet<ReadyKey>,
    dependents: HashMap<String, BTreeSet<String>>,
}

/// Priority queue plus dependency DAG. A task enters the ready set only
/// when every dependency is completed.
pub struct TaskScheduler {
    inner: Mutex<Inner>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                results: HashMap::new(),
                ready: BTreeSet::new(),
                dependents: HashMap::new(),
            }),
        }
    }

    fn deps_completed(inner: &Inner, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            inner
                .tasks
                .get(dep)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    }

    /// Register a task; it becomes ready immediately if its dependencies
    /// are already completed (or it has none).
    pub fn submit(&self, task: Task) {
        let mut inner = self.inner.lock();
        for dep in &task.dependencies {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .insert(task.task_id.clone());
        }
        if Self::deps_completed(&inner, &task) {
            inner.ready.insert(ready_key(&task));
        }
        debug!(task_id = %task.task_id, priority = task.priority, "task submitted");
        inner.tasks.insert(task.task_id.clone(), task);
    }

    /// Pop the highest-priority ready task whose `required_roles` is empty
    /// or intersects `agent_roles`. Ties break toward earlier `created_at`.
    pub fn next_task(&self, agent_roles: &[String]) -> Option<Task> {
        let mut inner = self.inner.lock();
        let mut selected: Option<ReadyKey> = None;
        for key in inner.ready.iter() {
            let Some(task) = inner.tasks.get(&key.2) else {
                continue;
            };
            let matches = task.required_roles.is_empty()
                || task
                    .required_roles
                    .iter()
                    .any(|role| agent_roles.iter().any(|have| have == role));
            if matches {
                selected = Some(key.clone());
                break;
            }
        }
        let key = selected?;
        inner.ready.remove(&key);
        inner.tasks.get(&key.2).cloned()
    }

    /// Update a task's status (and assignee, when given).
    pub fn update_status(&self, task_id: &str, status: TaskStatus, agent_id: Option<&str>) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = status;
            if let Some(agent_id) = agent_id {
                task.assigned_agent_id = agent_id.to_string();
            }
        }
    }

    /// Mark completed, store the result (write-once), and move any
    /// dependent whose dependencies are now all completed into the ready
    /// set.
    pub fn complete(&self, task_id: &str, result: TaskResult) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Completed;
        inner
            .results
            .entry(task_id.to_string())
            .or_insert(result);

        let dependents: Vec<String> = inner
            .dependents
            .get(task_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut newly_ready = Vec::new();
        for dependent_id in dependents {
            if let Some(dependent) = inner.tasks.get(&dependent_id) {
                if dependent.status == TaskStatus::Pending && Self::deps_completed(&inner, dependent)
                {
                    newly_ready.push(ready_key(dependent));
                }
            }
        }
        for key in newly_ready {
            debug!(task_id = %key.2, "dependency satisfied; task ready");
            inner.ready.insert(key);
        }
        info!(task_id, "task completed");
    }

    /// Mark failed and synthesize a failed result. Dependents are NOT
    /// released: successors of a failed dependency stay blocked forever.
    pub fn fail(&self, task_id: &str, error: &str) {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Failed;
        let agent_id = task.assigned_agent_id.clone();
        inner.ready.retain(|key| key.2 != task_id);
        inner.results.entry(task_id.to_string()).or_insert(TaskResult {
            task_id: task_id.to_string(),
            agent_id,
            result: String::new(),
            success: false,
            error_message: error.to_string(),
            duration_ms: 0,
        });
        info!(task_id, error, "task failed");
    }

    /// Mark cancelled and drop it from the ready set. Dependents are NOT
    /// released: successors of a cancelled dependency stay blocked forever.
    pub fn cancel(&self, task_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = TaskStatus::Cancelled;
        }
        inner.ready.retain(|key| key.2 != task_id);
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().tasks.get(task_id).cloned()
    }

    pub fn get_result(&self, task_id: &str) -> Option<TaskResult> {
        self.inner.lock().results.get(task_id).cloned()
    }

    /// How many tasks are ready for dispatch right now.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().ready.len()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| (a.created_at, &a.task_id).cmp(&(b.created_at, &b.task_id)));
        tasks
    }
}
