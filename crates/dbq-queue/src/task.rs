//! Task and hook handlers, and the identifier -> handler table the worker
//! resolves registry entries through.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::registry::{HookRole, TaskRegistry};

/// One step of a job's sequence. Creation, pre-task and post-task hooks share
/// this shape.
///
/// Tasks mutate `job.workspace` to hand data to later steps; any returned
/// error fails the job.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, job: &mut Job) -> anyhow::Result<()>;
}

/// Runs once when a job moves to `FAILED`, with the error that caused it.
#[async_trait]
pub trait FailureHook: Send + Sync {
    async fn on_failure(&self, job: &mut Job, error: &QueueError) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into a [`Task`]
pub struct FnTask<F>(F);

pub fn task_fn<F>(f: F) -> FnTask<F>
where
    F: Fn(&mut Job) -> anyhow::Result<()> + Send + Sync,
{
    FnTask(f)
}

#[async_trait]
impl<F> Task for FnTask<F>
where
    F: Fn(&mut Job) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, job: &mut Job) -> anyhow::Result<()> {
        (self.0)(job)
    }
}

/// Adapter turning a synchronous closure into a [`FailureHook`]
pub struct FnFailureHook<F>(F);

pub fn failure_hook_fn<F>(f: F) -> FnFailureHook<F>
where
    F: Fn(&mut Job, &QueueError) -> anyhow::Result<()> + Send + Sync,
{
    FnFailureHook(f)
}

#[async_trait]
impl<F> FailureHook for FnFailureHook<F>
where
    F: Fn(&mut Job, &QueueError) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_failure(&self, job: &mut Job, error: &QueueError) -> anyhow::Result<()> {
        (self.0)(job, error)
    }
}

/// Frozen identifier -> handler table.
///
/// Built once during start-up, then shared read-only.
#[derive(Clone, Default)]
pub struct Handlers {
    tasks: HashMap<String, Arc<dyn Task>>,
    failure_hooks: HashMap<String, Arc<dyn FailureHook>>,
}

impl Handlers {
    pub fn builder() -> HandlersBuilder {
        HandlersBuilder::default()
    }

    pub fn resolve_task(&self, id: &str) -> QueueResult<Arc<dyn Task>> {
        self.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::Resolution(id.to_string()))
    }

    pub fn resolve_failure_hook(&self, id: &str) -> QueueResult<Arc<dyn FailureHook>> {
        self.failure_hooks
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::Resolution(id.to_string()))
    }

    /// Identifiers the registry references that have no handler, sorted.
    pub fn missing_for(&self, registry: &TaskRegistry) -> Vec<String> {
        let mut missing = Vec::new();
        for (_, spec) in registry.iter() {
            for task in &spec.tasks {
                if !self.tasks.contains_key(task) {
                    missing.push(task.clone());
                }
            }
            for (role, id) in spec.hooks() {
                let known = match role {
                    HookRole::Failure => self.failure_hooks.contains_key(id),
                    _ => self.tasks.contains_key(id),
                };
                if !known {
                    missing.push(id.to_string());
                }
            }
        }
        missing.sort();
        missing.dedup();
        missing
    }

    /// Fail fast when the registry names a handler that was never registered.
    pub fn verify(&self, registry: &TaskRegistry) -> QueueResult<()> {
        let missing = self.missing_for(registry);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueueError::Resolution(missing.join("', '")))
        }
    }

    pub fn task_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.tasks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn failure_hook_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.failure_hooks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("tasks", &self.task_ids())
            .field("failure_hooks", &self.failure_hook_ids())
            .finish()
    }
}

#[derive(Default)]
pub struct HandlersBuilder {
    handlers: Handlers,
    duplicates: Vec<String>,
}

impl HandlersBuilder {
    /// Register a task, or a creation / pre-task / post-task hook.
    pub fn task(mut self, id: impl Into<String>, task: impl Task + 'static) -> Self {
        let id = id.into();
        if self.handlers.tasks.insert(id.clone(), Arc::new(task)).is_some() {
            self.duplicates.push(id);
        }
        self
    }

    pub fn task_fn<F>(self, id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.task(id, task_fn(f))
    }

    pub fn failure_hook(mut self, id: impl Into<String>, hook: impl FailureHook + 'static) -> Self {
        let id = id.into();
        if self
            .handlers
            .failure_hooks
            .insert(id.clone(), Arc::new(hook))
            .is_some()
        {
            self.duplicates.push(id);
        }
        self
    }

    pub fn failure_hook_fn<F>(self, id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Job, &QueueError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.failure_hook(id, failure_hook_fn(f))
    }

    /// Merge another table in; identifiers present in both count as duplicates.
    pub fn extend(mut self, other: Handlers) -> Self {
        for (id, task) in other.tasks {
            if self.handlers.tasks.insert(id.clone(), task).is_some() {
                self.duplicates.push(id);
            }
        }
        for (id, hook) in other.failure_hooks {
            if self.handlers.failure_hooks.insert(id.clone(), hook).is_some() {
                self.duplicates.push(id);
            }
        }
        self
    }

    pub fn build(self) -> QueueResult<Handlers> {
        if !self.duplicates.is_empty() {
            return Err(QueueError::Configuration(format!(
                "handler registered twice: {}",
                self.duplicates.join(", ")
            )));
        }
        Ok(self.handlers)
    }
}
