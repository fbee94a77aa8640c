//! Task registry: job type -> ordered task identifiers plus optional hooks.
//!
//! Loaded once at start-up and never mutated afterwards. Share it behind an
//! `Arc` with the producer facade and the worker.
//!
//! ```toml
//! [jobs.send_report]
//! tasks = ["reports.build", "reports.send"]
//! failure_hook = "reports.on_failure"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::{QueueError, QueueResult};

/// Lifecycle points a job type may attach a hook to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookRole {
    Creation,
    PreTask,
    PostTask,
    Failure,
}

impl HookRole {
    pub fn as_str(self) -> &'static str {
        match self {
            HookRole::Creation => "creation",
            HookRole::PreTask => "pre_task",
            HookRole::PostTask => "post_task",
            HookRole::Failure => "failure",
        }
    }
}

impl fmt::Display for HookRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one job type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_task_hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_task_hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_hook: Option<String>,
}

impl JobSpec {
    pub fn new<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
            creation_hook: None,
            pre_task_hook: None,
            post_task_hook: None,
            failure_hook: None,
        }
    }

    pub fn with_hook(mut self, role: HookRole, id: impl Into<String>) -> Self {
        let slot = match role {
            HookRole::Creation => &mut self.creation_hook,
            HookRole::PreTask => &mut self.pre_task_hook,
            HookRole::PostTask => &mut self.post_task_hook,
            HookRole::Failure => &mut self.failure_hook,
        };
        *slot = Some(id.into());
        self
    }

    pub fn hook(&self, role: HookRole) -> Option<&str> {
        match role {
            HookRole::Creation => self.creation_hook.as_deref(),
            HookRole::PreTask => self.pre_task_hook.as_deref(),
            HookRole::PostTask => self.post_task_hook.as_deref(),
            HookRole::Failure => self.failure_hook.as_deref(),
        }
    }

    /// Every hook identifier configured for this job type, with its role.
    pub fn hooks(&self) -> impl Iterator<Item = (HookRole, &str)> {
        [
            HookRole::Creation,
            HookRole::PreTask,
            HookRole::PostTask,
            HookRole::Failure,
        ]
        .into_iter()
        .filter_map(move |role| self.hook(role).map(|id| (role, id)))
    }

    fn validate(&self, name: &str) -> QueueResult<()> {
        if self.tasks.is_empty() {
            return Err(QueueError::Configuration(format!(
                "job type '{name}' has an empty task list"
            )));
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.is_empty() {
                return Err(QueueError::Configuration(format!(
                    "job type '{name}' has an empty task identifier"
                )));
            }
            if !seen.insert(task.as_str()) {
                return Err(QueueError::Configuration(format!(
                    "job type '{name}' lists task '{task}' more than once"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    jobs: BTreeMap<String, JobSpec>,
}

/// Immutable job-type lookup table
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    jobs: BTreeMap<String, JobSpec>,
}

impl TaskRegistry {
    pub fn from_specs<I, S>(specs: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (S, JobSpec)>,
        S: Into<String>,
    {
        let mut jobs = BTreeMap::new();
        for (name, spec) in specs {
            let name = name.into();
            spec.validate(&name)?;
            if jobs.insert(name.clone(), spec).is_some() {
                return Err(QueueError::Configuration(format!(
                    "job type '{name}' is defined twice"
                )));
            }
        }
        Ok(Self { jobs })
    }

    /// Load from a TOML, YAML or JSON file (format picked from the extension).
    pub fn from_file(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref();
        let file: RegistryFile = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                QueueError::Configuration(format!(
                    "failed to load job registry from {}: {e}",
                    path.display()
                ))
            })?;
        Self::from_specs(file.jobs)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> QueueResult<&JobSpec> {
        self.jobs
            .get(name)
            .ok_or_else(|| QueueError::Configuration(format!("unknown job type '{name}'")))
    }

    pub fn first_task(&self, name: &str) -> QueueResult<&str> {
        self.next_task_after(name, None)?.ok_or_else(|| {
            QueueError::Configuration(format!("job type '{name}' has an empty task list"))
        })
    }

    /// The task following `current` in `name`'s sequence.
    ///
    /// `None` as `current` yields the first task; the last task yields
    /// `Ok(None)`. A `current` the sequence does not contain is an error: the
    /// registry changed under an in-flight job.
    pub fn next_task_after(&self, name: &str, current: Option<&str>) -> QueueResult<Option<&str>> {
        let tasks = &self.spec(name)?.tasks;
        let Some(current) = current else {
            return Ok(tasks.first().map(String::as_str));
        };
        let position = tasks.iter().position(|t| t == current).ok_or_else(|| {
            QueueError::Configuration(format!(
                "task '{current}' is not part of job type '{name}'"
            ))
        })?;
        Ok(tasks.get(position + 1).map(String::as_str))
    }

    pub fn hook(&self, name: &str, role: HookRole) -> QueueResult<Option<&str>> {
        Ok(self.spec(name)?.hook(role))
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobSpec)> {
        self.jobs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
