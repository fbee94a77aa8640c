//! Job definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Job Identifier
pub type JobId = Uuid;

/// The mutable document a job carries between tasks and hooks
pub type Workspace = serde_json::Map<String, serde_json::Value>;

/// Queue used when a producer does not name one
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Job state
///
/// ```text
/// NEW ──┐
///       ├─> PROCESSING ─┬─> READY ──> (claimed again)
/// READY ┘               ├─> COMPLETE
///                       ├─> FAILED
///                       └─> STOPPING (advisory, overwritten by the final result)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, never claimed
    New,
    /// At least one task ran, more remain
    Ready,
    /// Claimed by a worker
    Processing,
    /// The worker holding it received a shutdown request
    Stopping,
    /// A task or hook raised
    Failed,
    /// Task sequence exhausted
    Complete,
}

impl JobState {
    /// States a worker may claim from.
    pub const CLAIMABLE: [JobState; 2] = [JobState::New, JobState::Ready];

    /// States the retention sweep may delete.
    pub const TERMINAL: [JobState; 3] = [JobState::Failed, JobState::Complete, JobState::Stopping];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::Ready => "READY",
            JobState::Processing => "PROCESSING",
            JobState::Stopping => "STOPPING",
            JobState::Failed => "FAILED",
            JobState::Complete => "COMPLETE",
        }
    }

    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (New | Ready, Processing)
                | (Processing, Ready | Complete | Failed | Stopping)
                | (Stopping, Ready | Complete | Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(JobState::New),
            "READY" => Ok(JobState::Ready),
            "PROCESSING" => Ok(JobState::Processing),
            "STOPPING" => Ok(JobState::Stopping),
            "FAILED" => Ok(JobState::Failed),
            "COMPLETE" => Ok(JobState::Complete),
            other => Err(QueueError::Persistence(format!(
                "unknown job state '{other}'"
            ))),
        }
    }
}

/// A persisted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Job type, a key of the task registry
    pub name: String,
    pub state: JobState,
    /// Empty once the task sequence is exhausted
    pub next_task: String,
    pub workspace: Workspace,
    pub queue_name: String,
    pub priority: i32,
    pub run_after: Option<DateTime<Utc>>,
}

impl Job {
    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, to: JobState) -> QueueResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn has_next_task(&self) -> bool {
        !self.next_task.is_empty()
    }

    /// Whether a worker bound to `queue_name` may claim this job at `now`.
    pub fn is_eligible(&self, queue_name: &str, now: DateTime<Utc>) -> bool {
        self.queue_name == queue_name && self.state.is_claimable() && self.is_due(now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_after.map_or(true, |at| at <= now)
    }
}

/// Producer-side description of a job to enqueue
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub workspace: Option<Workspace>,
    pub queue_name: Option<String>,
    pub priority: i32,
    pub run_after: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace: None,
            queue_name: None,
            priority: 0,
            run_after: None,
        }
    }

    pub fn workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_after(mut self, at: DateTime<Utc>) -> Self {
        self.run_after = Some(at);
        self
    }

    /// Materialise the row a store will insert. `first_task` comes from the registry.
    pub(crate) fn into_job(self, first_task: String, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            created: now,
            modified: now,
            name: self.name,
            state: JobState::New,
            next_task: first_task,
            workspace: self.workspace.unwrap_or_default(),
            queue_name: self
                .queue_name
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            priority: self.priority,
            run_after: self.run_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> Job {
        NewJob::new("report").into_job("reports.build".into(), now)
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            JobState::New,
            JobState::Ready,
            JobState::Processing,
            JobState::Stopping,
            JobState::Failed,
            JobState::Complete,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("DONE".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&JobState::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }

    #[test]
    fn test_claimable_and_terminal_sets() {
        assert!(JobState::New.is_claimable());
        assert!(JobState::Ready.is_claimable());
        assert!(!JobState::Processing.is_claimable());
        assert!(!JobState::Stopping.is_claimable());

        assert!(JobState::Stopping.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Complete.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(JobState::New.can_transition_to(JobState::Processing));
        assert!(JobState::Ready.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::Stopping));
        assert!(JobState::Stopping.can_transition_to(JobState::Complete));

        assert!(!JobState::New.can_transition_to(JobState::Complete));
        assert!(!JobState::Complete.can_transition_to(JobState::Processing));
        assert!(!JobState::Failed.can_transition_to(JobState::Ready));
        assert!(!JobState::Stopping.can_transition_to(JobState::Processing));
    }

    #[test]
    fn test_job_transition_rejects_illegal_move() {
        let mut job = sample(Utc::now());
        let err = job.transition(JobState::Complete).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: JobState::New,
                to: JobState::Complete
            }
        ));
        assert_eq!(job.state, JobState::New);

        job.transition(JobState::Processing).unwrap();
        job.transition(JobState::Complete).unwrap();
        assert_eq!(job.state, JobState::Complete);
    }

    #[test]
    fn test_new_job_defaults() {
        let now = Utc::now();
        let job = sample(now);
        assert_eq!(job.state, JobState::New);
        assert_eq!(job.queue_name, DEFAULT_QUEUE_NAME);
        assert_eq!(job.next_task, "reports.build");
        assert!(job.workspace.is_empty());
        assert_eq!(job.priority, 0);
        assert_eq!(job.created, now);
        assert_eq!(job.modified, now);
    }

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        let mut job = sample(now);
        assert!(job.is_eligible(DEFAULT_QUEUE_NAME, now));
        assert!(!job.is_eligible("other", now));

        job.run_after = Some(now + Duration::minutes(5));
        assert!(!job.is_eligible(DEFAULT_QUEUE_NAME, now));
        assert!(job.is_eligible(DEFAULT_QUEUE_NAME, now + Duration::minutes(5)));

        job.run_after = None;
        job.state = JobState::Processing;
        assert!(!job.is_eligible(DEFAULT_QUEUE_NAME, now));
    }
}
