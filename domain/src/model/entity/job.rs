use std::sync::Arc;

use serde::Serialize;

/// A batch job as reported by the cluster scheduler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Arc<str>,
    pub name: String,
    pub owner: String,
    pub state: JobState,
    pub exit_status_code: i32,
    pub usage: JobUsage,
}

/// Scheduler-owned lifecycle. The launcher only observes it.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queuing,
    Running,
    Completing,
    Completed,
    Suspended,
    Cancelled,
    Requeued,
    Failed,
    #[default]
    Unknown,
}

/// Resources the job consumed so far.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUsage {
    pub cpus: u64,
    pub nodes: u64,
    /// Wall clock seconds.
    pub wall_time: u64,
    /// Core seconds.
    pub cpu_time: u64,
    pub start_time: i64,
    pub end_time: i64,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.owner == other.owner
            && self.state == other.state
    }
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: Arc::from(String::default()),
            name: String::default(),
            owner: String::default(),
            state: JobState::default(),
            exit_status_code: 0,
            usage: JobUsage::default(),
        }
    }
}
