use std::sync::Arc;

use domain::model::entity::job::{Job, JobState, JobUsage};
use serde::Deserialize;

use crate::infrastructure::service::job_scheduler::UnrecognizedReply;

/// Columns requested with `sacct -PXo`. The header spells CPUTimeRaw as
/// CPUTimeRAW, hence the mismatched rename below.
pub const SACCT_COLUMNS: &str =
    "JobID,JobName,User,State,ExitCode,CPUTimeRaw,ElapsedRaw,NCPUS,NNodes,Start,End";

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct SacctJob {
    #[serde(rename = "JobID")]
    pub job_id: String,
    #[serde(rename = "JobName")]
    pub job_name: String,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "ExitCode")]
    pub exit_code: String,
    #[serde(rename = "CPUTimeRAW")]
    pub cpu_time: u64,
    #[serde(rename = "ElapsedRaw")]
    pub elapsed: u64,
    #[serde(rename = "NCPUS")]
    pub ncpus: u64,
    #[serde(rename = "NNodes")]
    pub nnodes: u64,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
}

impl SacctJob {
    pub fn into_job(self) -> anyhow::Result<Job> {
        // ExitCode reads `code:signal`.
        let exit_status_code = self.exit_code.split(':').next().unwrap_or("0").parse()?;
        Ok(Job {
            id: Arc::from(self.job_id),
            name: self.job_name,
            owner: self.user,
            state: job_state(&self.state),
            exit_status_code,
            usage: JobUsage {
                cpus: self.ncpus,
                nodes: self.nnodes,
                wall_time: self.elapsed,
                cpu_time: self.cpu_time,
                start_time: parse_time(&self.start),
                end_time: parse_time(&self.end),
            },
        })
    }
}

/// Parse the pipe-separated `sacct -PXo` report. Quotes are stripped up
/// front because sacct does not escape them.
pub fn parse_sacct(stdout: &[u8]) -> anyhow::Result<Vec<Job>> {
    let stdout = stdout.iter().copied().filter(|c| *c != b'\'').collect::<Vec<_>>();
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .quoting(false)
        .from_reader(stdout.as_slice());
    let mut jobs = Vec::new();
    for record in csv_reader.deserialize() {
        let record: SacctJob = record?;
        jobs.push(record.into_job()?);
    }
    Ok(jobs)
}

/// Job id out of an sbatch reply, `Submitted batch job <id>`.
pub fn parse_submit_reply(stdout: &[u8]) -> Result<String, UnrecognizedReply> {
    let reply = String::from_utf8_lossy(stdout);
    reply
        .lines()
        .find_map(|line| line.strip_prefix("Submitted batch job "))
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_owned)
        .ok_or_else(|| UnrecognizedReply {
            scheduler: "slurm",
            reply: reply.trim_end().to_owned(),
        })
}

fn job_state(state: &str) -> JobState {
    // sacct may append context, e.g. "CANCELLED by 1234".
    let head = state.split_whitespace().next().unwrap_or_default();
    match head {
        "BOOT_FAIL" | "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "TIMEOUT" | "DEADLINE" => {
            JobState::Failed
        }
        "CANCELLED" => JobState::Cancelled,
        "COMPLETED" => JobState::Completed,
        "PENDING" => JobState::Queuing,
        "COMPLETING" => JobState::Completing,
        "RUNNING" => JobState::Running,
        "SUSPENDED" => JobState::Suspended,
        "PREEMPTED" | "REQUEUED" => JobState::Requeued,
        _ => JobState::Unknown,
    }
}

fn parse_time(time: &str) -> i64 {
    if matches!(time, "" | "Unknown" | "UNKNOWN" | "None") {
        return 0;
    }
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(time) {
        return t.timestamp();
    }
    // sacct prints local time without an offset.
    chrono::NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|t| t.and_local_timezone(chrono::Local).single())
        .map(|t| t.timestamp())
        .unwrap_or_default()
}
