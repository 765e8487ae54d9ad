use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use domain::model::entity::job::{Job, JobState, JobUsage};
use serde::Deserialize;

use crate::infrastructure::service::job_scheduler::UnrecognizedReply;

/// Shape of a `qstat -xfF json` report.
#[derive(Debug, Clone, Deserialize)]
pub struct PbsJobs {
    #[serde(rename = "Jobs", default)]
    pub jobs: HashMap<String, PbsJobItem>,
}

/// One job block. Most fields only show up once the job has run, hence
/// the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PbsJobItem {
    #[serde(rename = "Job_Name", default)]
    pub job_name: String,
    #[serde(rename = "Job_Owner", default)]
    pub job_owner: String,
    #[serde(default)]
    pub job_state: String,
    #[serde(rename = "Exit_status", default)]
    pub exit_status: i32,
    #[serde(default)]
    pub resources_used: PbsResourcesUsed,
    #[serde(rename = "Resource_List", default)]
    pub resource_list: PbsResourceList,
    #[serde(default)]
    pub stime: String,
    #[serde(default)]
    pub mtime: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PbsResourcesUsed {
    #[serde(default)]
    pub cput: String,
    #[serde(default)]
    pub walltime: String,
    #[serde(default)]
    pub ncpus: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PbsResourceList {
    #[serde(default)]
    pub nodect: u64,
}

impl PbsJobItem {
    pub fn into_job(self, id: String) -> Job {
        // mtime only means "ended at" once the job left the queue.
        let end_time = match self.job_state.as_str() {
            "F" | "E" => parse_time(&self.mtime),
            _ => 0,
        };
        Job {
            id: Arc::from(id),
            name: self.job_name,
            owner: self.job_owner,
            state: job_state(&self.job_state, self.exit_status),
            exit_status_code: self.exit_status,
            usage: JobUsage {
                cpus: self.resources_used.ncpus,
                nodes: self.resource_list.nodect,
                wall_time: parse_duration(&self.resources_used.walltime),
                cpu_time: parse_duration(&self.resources_used.cput),
                start_time: parse_time(&self.stime),
                end_time,
            },
        }
    }
}

/// Fallback parse of the plain `qstat -xfw` report.
pub fn parse_qstat_lines(stdout: &[u8]) -> Vec<Job> {
    let text = String::from_utf8_lossy(stdout);
    let mut jobs = Vec::<(String, PbsJobItem)>::new();
    for line in text.lines() {
        if let Some(id) = line.strip_prefix("Job Id: ") {
            jobs.push((id.trim().to_owned(), PbsJobItem::default()));
            continue;
        }
        let Some((_, item)) = jobs.last_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim().split_once(" = ") else {
            continue;
        };
        match key {
            "Job_Name" => item.job_name = value.to_owned(),
            "Job_Owner" => item.job_owner = value.to_owned(),
            "job_state" => item.job_state = value.to_owned(),
            "Exit_status" => item.exit_status = value.parse().unwrap_or_default(),
            "resources_used.walltime" => item.resources_used.walltime = value.to_owned(),
            "resources_used.cput" => item.resources_used.cput = value.to_owned(),
            "resources_used.ncpus" => {
                item.resources_used.ncpus = value.parse().unwrap_or_default()
            }
            "Resource_List.nodect" => item.resource_list.nodect = value.parse().unwrap_or_default(),
            "stime" => item.stime = value.to_owned(),
            "mtime" => item.mtime = value.to_owned(),
            _ => {}
        }
    }
    jobs.into_iter().map(|(id, item)| item.into_job(id)).collect()
}

/// Job id out of a qsub reply, `<sequence>.<server>`.
pub fn parse_submit_reply(stdout: &[u8]) -> Result<String, UnrecognizedReply> {
    let reply = String::from_utf8_lossy(stdout);
    reply
        .trim()
        .split('.')
        .next()
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_owned)
        .ok_or_else(|| UnrecognizedReply {
            scheduler: "pbs",
            reply: reply.trim_end().to_owned(),
        })
}

fn job_state(state: &str, exit_status: i32) -> JobState {
    // 254 is the rerun indicator, not a worker failure.
    let clean_exit = exit_status == 0 || exit_status == 254;
    match state {
        "R" => JobState::Running,
        "Q" | "W" => JobState::Queuing,
        "H" | "S" | "U" => JobState::Suspended,
        "E" if clean_exit => JobState::Completing,
        "E" => JobState::Failed,
        "F" if clean_exit => JobState::Completed,
        "F" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

fn parse_time(time: &str) -> i64 {
    time.ne("UNKNOWN")
        .then(|| {
            NaiveDateTime::parse_from_str(time, "%a %b %d %T %Y")
                .ok()
                .and_then(|t| t.and_local_timezone(Local).single())
                .map(|t| t.timestamp())
        })
        .flatten()
        .unwrap_or_default()
}

/// `[dd:]hh:mm:ss` into seconds.
fn parse_duration(duration: &str) -> u64 {
    let mut seconds = 0u64;
    for (i, part) in duration.rsplit(':').enumerate() {
        let part: u64 = part.parse().unwrap_or(0);
        match i as u32 {
            0..=2 => seconds += 60u64.pow(i as u32) * part,
            3 => seconds += 86_400 * part,
            _ => {}
        }
    }
    seconds
}
