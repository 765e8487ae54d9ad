use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Declarative resource requisition for one batch job. Immutable once
/// submitted; the scheduler owns everything that happens afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRequest {
    #[serde(default = "ResourceRequest::default_job_name")]
    pub job_name: String,

    #[serde(default)]
    pub gpus: GpuSpec,

    #[serde(default = "ResourceRequest::default_nodes")]
    pub nodes: u32,

    #[serde(default = "ResourceRequest::default_cpus_per_task")]
    pub cpus_per_task: u32,

    #[serde(default = "ResourceRequest::default_tasks_per_node")]
    pub tasks_per_node: u32,

    #[serde(default)]
    pub qos: Option<String>,

    #[serde(default)]
    pub partition: Option<String>,

    /// Wall clock limit in the scheduler's `HH:MM:SS` notation.
    #[serde(default)]
    pub time_limit: Option<String>,

    /// Signal delivered ahead of the allocation timeout. The launcher only
    /// forwards the directive; observing the signal is the worker's business.
    #[serde(default = "ResourceRequest::default_signal")]
    pub signal: Option<SignalSpec>,

    #[serde(default = "ResourceRequest::default_requeue")]
    pub requeue: bool,

    /// Stdout log template, `%j` standing for the job id.
    #[serde(default = "ResourceRequest::default_stdout_path")]
    pub stdout_path: String,

    /// Stderr log template, `%j` standing for the job id.
    #[serde(default = "ResourceRequest::default_stderr_path")]
    pub stderr_path: String,
}

impl ResourceRequest {
    /// Reject requests the scheduler would either refuse or silently truncate.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_name.trim().is_empty() {
            anyhow::bail!("job name must not be empty");
        }
        if self.gpus.count == 0 {
            anyhow::bail!("gpu count must be at least 1");
        }
        if self.nodes == 0 {
            anyhow::bail!("node count must be at least 1");
        }
        if self.cpus_per_task == 0 {
            anyhow::bail!("cpus per task must be at least 1");
        }
        if self.tasks_per_node == 0 {
            anyhow::bail!("tasks per node must be at least 1");
        }
        if self.nodes.checked_mul(self.tasks_per_node).is_none() {
            anyhow::bail!("total task count out of range");
        }
        if self.cpus_per_task.checked_mul(self.tasks_per_node).is_none() {
            anyhow::bail!("per-node cpu count out of range");
        }
        if let Some(signal) = &self.signal {
            if signal.lead_seconds == 0 {
                anyhow::bail!("signal lead time must be at least 1 second");
            }
        }
        Ok(())
    }

    /// Worker processes the allocation will host in total. Saturates
    /// rather than wrapping on requests `validate` would reject.
    pub fn total_tasks(&self) -> u32 {
        self.nodes.saturating_mul(self.tasks_per_node)
    }

    fn default_job_name() -> String {
        "eval".to_owned()
    }

    fn default_nodes() -> u32 {
        1
    }

    fn default_cpus_per_task() -> u32 {
        10
    }

    fn default_tasks_per_node() -> u32 {
        1
    }

    fn default_signal() -> Option<SignalSpec> {
        Some(SignalSpec::default())
    }

    fn default_requeue() -> bool {
        true
    }

    fn default_stdout_path() -> String {
        "logs/%j.out".to_owned()
    }

    fn default_stderr_path() -> String {
        "logs/%j.err".to_owned()
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            job_name: Self::default_job_name(),
            gpus: GpuSpec::default(),
            nodes: Self::default_nodes(),
            cpus_per_task: Self::default_cpus_per_task(),
            tasks_per_node: Self::default_tasks_per_node(),
            qos: None,
            partition: None,
            time_limit: None,
            signal: Self::default_signal(),
            requeue: Self::default_requeue(),
            stdout_path: Self::default_stdout_path(),
            stderr_path: Self::default_stderr_path(),
        }
    }
}

/// GPU requisition, written `gpu[:kind]:count` in config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct GpuSpec {
    pub kind: Option<String>,
    pub count: u32,
}

impl GpuSpec {
    /// The `gres` fragment the scheduler understands.
    pub fn gres(&self) -> String {
        match &self.kind {
            Some(kind) => format!("gpu:{}:{}", kind, self.count),
            None => format!("gpu:{}", self.count),
        }
    }
}

impl Default for GpuSpec {
    fn default() -> Self {
        Self {
            kind: None,
            count: 1,
        }
    }
}

impl FromStr for GpuSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split(':').collect();
        let count = parts
            .pop()
            .unwrap_or_default()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid gpu count in `{s}`"))?;
        // A leading `gpu` resource name is optional in config.
        if parts.first().copied() == Some("gpu") {
            parts.remove(0);
        }
        let kind = match parts.as_slice() {
            [] => None,
            [kind] if !kind.is_empty() => Some((*kind).to_owned()),
            _ => anyhow::bail!("invalid gpu spec `{s}`, expected gpu[:kind]:count"),
        };
        Ok(Self { kind, count })
    }
}

impl TryFrom<String> for GpuSpec {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Signal name and lead time for the scheduler's pre-timeout warning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignalSpec {
    #[serde(default = "SignalSpec::default_name")]
    pub name: String,

    #[serde(default = "SignalSpec::default_lead_seconds")]
    pub lead_seconds: u32,
}

impl SignalSpec {
    fn default_name() -> String {
        "USR1".to_owned()
    }

    fn default_lead_seconds() -> u32 {
        600
    }
}

impl Default for SignalSpec {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            lead_seconds: Self::default_lead_seconds(),
        }
    }
}

impl fmt::Display for SignalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.lead_seconds)
    }
}
