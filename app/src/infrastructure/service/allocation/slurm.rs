use anyhow::Context;
use domain::service::AllocationProbe;
use tokio::process::Command;

/// Allocation view taken from the environment slurmd hands the batch
/// script.
pub struct SlurmAllocation {
    job_id: Option<String>,
    nodelist: Option<String>,
}

impl SlurmAllocation {
    pub fn from_env() -> Self {
        Self {
            job_id: std::env::var("SLURM_JOB_ID").ok(),
            nodelist: std::env::var("SLURM_JOB_NODELIST").ok(),
        }
    }
}

#[async_trait::async_trait]
impl AllocationProbe for SlurmAllocation {
    fn active(&self) -> bool {
        self.job_id.is_some()
    }

    async fn hostnames(&self) -> anyhow::Result<Vec<String>> {
        let nodelist = self.nodelist.as_deref().context("SLURM_JOB_NODELIST is not set")?;
        // scontrol expands node ranges without reordering them, so the
        // first line stays the scheduler's lead node.
        let out = Command::new("scontrol")
            .args(["show", "hostnames", nodelist])
            .output()
            .await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for scontrol. real: {}", out.status)
        }
        Ok(parse_hostnames(&out.stdout))
    }

    fn step_launcher(&self) -> Option<&'static str> {
        Some("srun")
    }
}

fn parse_hostnames(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
