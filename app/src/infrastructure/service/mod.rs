pub mod allocation;
pub mod job_scheduler;
pub mod runtime_loader;
pub mod worker_runner;

use std::sync::Arc;

use domain::service::{AllocationProbe, JobSchedulerService};

use self::allocation::{PbsAllocation, SlurmAllocation};
use self::job_scheduler::{PbsClient, SlurmClient};
use crate::config::LaunchConfig;
use crate::infrastructure::command::SshConfig;

/// Scheduler client for the kind the config names.
pub fn select_scheduler(
    config: &LaunchConfig,
) -> anyhow::Result<Arc<dyn JobSchedulerService + Send + Sync>> {
    let ssh = config.ssh_proxy.as_ref().map(|proxy| SshConfig::new(proxy, &config.spool_dir));
    Ok(match config.scheduler.kind.as_str() {
        "slurm" => {
            Arc::new(SlurmClient::builder().spool_dir(config.spool_dir.clone()).ssh(ssh).build())
        }
        "pbs" => {
            Arc::new(PbsClient::builder().spool_dir(config.spool_dir.clone()).ssh(ssh).build())
        }
        kind => anyhow::bail!("unsupported scheduler kind `{kind}`"),
    })
}

/// Probe for the allocation this process runs inside, if any.
pub fn select_allocation(
    config: &LaunchConfig,
) -> anyhow::Result<Arc<dyn AllocationProbe + Send + Sync>> {
    Ok(match config.scheduler.kind.as_str() {
        "slurm" => Arc::new(SlurmAllocation::from_env()),
        "pbs" => Arc::new(PbsAllocation::from_env()),
        kind => anyhow::bail!("unsupported scheduler kind `{kind}`"),
    })
}
