use std::path::PathBuf;

use anyhow::Context;
use domain::service::AllocationProbe;

/// Allocation view taken from the environment the PBS mom hands the
/// batch script.
pub struct PbsAllocation {
    job_id: Option<String>,
    nodefile: Option<PathBuf>,
}

impl PbsAllocation {
    pub fn from_env() -> Self {
        Self {
            job_id: std::env::var("PBS_JOBID").ok(),
            nodefile: std::env::var_os("PBS_NODEFILE").map(PathBuf::from),
        }
    }
}

#[async_trait::async_trait]
impl AllocationProbe for PbsAllocation {
    fn active(&self) -> bool {
        self.job_id.is_some()
    }

    async fn hostnames(&self) -> anyhow::Result<Vec<String>> {
        let nodefile = self.nodefile.as_deref().context("PBS_NODEFILE is not set")?;
        let listing = tokio::fs::read_to_string(nodefile)
            .await
            .with_context(|| format!("cannot read nodefile {}", nodefile.display()))?;
        Ok(parse_nodefile(&listing))
    }

    fn step_launcher(&self) -> Option<&'static str> {
        None
    }
}

/// The nodefile repeats each host once per slot; keep the first
/// occurrence so the lead node stays in front.
fn parse_nodefile(listing: &str) -> Vec<String> {
    let mut hosts = Vec::<String>::new();
    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() || hosts.iter().any(|seen| seen == line) {
            continue;
        }
        hosts.push(line.to_owned());
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodefile_slots_collapse_in_order() {
        let listing = "node-b\nnode-b\nnode-a\nnode-a\nnode-b\n";
        assert_eq!(parse_nodefile(listing), ["node-b", "node-a"]);
    }

    #[test]
    fn empty_nodefile_yields_no_hosts() {
        assert!(parse_nodefile("\n\n").is_empty());
    }
}
