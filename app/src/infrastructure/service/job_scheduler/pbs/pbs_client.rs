use std::path::{Path, PathBuf};

use anyhow::Context;
use domain::{
    model::{entity::Job, vo::ScriptSpec},
    service::JobSchedulerService,
};
use indoc::formatdoc;
use tokio::process::Command;
use typed_builder::TypedBuilder;

use super::models::{parse_qstat_lines, parse_submit_reply, PbsJobs};
use crate::infrastructure::command::{MaybeSsh, SshConfig, Stage};
use crate::infrastructure::service::job_scheduler::log_parents;

#[derive(TypedBuilder)]
pub struct PbsClient {
    spool_dir: String,
    #[builder(default)]
    ssh: Option<SshConfig>,
}

impl AsRef<Option<SshConfig>> for PbsClient {
    fn as_ref(&self) -> &Option<SshConfig> {
        &self.ssh
    }
}

#[async_trait::async_trait]
impl JobSchedulerService for PbsClient {
    fn render_script(&self, spec: &ScriptSpec) -> String {
        let request = &spec.request;
        // qsub does not expand %j in log paths, so the run id stands in
        // for the job id.
        let run_id = spec.run_id.to_string();
        let stdout_path = request.stdout_path.replace("%j", &run_id);
        let stderr_path = request.stderr_path.replace("%j", &run_id);
        let mut select = format!(
            "nodes={}:ppn={}:gpus={}",
            request.nodes,
            request.cpus_per_task.saturating_mul(request.tasks_per_node),
            request.gpus.count,
        );
        if let Some(kind) = &request.gpus.kind {
            select += &format!(":{kind}");
        }
        let mut extras = String::new();
        if let Some(queue) = request.partition.as_ref().or(request.qos.as_ref()) {
            extras += &format!("#PBS -q {queue}\n");
        }
        if let Some(time_limit) = &request.time_limit {
            extras += &format!("#PBS -l walltime={time_limit}\n");
        }
        if let Some(signal) = &request.signal {
            tracing::debug!(
                "pbs has no early-signal directive, dropping {signal} and relying on the TERM \
                 grace period"
            );
        }
        formatdoc! {r#"
            #!/bin/bash
            #PBS -N {job_name}
            #PBS -l {select}
            #PBS -r {requeue}
            {extras}#PBS -o {stdout_path}
            #PBS -e {stderr_path}

            cd $PBS_O_WORKDIR
            exec {body}
        "#,
            job_name = request.job_name,
            requeue = if request.requeue { "y" } else { "n" },
            body = spec.body,
        }
    }

    async fn submit(&self, spec: &ScriptSpec) -> anyhow::Result<String> {
        let mut path = PathBuf::from(self.spool_dir.as_str());
        path.push(spec.path.as_str());
        let parent = path.parent().context("script path has no parent")?;
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&path, self.render_script(spec)).await?;
        self.ensure_log_dirs(spec).await?;
        self.submit_script(spec.path.as_str()).await
    }

    async fn submit_script(&self, script_path: &str) -> anyhow::Result<String> {
        let out = if let Some(ssh) = &self.ssh {
            let local = PathBuf::from_iter([self.spool_dir.as_str(), script_path]);
            let remote = ssh.remote_spool().join(script_path);
            let run_dir = remote.parent().context("script path has no parent")?;

            let out = self.command("mkdir").arg("-p").arg(run_dir).output().await?;
            if !out.status.success() {
                anyhow::bail!("Exit Status not 0 for remote mkdir. real: {}", out.status)
            }
            let mut scp = self.stage(&local, &remote).context("scp requires an ssh proxy")?;
            let out = scp.output().await?;
            if !out.status.success() {
                anyhow::bail!("Exit Status not 0 for scp staging. real: {}", out.status)
            }

            let out =
                self.command("cd").arg(run_dir).arg(";").arg("qsub").arg(&remote).output().await?;
            if !out.status.success() {
                anyhow::bail!(
                    "Exit Status not 0 for ssh submit. real: {}, err: {}",
                    out.status,
                    String::from_utf8(out.stderr)?
                )
            }
            out
        } else {
            let path = PathBuf::from_iter([self.spool_dir.as_str(), script_path]);
            // No working directory override: qsub records the submit
            // directory in PBS_O_WORKDIR and the script changes into it.
            let out = Command::new("qsub").arg(&path).output().await?;
            if !out.status.success() {
                anyhow::bail!(
                    "Exit Status not 0 for submit. real: {}, err: {}",
                    out.status,
                    String::from_utf8(out.stderr)?
                )
            }
            out
        };
        Ok(parse_submit_reply(&out.stdout)?)
    }

    async fn get_job(&self, id: &str) -> anyhow::Result<Job> {
        tracing::debug!("getting job id: {id}");
        let jobs = match self.jobs_from_json(Some(id)).await {
            Ok(jobs) => jobs,
            // Torque has no json formatter, fall back to the full listing.
            Err(_) => self.jobs_from_lines(Some(id)).await?,
        };
        jobs.into_iter().next().with_context(|| format!("no job with id {id}"))
    }

    async fn get_jobs(&self) -> anyhow::Result<Vec<Job>> {
        match self.jobs_from_json(None).await {
            Ok(jobs) => Ok(jobs),
            Err(_) => self.jobs_from_lines(None).await,
        }
    }

    async fn cancel_job(&self, id: &str) -> anyhow::Result<()> {
        let out = self.command("qdel").args(["-x", id]).output().await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for cancel_job. real: {}", out.status)
        }
        Ok(())
    }
}

impl PbsClient {
    async fn jobs_from_json(&self, id: Option<&str>) -> anyhow::Result<Vec<Job>> {
        let mut qstat = self.command("qstat");
        qstat.args(["-xfF", "json"]);
        if let Some(id) = id {
            qstat.arg(id);
        }
        let out = qstat.output().await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for qstat json. real: {}", out.status)
        }
        let report: PbsJobs = serde_json::from_slice(&out.stdout)?;
        Ok(report.jobs.into_iter().map(|(id, item)| item.into_job(id)).collect())
    }

    async fn jobs_from_lines(&self, id: Option<&str>) -> anyhow::Result<Vec<Job>> {
        let mut qstat = self.command("qstat");
        qstat.arg("-xfw");
        if let Some(id) = id {
            qstat.arg(id);
        }
        let out = qstat.output().await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for qstat listing. real: {}", out.status)
        }
        Ok(parse_qstat_lines(&out.stdout))
    }

    /// The scheduler opens the log files itself; their directories must
    /// exist by submission time or the output is lost.
    async fn ensure_log_dirs(&self, spec: &ScriptSpec) -> anyhow::Result<()> {
        let run_id = spec.run_id.to_string();
        let stdout_path = spec.request.stdout_path.replace("%j", &run_id);
        let stderr_path = spec.request.stderr_path.replace("%j", &run_id);
        let parents = log_parents(&stdout_path, &stderr_path);
        if parents.is_empty() {
            return Ok(());
        }
        if let Some(ssh) = &self.ssh {
            let run_dir = match Path::new(spec.path.as_str()).parent() {
                Some(parent) => ssh.remote_spool().join(parent),
                None => ssh.remote_spool(),
            };
            let mut mkdir = self.command("mkdir");
            mkdir.arg("-p");
            for parent in &parents {
                mkdir.arg(run_dir.join(parent));
            }
            let out = mkdir.output().await?;
            if !out.status.success() {
                anyhow::bail!("Exit Status not 0 for remote log mkdir. real: {}", out.status)
            }
        } else {
            for parent in &parents {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::model::vo::ResourceRequest;
    use indoc::formatdoc;

    use super::*;

    fn client() -> PbsClient {
        PbsClient::builder().spool_dir(".qrun".to_owned()).build()
    }

    #[test]
    fn default_request_renders_torque_directives() {
        let spec = ScriptSpec::new(ResourceRequest::default(), "qrun exec");
        let script = client().render_script(&spec);
        assert_eq!(
            script,
            formatdoc! {r#"
                #!/bin/bash
                #PBS -N eval
                #PBS -l nodes=1:ppn=10:gpus=1
                #PBS -r y
                #PBS -o logs/{run_id}.out
                #PBS -e logs/{run_id}.err

                cd $PBS_O_WORKDIR
                exec qrun exec
            "#,
                run_id = spec.run_id,
            }
        );
    }

    #[test]
    fn queue_prefers_partition_over_qos() {
        let mut request = ResourceRequest::default();
        request.qos = Some("ncv".to_owned());
        request.partition = Some("short".to_owned());
        request.gpus = "a40:8".parse().unwrap();
        request.nodes = 2;
        request.tasks_per_node = 8;
        request.time_limit = Some("24:00:00".to_owned());
        request.requeue = false;
        let spec = ScriptSpec::new(request, "qrun exec");
        let script = client().render_script(&spec);
        assert!(script.contains("#PBS -q short\n"));
        assert!(!script.contains("ncv"));
        assert!(script.contains("#PBS -l nodes=2:ppn=80:gpus=8:a40\n"));
        assert!(script.contains("#PBS -r n\n"));
        assert!(script.contains("#PBS -l walltime=24:00:00\n"));
    }

    #[test]
    fn log_paths_do_not_keep_the_placeholder() {
        let spec = ScriptSpec::new(ResourceRequest::default(), "qrun exec");
        let script = client().render_script(&spec);
        assert!(!script.contains("%j"));
    }

    #[test]
    fn oversized_cpu_counts_saturate_in_the_select_line() {
        let mut request = ResourceRequest::default();
        request.cpus_per_task = u32::MAX;
        request.tasks_per_node = 2;
        let spec = ScriptSpec::new(request, "qrun exec");
        let script = client().render_script(&spec);
        assert!(script.contains("ppn=4294967295"));
    }
}
