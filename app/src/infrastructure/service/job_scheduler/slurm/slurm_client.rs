use std::path::{Path, PathBuf};

use anyhow::Context;
use domain::{
    model::{entity::Job, vo::ScriptSpec},
    service::JobSchedulerService,
};
use indoc::formatdoc;
use tokio::process::Command;
use typed_builder::TypedBuilder;

use super::models::{parse_sacct, parse_submit_reply, SACCT_COLUMNS};
use crate::infrastructure::command::{MaybeSsh, SshConfig, Stage};
use crate::infrastructure::service::job_scheduler::log_parents;

#[derive(TypedBuilder)]
pub struct SlurmClient {
    spool_dir: String,
    #[builder(default)]
    ssh: Option<SshConfig>,
}

impl AsRef<Option<SshConfig>> for SlurmClient {
    fn as_ref(&self) -> &Option<SshConfig> {
        &self.ssh
    }
}

#[async_trait::async_trait]
impl JobSchedulerService for SlurmClient {
    fn render_script(&self, spec: &ScriptSpec) -> String {
        let request = &spec.request;
        let mut extras = String::new();
        if let Some(qos) = &request.qos {
            extras += &format!("#SBATCH --qos={qos}\n");
        }
        if let Some(partition) = &request.partition {
            extras += &format!("#SBATCH --partition={partition}\n");
        }
        if let Some(time_limit) = &request.time_limit {
            extras += &format!("#SBATCH --time={time_limit}\n");
        }
        if let Some(signal) = &request.signal {
            extras += &format!("#SBATCH --signal={signal}\n");
        }
        if request.requeue {
            extras += "#SBATCH --requeue\n";
        }
        formatdoc! {r#"
            #!/bin/bash
            #SBATCH --job-name={job_name}
            #SBATCH --gres={gres}
            #SBATCH --nodes={nodes}
            #SBATCH --cpus-per-task={cpus_per_task}
            #SBATCH --ntasks-per-node={tasks_per_node}
            {extras}#SBATCH --output={stdout_path}
            #SBATCH --error={stderr_path}

            exec {body}
        "#,
            job_name = request.job_name,
            gres = request.gpus.gres(),
            nodes = request.nodes,
            cpus_per_task = request.cpus_per_task,
            tasks_per_node = request.tasks_per_node,
            stdout_path = request.stdout_path,
            stderr_path = request.stderr_path,
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
                self.command("cd").arg(run_dir).arg(";").arg("sbatch").arg(&remote).output().await?;
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
            // No working directory override: sbatch records the submit
            // directory, and relative log paths resolve against it.
            let out = Command::new("sbatch").arg(&path).output().await?;
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
        let out = self
            .command("sacct")
            .args(["-PXo", SACCT_COLUMNS, "-j", id])
            .output()
            .await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for get_job. real: {}", out.status)
        }
        let jobs = parse_sacct(&out.stdout)?;
        jobs.into_iter().next().with_context(|| format!("no job with id {id}"))
    }

    async fn get_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let out = self.command("sacct").args(["-PXo", SACCT_COLUMNS]).output().await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for get_jobs. real: {}", out.status)
        }
        parse_sacct(&out.stdout)
    }

    async fn cancel_job(&self, id: &str) -> anyhow::Result<()> {
        let out = self.command("scancel").arg(id).output().await?;
        if !out.status.success() {
            anyhow::bail!("Exit Status not 0 for cancel_job. real: {}", out.status)
        }
        Ok(())
    }
}

impl SlurmClient {
    /// The scheduler opens the log files itself; their directories must
    /// exist by submission time or the output is lost.
    async fn ensure_log_dirs(&self, spec: &ScriptSpec) -> anyhow::Result<()> {
        let parents = log_parents(&spec.request.stdout_path, &spec.request.stderr_path);
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
    use indoc::indoc;

    use super::*;

    fn client() -> SlurmClient {
        SlurmClient::builder().spool_dir(".qrun".to_owned()).build()
    }

    #[test]
    fn default_request_renders_the_eval_script() {
        let spec = ScriptSpec::new(ResourceRequest::default(), "qrun exec");
        let script = client().render_script(&spec);
        assert_eq!(
            script,
            indoc! {r#"
                #!/bin/bash
                #SBATCH --job-name=eval
                #SBATCH --gres=gpu:1
                #SBATCH --nodes=1
                #SBATCH --cpus-per-task=10
                #SBATCH --ntasks-per-node=1
                #SBATCH --signal=USR1@600
                #SBATCH --requeue
                #SBATCH --output=logs/%j.out
                #SBATCH --error=logs/%j.err

                exec qrun exec
            "#}
        );
    }

    #[test]
    fn optional_directives_render_once_in_order() {
        let mut request = ResourceRequest::default();
        request.job_name = "objnav-eval".to_owned();
        request.gpus = "a40:8".parse().unwrap();
        request.nodes = 2;
        request.tasks_per_node = 8;
        request.qos = Some("ncv".to_owned());
        request.partition = Some("short".to_owned());
        request.time_limit = Some("24:00:00".to_owned());
        request.requeue = false;
        let spec = ScriptSpec::new(request, "qrun exec");
        let script = client().render_script(&spec);
        assert_eq!(
            script,
            indoc! {r#"
                #!/bin/bash
                #SBATCH --job-name=objnav-eval
                #SBATCH --gres=gpu:a40:8
                #SBATCH --nodes=2
                #SBATCH --cpus-per-task=10
                #SBATCH --ntasks-per-node=8
                #SBATCH --qos=ncv
                #SBATCH --partition=short
                #SBATCH --time=24:00:00
                #SBATCH --signal=USR1@600
                #SBATCH --output=logs/%j.out
                #SBATCH --error=logs/%j.err

                exec qrun exec
            "#}
        );
    }

    #[test]
    fn every_resource_directive_appears_exactly_once() {
        let spec = ScriptSpec::new(ResourceRequest::default(), "qrun exec");
        let script = client().render_script(&spec);
        for directive in [
            "--job-name", "--gres", "--nodes", "--cpus-per-task", "--ntasks-per-node",
            "--signal", "--requeue", "--output", "--error",
        ] {
            let count = script.matches(directive).count();
            assert_eq!(count, 1, "{directive} appears {count} times");
        }
    }
}
