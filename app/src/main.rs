mod config;
mod infrastructure;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use domain::model::{
    entity::Job,
    vo::{ScriptSpec, WorkerCommand},
};
use service::prelude::*;
use tracing_subscriber::EnvFilter;

use self::config::{build_config, LaunchConfig};
use self::infrastructure::service::runtime_loader::CondaLoader;
use self::infrastructure::service::worker_runner::ProcessRunner;
use self::infrastructure::service::{select_allocation, select_scheduler};

#[derive(Parser)]
#[command(name = "qrun", version, about = "Cluster launcher for experiment workers")]
struct Cli {
    /// Config file; without it, `qrun.*` in the working directory is
    /// used when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a batch script and hand it to the scheduler.
    Submit,
    /// Run the worker inside the current allocation. The process exits
    /// with the worker's own status.
    Exec,
    /// Print the batch script `submit` would enqueue.
    Script,
    /// Show one job, or every job the scheduler reports.
    Status {
        job_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Cancel a queued or running job.
    Cancel { job_id: String },
}

#[tokio::main]
async fn main() {
    match inner().await {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!(
                "{error}: {e:?}",
                error = if std::io::stderr().is_terminal() {
                    "error".red().bold()
                } else {
                    "error".normal()
                }
            );
            std::process::exit(1);
        }
    }
}

async fn inner() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    // RUST_LOG wins over the -v/-q flags when set.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(cli.verbose.tracing_level_filter().to_string())
        }))
        .with_writer(std::io::stderr)
        .init();

    let config =
        build_config(cli.config.as_deref()).with_context(|| "Failed to build config".red())?;

    match cli.command {
        Commands::Submit => {
            let service = submit_service(&config)?;
            let spec = script_spec(&config, cli.config.as_deref())?;
            let job_id = service.submit(&spec).await?;
            println!("{job_id}");
            Ok(0)
        }
        Commands::Script => {
            let service = submit_service(&config)?;
            let spec = script_spec(&config, cli.config.as_deref())?;
            print!("{}", service.preview(&spec)?);
            Ok(0)
        }
        Commands::Exec => {
            let service = LaunchService::builder()
                .allocation(select_allocation(&config)?)
                .runtime(Arc::new(CondaLoader::new()))
                .runner(Arc::new(ProcessRunner))
                .build();
            let plan = LaunchPlan {
                worker: WorkerCommand::for_experiment(
                    &config.worker.script,
                    &config.worker.exp_config,
                    config.worker.run_type,
                ),
                env_overrides: config.worker_env(),
                runtime_env: config.runtime.conda_env.clone(),
                main_port: config.main_port,
                total_tasks: config.resources.total_tasks(),
            };
            let exit = service.launch(&plan).await?;
            Ok(exit.status())
        }
        Commands::Status { job_id, json } => {
            let service = submit_service(&config)?;
            status(&service, job_id, json).await?;
            Ok(0)
        }
        Commands::Cancel { job_id } => {
            let service = submit_service(&config)?;
            service.cancel(&job_id).await?;
            Ok(0)
        }
    }
}

fn submit_service(config: &LaunchConfig) -> anyhow::Result<SubmitService> {
    Ok(SubmitService::builder().scheduler(select_scheduler(config)?).build())
}

/// Script wrapping this launcher's own `exec` for the scheduler to run
/// inside the allocation.
fn script_spec(config: &LaunchConfig, cli_path: Option<&Path>) -> anyhow::Result<ScriptSpec> {
    let launcher = match &config.launcher_path {
        Some(path) => path.clone(),
        None => std::env::current_exe()
            .context("cannot locate the launcher executable")?
            .to_string_lossy()
            .into_owned(),
    };
    let mut body = format!("{launcher} exec");
    if let Some(path) = &config.config_path {
        body += &format!(" --config {path}");
    } else if let Some(path) = cli_path {
        let path = path
            .canonicalize()
            .with_context(|| format!("cannot canonicalize config path {}", path.display()))?;
        body += &format!(" --config {}", path.display());
    }
    Ok(ScriptSpec::new(config.resources.clone(), body))
}

async fn status(service: &SubmitService, job_id: Option<String>, json: bool) -> anyhow::Result<()> {
    let jobs = match &job_id {
        Some(id) => vec![service.job(id).await?],
        None => service.jobs().await?,
    };
    if !json {
        print_job_table(&jobs);
        return Ok(());
    }
    let listing: Vec<_> = jobs.iter().map(job_json).collect();
    if job_id.is_some() {
        // A single id queries one job, so print the bare object.
        println!("{}", serde_json::to_string_pretty(&listing[0])?);
    } else {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    }
    Ok(())
}

fn job_json(job: &Job) -> serde_json::Value {
    serde_json::json!({
        "id": &*job.id,
        "name": job.name,
        "owner": job.owner,
        "state": job.state.to_string(),
        "exitStatus": job.exit_status_code,
        "usage": job.usage,
    })
}

fn print_job_table(jobs: &[Job]) {
    println!("{:<14} {:<20} {:<10} {:<11} {:>6}", "JOB", "NAME", "OWNER", "STATE", "EXIT");
    for job in jobs {
        println!(
            "{:<14} {:<20} {:<10} {:<11} {:>6}",
            job.id, job.name, job.owner, job.state, job.exit_status_code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_body_prefers_the_configured_config_path() {
        let mut config = LaunchConfig::default();
        config.launcher_path = Some("/opt/qrun/qrun".to_owned());
        config.config_path = Some("/cluster/qrun.yaml".to_owned());
        let spec = script_spec(&config, Some(Path::new("./qrun.yaml"))).unwrap();
        assert_eq!(spec.body, "/opt/qrun/qrun exec --config /cluster/qrun.yaml");
    }

    #[test]
    fn script_body_omits_the_config_flag_without_a_path() {
        let mut config = LaunchConfig::default();
        config.launcher_path = Some("/opt/qrun/qrun".to_owned());
        let spec = script_spec(&config, None).unwrap();
        assert_eq!(spec.body, "/opt/qrun/qrun exec");
    }
}
