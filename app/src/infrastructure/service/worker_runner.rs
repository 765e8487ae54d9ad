use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use anyhow::Context;
use domain::{
    model::vo::WorkerCommand,
    service::{WorkerExit, WorkerRunnerService},
};
use tokio::process::Command;

/// Runs the worker as a direct child with inherited stdio, so its
/// output lands in the scheduler's log files untouched.
pub struct ProcessRunner;

#[async_trait::async_trait]
impl WorkerRunnerService for ProcessRunner {
    async fn run(
        &self,
        command: &WorkerCommand,
        env: &[(String, String)],
    ) -> anyhow::Result<WorkerExit> {
        let status = Command::new(&command.program)
            .args(&command.args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .status()
            .await
            .with_context(|| format!("failed to start worker `{}`", command.program))?;
        Ok(exit_from_status(status))
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    match status.code() {
        Some(code) => WorkerExit::Code(code),
        // code() is None only for signal deaths on unix.
        None => WorkerExit::Signal(status.signal().unwrap_or(0)),
    }
}
