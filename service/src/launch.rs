use std::sync::Arc;

use anyhow::Context;
use domain::{
    model::vo::WorkerCommand,
    service::{AllocationProbe, RuntimeLoaderService, WorkerExit, WorkerRunnerService},
};
use typed_builder::TypedBuilder;

/// Rendezvous address handed to every worker task. The lead node of the
/// allocation, in the scheduler's own node order.
pub const MAIN_ADDR: &str = "MAIN_ADDR";
pub const MAIN_PORT: &str = "MAIN_PORT";

/// Address workers rendezvous at when no allocation is around.
const LOCAL_ADDR: &str = "127.0.0.1";

/// Everything the launcher needs to run one worker inside the allocation.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub worker: WorkerCommand,
    /// Extra environment for the worker, already merged and ordered.
    pub env_overrides: Vec<(String, String)>,
    /// Runtime environment to activate before the worker starts.
    pub runtime_env: Option<String>,
    pub main_port: Option<u16>,
    /// Worker tasks across the whole allocation.
    pub total_tasks: u32,
}

/// Runs inside the allocation: resolves the rendezvous address, activates
/// the runtime, starts the worker and reports its exit status untouched.
#[derive(TypedBuilder)]
pub struct LaunchService {
    allocation: Arc<dyn AllocationProbe + Send + Sync>,
    runtime: Arc<dyn RuntimeLoaderService + Send + Sync>,
    runner: Arc<dyn WorkerRunnerService + Send + Sync>,
}

impl LaunchService {
    pub async fn launch(&self, plan: &LaunchPlan) -> anyhow::Result<WorkerExit> {
        let mut env = plan.env_overrides.clone();

        let main_addr = self.lead_node().await?;
        env.push((MAIN_ADDR.to_owned(), main_addr));
        if let Some(port) = plan.main_port {
            env.push((MAIN_PORT.to_owned(), port.to_string()));
        }

        if let Some(name) = &plan.runtime_env {
            let runtime = self
                .runtime
                .find_env(name)
                .await?
                .with_context(|| format!("runtime environment `{name}` not found"))?;
            tracing::info!(env = %runtime.name, prefix = %runtime.prefix.display(), "runtime activated");
            env.extend(self.runtime.activation(&runtime));
        }

        let command = self.step_command(plan);
        tracing::info!(command = %command, "starting worker");

        let exit = self.runner.run(&command, &env).await?;
        match exit {
            WorkerExit::Code(code) => {
                tracing::info!(status = code, "worker exited");
            }
            WorkerExit::Signal(signal) => {
                tracing::warn!(signal, status = exit.status(), "worker killed by signal");
            }
        }
        Ok(exit)
    }

    /// First hostname of the allocation, never sorted. Local runs and empty
    /// node lists fall back to the loopback address.
    async fn lead_node(&self) -> anyhow::Result<String> {
        if !self.allocation.active() {
            return Ok(LOCAL_ADDR.to_owned());
        }
        let hostnames = self.allocation.hostnames().await?;
        match hostnames.into_iter().next() {
            Some(lead) => Ok(lead),
            None => {
                tracing::warn!("allocation reported no hostnames, using loopback");
                Ok(LOCAL_ADDR.to_owned())
            }
        }
    }

    /// Multi-task runs go through the scheduler's step launcher so every
    /// task gets started; the worker's own argv is never touched.
    fn step_command(&self, plan: &LaunchPlan) -> WorkerCommand {
        if !self.allocation.active() || plan.total_tasks <= 1 {
            return plan.worker.clone();
        }
        let Some(launcher) = self.allocation.step_launcher() else {
            return plan.worker.clone();
        };
        let mut args = Vec::with_capacity(plan.worker.args.len() + 1);
        args.push(plan.worker.program.clone());
        args.extend(plan.worker.args.iter().cloned());
        WorkerCommand {
            program: launcher.to_owned(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::model::entity::RuntimeEnv;
    use domain::model::vo::worker::RunType;
    use mockall::mock;

    use super::*;

    mock! {
        Allocation {}

        #[async_trait::async_trait]
        impl AllocationProbe for Allocation {
            fn active(&self) -> bool;
            async fn hostnames(&self) -> anyhow::Result<Vec<String>>;
            fn step_launcher(&self) -> Option<&'static str>;
        }
    }

    mock! {
        Runtime {}

        #[async_trait::async_trait]
        impl RuntimeLoaderService for Runtime {
            async fn find_env(&self, name: &str) -> anyhow::Result<Option<RuntimeEnv>>;
            fn activation(&self, env: &RuntimeEnv) -> Vec<(String, String)>;
        }
    }

    mock! {
        Runner {}

        #[async_trait::async_trait]
        impl WorkerRunnerService for Runner {
            async fn run(
                &self,
                command: &WorkerCommand,
                env: &[(String, String)],
            ) -> anyhow::Result<WorkerExit>;
        }
    }

    fn worker() -> WorkerCommand {
        WorkerCommand::for_experiment(
            "run.py",
            "baselines/config/pointnav/hier_w_proj_ora_sem_map_objnav.yaml",
            RunType::Eval,
        )
    }

    fn plan() -> LaunchPlan {
        LaunchPlan {
            worker: worker(),
            env_overrides: vec![
                ("GLOG_minloglevel".to_owned(), "2".to_owned()),
                ("MAGNUM_LOG".to_owned(), "quiet".to_owned()),
                ("HABITAT_SIM_LOG".to_owned(), "quiet".to_owned()),
            ],
            runtime_env: None,
            main_port: None,
            total_tasks: 1,
        }
    }

    fn idle_allocation() -> MockAllocation {
        let mut allocation = MockAllocation::new();
        allocation.expect_active().return_const(false);
        allocation
    }

    #[tokio::test]
    async fn lead_node_is_first_hostname_unsorted() {
        let mut allocation = MockAllocation::new();
        allocation.expect_active().return_const(true);
        allocation
            .expect_hostnames()
            .returning(|| Ok(vec!["node-b".to_owned(), "node-a".to_owned()]));
        allocation.expect_step_launcher().return_const(None);

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|_, env| {
                env.iter().any(|(k, v)| k == MAIN_ADDR && v == "node-b")
                    && env.iter().any(|(k, v)| k == "GLOG_minloglevel" && v == "2")
                    && env.iter().any(|(k, v)| k == "MAGNUM_LOG" && v == "quiet")
                    && env.iter().any(|(k, v)| k == "HABITAT_SIM_LOG" && v == "quiet")
            })
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(allocation))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        assert_eq!(service.launch(&plan()).await.unwrap(), WorkerExit::Code(0));
    }

    #[tokio::test]
    async fn no_allocation_falls_back_to_loopback() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|_, env| env.iter().any(|(k, v)| k == MAIN_ADDR && v == LOCAL_ADDR))
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        service.launch(&plan()).await.unwrap();
    }

    #[tokio::test]
    async fn main_port_joins_env_when_configured() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|_, env| {
                env.iter().any(|(k, v)| k == MAIN_PORT && v == "8738")
                    && env.iter().any(|(k, _)| k == MAIN_ADDR)
            })
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        let mut plan = plan();
        plan.main_port = Some(8738);
        service.launch(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn main_port_stays_out_of_env_when_unconfigured() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|_, env| env.iter().all(|(k, _)| k != MAIN_PORT))
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        service.launch(&plan()).await.unwrap();
    }

    #[tokio::test]
    async fn worker_exit_code_passes_through_unchanged() {
        let mut runner = MockRunner::new();
        runner.expect_run().returning(|_, _| Ok(WorkerExit::Code(137)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        let exit = service.launch(&plan()).await.unwrap();
        assert_eq!(exit.status(), 137);
    }

    #[tokio::test]
    async fn signal_death_maps_past_128() {
        let mut runner = MockRunner::new();
        runner.expect_run().returning(|_, _| Ok(WorkerExit::Signal(9)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        let exit = service.launch(&plan()).await.unwrap();
        assert_eq!(exit.status(), 137);
    }

    #[tokio::test]
    async fn missing_runtime_env_aborts_before_worker() {
        let mut runtime = MockRuntime::new();
        runtime.expect_find_env().returning(|_| Ok(None));

        let mut runner = MockRunner::new();
        runner.expect_run().times(0);

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(runtime))
            .runner(Arc::new(runner))
            .build();
        let mut plan = plan();
        plan.runtime_env = Some("habitat".to_owned());
        let err = service.launch(&plan).await.unwrap_err();
        assert!(err.to_string().contains("habitat"));
    }

    #[tokio::test]
    async fn runtime_activation_joins_worker_env() {
        let mut runtime = MockRuntime::new();
        runtime.expect_find_env().returning(|name| {
            Ok(Some(RuntimeEnv::new(name, format!("/opt/conda/envs/{name}"))))
        });
        runtime.expect_activation().returning(|env| {
            vec![("CONDA_DEFAULT_ENV".to_owned(), env.name.clone())]
        });

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|_, env| env.iter().any(|(k, v)| k == "CONDA_DEFAULT_ENV" && v == "habitat"))
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(idle_allocation()))
            .runtime(Arc::new(runtime))
            .runner(Arc::new(runner))
            .build();
        let mut plan = plan();
        plan.runtime_env = Some("habitat".to_owned());
        service.launch(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn multi_task_runs_wrap_with_step_launcher() {
        let mut allocation = MockAllocation::new();
        allocation.expect_active().return_const(true);
        allocation.expect_hostnames().returning(|| Ok(vec!["node-a".to_owned()]));
        allocation.expect_step_launcher().return_const(Some("srun"));

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|command, _| {
                command.program == "srun"
                    && command.args
                        == vec![
                            "run.py",
                            "--exp-config",
                            "baselines/config/pointnav/hier_w_proj_ora_sem_map_objnav.yaml",
                            "--run-type",
                            "eval",
                        ]
            })
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(allocation))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        let mut plan = plan();
        plan.total_tasks = 16;
        service.launch(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn single_task_run_keeps_bare_argv() {
        let mut allocation = MockAllocation::new();
        allocation.expect_active().return_const(true);
        allocation.expect_hostnames().returning(|| Ok(vec!["node-a".to_owned()]));
        allocation.expect_step_launcher().return_const(Some("srun"));

        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .withf(|command, _| command.program == "run.py")
            .times(1)
            .returning(|_, _| Ok(WorkerExit::Code(0)));

        let service = LaunchService::builder()
            .allocation(Arc::new(allocation))
            .runtime(Arc::new(MockRuntime::new()))
            .runner(Arc::new(runner))
            .build();
        service.launch(&plan()).await.unwrap();
    }
}
