pub mod allocation;
pub mod job_scheduler;
pub mod runtime_loader;
pub mod worker_runner;

#[rustfmt::skip]
pub use self::{
    allocation::AllocationProbe,
    job_scheduler::JobSchedulerService,
    runtime_loader::RuntimeLoaderService,
    worker_runner::{WorkerExit, WorkerRunnerService},
};
