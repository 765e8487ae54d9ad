/// View of the allocation the current process runs inside, if any.
#[async_trait::async_trait]
pub trait AllocationProbe {
    /// Whether the process is inside a scheduler allocation at all.
    fn active(&self) -> bool;
    /// Hostnames of the allocated nodes, in the scheduler's own order.
    /// The first entry is the lead node; callers must not sort.
    async fn hostnames(&self) -> anyhow::Result<Vec<String>>;
    /// Scheduler step launcher for multi-task runs, e.g. `srun`.
    fn step_launcher(&self) -> Option<&'static str>;
}
