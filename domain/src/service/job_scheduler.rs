use crate::model::entity::Job;
use crate::model::vo::ScriptSpec;

#[async_trait::async_trait]
pub trait JobSchedulerService {
    /// Render the batch script text for a submission, directives included.
    fn render_script(&self, spec: &ScriptSpec) -> String;
    /// Stage and submit a script, returning the scheduler's job id.
    async fn submit(&self, spec: &ScriptSpec) -> anyhow::Result<String>;
    /// Submit an already-staged script file, returning the scheduler's job id.
    async fn submit_script(&self, script_path: &str) -> anyhow::Result<String>;
    async fn get_job(&self, id: &str) -> anyhow::Result<Job>;
    async fn get_jobs(&self) -> anyhow::Result<Vec<Job>>;
    async fn cancel_job(&self, id: &str) -> anyhow::Result<()>;
}
