use std::sync::Arc;

use domain::{
    model::{entity::Job, vo::ScriptSpec},
    service::JobSchedulerService,
};
use typed_builder::TypedBuilder;

/// Hands validated resource requests to the scheduler and relays job
/// queries back. Knows nothing about which scheduler sits behind it.
#[derive(TypedBuilder)]
pub struct SubmitService {
    scheduler: Arc<dyn JobSchedulerService + Send + Sync>,
}

impl SubmitService {
    pub async fn submit(&self, spec: &ScriptSpec) -> anyhow::Result<String> {
        spec.request.validate()?;
        let job_id = self.scheduler.submit(spec).await?;
        tracing::info!(job_id = %job_id, run_id = %spec.run_id, "job submitted");
        Ok(job_id)
    }

    /// Render the script that `submit` would hand over, without submitting.
    pub fn preview(&self, spec: &ScriptSpec) -> anyhow::Result<String> {
        spec.request.validate()?;
        Ok(self.scheduler.render_script(spec))
    }

    pub async fn job(&self, id: &str) -> anyhow::Result<Job> {
        self.scheduler.get_job(id).await
    }

    pub async fn jobs(&self) -> anyhow::Result<Vec<Job>> {
        self.scheduler.get_jobs().await
    }

    pub async fn cancel(&self, id: &str) -> anyhow::Result<()> {
        self.scheduler.cancel_job(id).await?;
        tracing::info!(job_id = %id, "job cancelled");
        Ok(())
    }
}
