use crate::model::entity::RuntimeEnv;

#[async_trait::async_trait]
pub trait RuntimeLoaderService {
    /// Look a named environment up in the runtime manager's inventory.
    async fn find_env(&self, name: &str) -> anyhow::Result<Option<RuntimeEnv>>;
    /// Environment variables that activate `env` for a child process.
    fn activation(&self, env: &RuntimeEnv) -> Vec<(String, String)>;
}
