use std::path::PathBuf;

use anyhow::Context;
use domain::{model::entity::RuntimeEnv, service::RuntimeLoaderService};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;

/// Finds conda environments on the executing node and derives the
/// variables a child process needs to run inside one. Runs entirely
/// without `conda activate`, which only works in an interactive shell.
pub struct CondaLoader {
    env_line: Regex,
}

impl CondaLoader {
    pub fn new() -> Self {
        Self {
            env_line: Regex::new(r"(?m)^(?P<name>[^#\s]\S*) +(?:\* +)?(?P<prefix>\S+)$").unwrap(),
        }
    }
}

impl Default for CondaLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of `conda env list --json`.
#[derive(Debug, Deserialize)]
struct CondaEnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

impl CondaEnvList {
    fn find(self, name: &str) -> Option<RuntimeEnv> {
        self.envs
            .into_iter()
            .find(|prefix| RuntimeEnv::matches(prefix, name))
            .map(|prefix| RuntimeEnv::new(name, prefix))
    }
}

#[async_trait::async_trait]
impl RuntimeLoaderService for CondaLoader {
    async fn find_env(&self, name: &str) -> anyhow::Result<Option<RuntimeEnv>> {
        match self.find_from_json(name).await {
            Ok(found) => Ok(found),
            // Old conda builds print the table only.
            Err(_) => self.find_from_table(name).await,
        }
    }

    fn activation(&self, env: &RuntimeEnv) -> Vec<(String, String)> {
        activation_with_path(env, &std::env::var("PATH").unwrap_or_default())
    }
}

impl CondaLoader {
    async fn find_from_json(&self, name: &str) -> anyhow::Result<Option<RuntimeEnv>> {
        let output = Command::new("conda")
            .args(["env", "list", "--json"])
            .output()
            .await
            .context("Unable to run conda env list json")?;
        if !output.status.success() {
            anyhow::bail!("{}", String::from_utf8_lossy(&output.stderr))
        }

        let listing: CondaEnvList = serde_json::from_slice(&output.stdout)?;
        Ok(listing.find(name))
    }

    async fn find_from_table(&self, name: &str) -> anyhow::Result<Option<RuntimeEnv>> {
        let output = Command::new("conda")
            .args(["env", "list"])
            .output()
            .await
            .context("Unable to run conda env list")?;
        if !output.status.success() {
            anyhow::bail!("{}", String::from_utf8_lossy(&output.stderr))
        }

        let table = String::from_utf8_lossy(&output.stdout);
        Ok(self
            .env_line
            .captures_iter(&table)
            .find(|caps| &caps["name"] == name)
            .map(|caps| RuntimeEnv::new(name, caps["prefix"].to_owned())))
    }
}

/// Prepending the env's bin directory is what `conda activate` does for
/// the spawned process, minus the shell hooks.
fn activation_with_path(env: &RuntimeEnv, current_path: &str) -> Vec<(String, String)> {
    let bin_dir = env.bin_dir();
    let path = if current_path.is_empty() {
        bin_dir.to_string_lossy().into_owned()
    } else {
        format!("{}:{current_path}", bin_dir.to_string_lossy())
    };
    vec![
        ("PATH".to_owned(), path),
        (
            "CONDA_PREFIX".to_owned(),
            env.prefix.to_string_lossy().into_owned(),
        ),
        ("CONDA_DEFAULT_ENV".to_owned(), env.name.clone()),
    ]
}
