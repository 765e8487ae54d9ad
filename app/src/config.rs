use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use domain::model::vo::{request::ResourceRequest, worker::RunType};
use serde::Deserialize;

/// Worker environment defaults. Applied in this order before any user
/// overrides so rendered scripts stay byte-stable between runs.
pub const ENV_DEFAULTS: [(&str, &str); 3] = [
    ("GLOG_minloglevel", "2"),
    ("MAGNUM_LOG", "quiet"),
    ("HABITAT_SIM_LOG", "quiet"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    /// Where batch scripts are staged, one subdirectory per run.
    #[serde(default = "LaunchConfig::default_spool_dir")]
    pub spool_dir: String,

    #[serde(default)]
    pub resources: ResourceRequest,

    /// Extra worker environment; wins over the built-in defaults.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub ssh_proxy: Option<SshProxyConfig>,

    /// Rendezvous port forwarded to workers as MAIN_PORT.
    #[serde(default)]
    pub main_port: Option<u16>,

    /// Launcher binary path baked into batch scripts. Defaults to the
    /// running executable.
    #[serde(default)]
    pub launcher_path: Option<String>,

    /// Config file path baked into batch scripts, for submit hosts whose
    /// filesystem the allocation cannot see. Defaults to the `--config`
    /// argument, canonicalized.
    #[serde(default)]
    pub config_path: Option<String>,
}

impl LaunchConfig {
    pub fn default_spool_dir() -> String {
        ".qrun".to_owned()
    }

    /// Merged worker environment: built-in defaults first, then the user's
    /// extra variables sorted by name. Config sources may lowercase keys,
    /// so overrides of the defaults match case-insensitively.
    pub fn worker_env(&self) -> Vec<(String, String)> {
        let overridden = |name: &str| {
            self.env
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let mut merged: Vec<(String, String)> = ENV_DEFAULTS
            .iter()
            .map(|&(name, value)| {
                (name.to_owned(), overridden(name).unwrap_or_else(|| value.to_owned()))
            })
            .collect();

        let mut extras: Vec<(String, String)> = self
            .env
            .iter()
            .filter(|(k, _)| !ENV_DEFAULTS.iter().any(|(d, _)| d.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extras.sort();
        merged.extend(extras);
        merged
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            spool_dir: Self::default_spool_dir(),
            resources: ResourceRequest::default(),
            env: HashMap::new(),
            runtime: RuntimeConfig::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            ssh_proxy: None,
            main_port: None,
            launcher_path: None,
            config_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Conda environment activated before the worker starts. `~` disables
    /// activation entirely.
    #[serde(default = "RuntimeConfig::default_conda_env")]
    pub conda_env: Option<String>,
}

impl RuntimeConfig {
    pub fn default_conda_env() -> Option<String> {
        Some("habitat".to_owned())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            conda_env: Self::default_conda_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "WorkerConfig::default_script")]
    pub script: String,

    #[serde(default = "WorkerConfig::default_exp_config")]
    pub exp_config: String,

    #[serde(default)]
    pub run_type: RunType,
}

impl WorkerConfig {
    pub fn default_script() -> String {
        "run.py".to_owned()
    }

    pub fn default_exp_config() -> String {
        "baselines/config/pointnav/hier_w_proj_ora_sem_map_objnav.yaml".to_owned()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            script: Self::default_script(),
            exp_config: Self::default_exp_config(),
            run_type: RunType::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_kind")]
    pub kind: String,
}

impl SchedulerConfig {
    pub fn default_kind() -> String {
        "slurm".to_owned()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshProxyConfig {
    pub host: String,

    pub username: String,

    #[serde(default = "SshProxyConfig::default_port")]
    pub port: u16,

    #[serde(default = "SshProxyConfig::default_home_dir")]
    pub home_dir: String,
}

impl SshProxyConfig {
    pub fn default_port() -> u16 {
        22
    }

    pub fn default_home_dir() -> String {
        "~".to_owned()
    }
}

/// Layer the config file (when given or present) under `QRUN_*` environment
/// overrides.
pub fn build_config(path: Option<&Path>) -> anyhow::Result<LaunchConfig> {
    let builder = match path {
        Some(path) => Config::builder().add_source(File::from(path)),
        None => Config::builder().add_source(File::with_name("qrun").required(false)),
    };
    let config = builder
        .add_source(Environment::with_prefix("QRUN").separator("__"))
        .build()?;
    Ok(config.try_deserialize()?)
}
