use std::fmt;

use serde::Deserialize;

/// The exact command line handed to the worker process. Nothing is ever
/// appended behind the caller's back; distributed coordination travels
/// through the environment instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Command line for an experiment worker:
    /// `<script> --exp-config <path> --run-type <mode>`.
    pub fn for_experiment(script: &str, exp_config: &str, run_type: RunType) -> Self {
        Self {
            program: script.to_owned(),
            args: vec![
                "--exp-config".to_owned(),
                exp_config.to_owned(),
                "--run-type".to_owned(),
                run_type.to_string(),
            ],
        }
    }

    /// Full argv including the program itself.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunType {
    Train,
    #[default]
    Eval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_argv_is_exact() {
        let command = WorkerCommand::for_experiment(
            "run.py",
            "baselines/config/pointnav/hier_w_proj_ora_sem_map_objnav.yaml",
            RunType::Eval,
        );
        assert_eq!(
            command.argv(),
            vec![
                "run.py",
                "--exp-config",
                "baselines/config/pointnav/hier_w_proj_ora_sem_map_objnav.yaml",
                "--run-type",
                "eval",
            ]
        );
    }

    #[test]
    fn run_type_renders_lowercase() {
        assert_eq!(RunType::Eval.to_string(), "eval");
        assert_eq!(RunType::Train.to_string(), "train");
    }

    #[test]
    fn display_joins_argv() {
        let command = WorkerCommand::for_experiment("run.py", "cfg.yaml", RunType::Train);
        assert_eq!(command.to_string(), "run.py --exp-config cfg.yaml --run-type train");
    }
}
