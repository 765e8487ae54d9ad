use crate::model::vo::WorkerCommand;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    /// Terminated by a signal, carrying the signal number.
    Signal(i32),
}

impl WorkerExit {
    /// Shell-convention exit status: the code itself, or 128 + signal.
    pub fn status(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => 128 + signal,
        }
    }

    pub fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

#[async_trait::async_trait]
pub trait WorkerRunnerService {
    /// Run the worker with extra environment variables layered over the
    /// launcher's own, streaming its output through, and report how it ended.
    async fn run(&self, command: &WorkerCommand, env: &[(String, String)])
        -> anyhow::Result<WorkerExit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_signals_past_128() {
        assert_eq!(WorkerExit::Code(0).status(), 0);
        assert_eq!(WorkerExit::Code(137).status(), 137);
        assert_eq!(WorkerExit::Signal(9).status(), 137);
        assert_eq!(WorkerExit::Signal(15).status(), 143);
    }

    #[test]
    fn only_zero_is_success() {
        assert!(WorkerExit::Code(0).success());
        assert!(!WorkerExit::Code(1).success());
        assert!(!WorkerExit::Signal(9).success());
    }
}
