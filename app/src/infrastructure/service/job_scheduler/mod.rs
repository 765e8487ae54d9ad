pub mod pbs;
pub mod slurm;

#[rustfmt::skip]
pub use self::{
    pbs::PbsClient,
    slurm::SlurmClient,
};

use std::path::Path;

/// The scheduler answered a submission with output we cannot take a job
/// id from.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized submit reply from {scheduler}: {reply:?}")]
pub struct UnrecognizedReply {
    pub scheduler: &'static str,
    pub reply: String,
}

/// Directories the scheduler writes the job logs into. The scheduler
/// opens the files itself and loses the output when a directory is
/// missing, so clients create these before submitting. Parents still
/// carrying a `%` placeholder cannot be created ahead of time.
pub(super) fn log_parents<'a>(stdout_path: &'a str, stderr_path: &'a str) -> Vec<&'a Path> {
    [stdout_path, stderr_path]
        .into_iter()
        .filter_map(|path| Path::new(path).parent())
        .filter(|parent| !parent.as_os_str().is_empty())
        .filter(|parent| !parent.to_string_lossy().contains('%'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_parents_skip_placeholders_and_bare_files() {
        assert_eq!(
            log_parents("logs/%j.out", "logs/%j.err"),
            vec![Path::new("logs"), Path::new("logs")]
        );
        assert!(log_parents("%j.out", "out/%j/err").is_empty());
    }
}
