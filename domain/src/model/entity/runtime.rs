use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// A pre-built software environment located on the executing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub name: String,
    pub prefix: PathBuf,
}

impl RuntimeEnv {
    pub fn new(name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    /// Directory holding the environment's executables.
    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// Whether `prefix` is an environment directory named `name`.
    pub fn matches(prefix: &Path, name: &str) -> bool {
        prefix.file_name() == Some(OsStr::new(name))
    }
}
