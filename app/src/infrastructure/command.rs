//! Shelling out to scheduler binaries, optionally across an ssh proxy.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::SshProxyConfig;

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub port: String,
    pub username_host: String,
    pub home_dir: String,
    pub spool_dir: String,
}

impl SshConfig {
    pub fn new(config: &SshProxyConfig, spool_dir: &str) -> Self {
        let SshProxyConfig {
            host,
            username,
            port,
            home_dir,
        } = config;

        Self {
            port: port.to_string(),
            username_host: format!("{username}@{host}"),
            home_dir: home_dir.clone(),
            spool_dir: spool_dir.to_owned(),
        }
    }

    /// Where staged scripts land on the remote side.
    pub fn remote_spool(&self) -> PathBuf {
        PathBuf::from_iter([&self.home_dir, &self.spool_dir])
    }
}

/// An ssh proxy for commands. Transparent when no proxy is configured.
pub trait MaybeSsh {
    fn command(&self, cmd: &str) -> Command;
}

impl<Ctx> MaybeSsh for Ctx
where
    Ctx: AsRef<Option<SshConfig>>,
{
    fn command(&self, cmd: &str) -> Command {
        let Some(ssh) = self.as_ref() else {
            return Command::new(cmd);
        };

        let mut command = Command::new("ssh");
        command.args(["-p", &ssh.port, &ssh.username_host, cmd]);
        command
    }
}

/// Staging of local files on the proxy host with `scp`. `None` when
/// everything runs locally and no staging is needed.
pub trait Stage {
    fn stage(&self, local: &Path, remote: &Path) -> Option<Command>;
}

impl<Ctx> Stage for Ctx
where
    Ctx: AsRef<Option<SshConfig>>,
{
    fn stage(&self, local: &Path, remote: &Path) -> Option<Command> {
        self.as_ref().as_ref().map(|ssh| {
            let mut command = Command::new("scp");
            command.args(["-P", &ssh.port]);
            command.arg(local);
            command.arg(format!("{}:{}", ssh.username_host, remote.display()));
            command
        })
    }
}
