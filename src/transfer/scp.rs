//! `ssh`/`scp` backed file transfer.
//!
//! Shells out to the OpenSSH client. Host keys are not checked because pod
//! addresses are recycled between customers; the key pair is the only trust
//! anchor.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::gateway::FileTransfer;
use crate::error::{KeeperError, Result, TransferError};
use crate::state::SshEndpoint;

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 400;

/// Gateway running the system `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct ScpGateway {
    /// Private key passed with `-i`.
    key_path: PathBuf,
    /// `ConnectTimeout` handed to OpenSSH.
    connect_timeout: Duration,
    /// Upper bound of one invocation.
    command_timeout: Duration,
}

impl ScpGateway {
    /// Creates a gateway.
    #[must_use]
    pub fn new(key_path: impl Into<PathBuf>, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            key_path: key_path.into(),
            connect_timeout,
            command_timeout,
        }
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            String::from("-i"),
            self.key_path.display().to_string(),
            String::from("-o"),
            String::from("StrictHostKeyChecking=no"),
            String::from("-o"),
            String::from("UserKnownHostsFile=/dev/null"),
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            String::from("LogLevel=ERROR"),
            String::from("-o"),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }

    /// Arguments of `ssh` running `command` on the pod.
    #[must_use]
    pub fn ssh_args(&self, endpoint: &SshEndpoint, command: &str) -> Vec<String> {
        let mut args = vec![String::from("-p"), endpoint.port.to_string()];
        args.extend(self.common_options());
        args.push(format!("{}@{}", endpoint.user, endpoint.host));
        args.push(command.to_string());
        args
    }

    /// Arguments of `scp` copying a pod file to `local_path`.
    #[must_use]
    pub fn scp_pull_args(&self, endpoint: &SshEndpoint, remote_path: &str, local_path: &Path) -> Vec<String> {
        let mut args = vec![String::from("-P"), endpoint.port.to_string()];
        args.extend(self.common_options());
        args.push(format!("{}@{}:{remote_path}", endpoint.user, endpoint.host));
        args.push(local_path.display().to_string());
        args
    }

    /// Arguments of `scp` copying `local_path` to the pod.
    #[must_use]
    pub fn scp_push_args(&self, endpoint: &SshEndpoint, local_path: &Path, remote_path: &str) -> Vec<String> {
        let mut args = vec![String::from("-P"), endpoint.port.to_string()];
        args.extend(self.common_options());
        args.push(local_path.display().to_string());
        args.push(format!("{}@{}:{remote_path}", endpoint.user, endpoint.host));
        args
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        trace!("Running {program} {}", args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::SpawnFailed {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| TransferError::Timeout {
                program: program.to_string(),
                timeout_secs: self.command_timeout.as_secs(),
            })??;

        if output.status.success() {
            Ok(output)
        } else {
            Err(KeeperError::Transfer(TransferError::RemoteCommandFailed {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            }))
        }
    }
}

#[async_trait]
impl FileTransfer for ScpGateway {
    async fn pull(&self, endpoint: &SshEndpoint, remote_path: &str, local_path: &Path) -> Result<()> {
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Pulling {remote_path} from {endpoint}");
        self.run("scp", &self.scp_pull_args(endpoint, remote_path, local_path))
            .await?;
        Ok(())
    }

    async fn push(&self, endpoint: &SshEndpoint, local_path: &Path, remote_path: &str) -> Result<()> {
        if let Some(idx) = remote_path.rfind('/').filter(|idx| *idx > 0) {
            let remote_dir = &remote_path[..idx];
            self.run_remote(endpoint, &format!("mkdir -p {}", sh_quote(remote_dir)))
                .await?;
        }

        debug!("Pushing {} to {endpoint}:{remote_path}", local_path.display());
        self.run("scp", &self.scp_push_args(endpoint, local_path, remote_path))
            .await?;
        Ok(())
    }

    async fn run_remote(&self, endpoint: &SshEndpoint, command: &str) -> Result<String> {
        debug!("Running on {endpoint}: {command}");
        let output = self.run("ssh", &self.ssh_args(endpoint, command)).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Quotes a value for a POSIX shell.
#[must_use]
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text.len().saturating_sub(STDERR_TAIL);
    let start = (start..text.len()).find(|i| text.is_char_boundary(*i)).unwrap_or(text.len());
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> ScpGateway {
        ScpGateway::new("/keys/id_rsa", Duration::from_secs(5), Duration::from_secs(30))
    }

    fn endpoint() -> SshEndpoint {
        SshEndpoint::new("194.26.196.173", 31432, "root")
    }

    #[test]
    fn test_ssh_args() {
        let args = gateway().ssh_args(&endpoint(), "echo ok");
        assert_eq!(&args[..2], &["-p", "31432"]);
        assert!(args.contains(&String::from("StrictHostKeyChecking=no")));
        assert!(args.contains(&String::from("ConnectTimeout=5")));
        assert_eq!(args[args.len() - 2], "root@194.26.196.173");
        assert_eq!(args[args.len() - 1], "echo ok");
    }

    #[test]
    fn test_scp_args_direction() {
        let gw = gateway();
        let pull = gw.scp_pull_args(&endpoint(), "/root/rl-swarm/swarm.pem", Path::new("/bk/swarm.pem"));
        assert_eq!(&pull[..2], &["-P", "31432"]);
        assert_eq!(pull[pull.len() - 2], "root@194.26.196.173:/root/rl-swarm/swarm.pem");
        assert_eq!(pull[pull.len() - 1], "/bk/swarm.pem");

        let push = gw.scp_push_args(&endpoint(), Path::new("/bk/swarm.pem"), "/root/rl-swarm/swarm.pem");
        assert_eq!(push[push.len() - 2], "/bk/swarm.pem");
        assert_eq!(push[push.len() - 1], "root@194.26.196.173:/root/rl-swarm/swarm.pem");
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("/root/a b"), "'/root/a b'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_stderr_tail() {
        let long = "x".repeat(STDERR_TAIL + 50);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL);
        assert_eq!(stderr_tail(b"  refused \n"), "refused");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let err = gateway()
            .run("podkeeper-no-such-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, KeeperError::Transfer(TransferError::SpawnFailed { .. })));
        assert_eq!(err.kind(), "TransferFailure");
    }
}
