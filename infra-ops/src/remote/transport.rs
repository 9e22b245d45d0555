use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{process::Command, time::timeout};

use crate::errors::{Error, Result};

/// Options passed to every "ssh"/"scp" call; hosts are ephemeral so
/// host keys are never pinned.
pub const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "LogLevel=ERROR",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "StrictHostKeyChecking=no",
];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User,
    Root,
}

/// Raw result of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// "None" when the process was terminated by a signal.
    pub status: Option<i32>,
}

/// Runs shell commands on one host and moves files to and from it.
///
/// Implementors only provide the raw invocation. The checked helpers treat
/// any non-empty error stream as failure, regardless of the exit status.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Human-readable target, used in logs.
    fn target(&self) -> String;

    async fn invoke(&self, command: &str, privilege: Privilege) -> Result<CommandOutput>;

    async fn put(&self, local: &Path, remote: &str) -> Result<()>;

    async fn get(&self, remote: &str, local: &Path) -> Result<()>;

    /// PIDs on the target host that belong to the caller (this process and
    /// its ancestors), so that process lookups never match themselves.
    /// Remote hosts share none.
    async fn own_pids(&self) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }

    /// Returns trimmed (stdout, stderr); fails with "RemoteExecution" when
    /// stderr is non-empty.
    async fn execute(&self, command: &str) -> Result<(String, String)> {
        let out = self.invoke(command, Privilege::User).await?;
        checked(command, out)
    }

    async fn sudo(&self, command: &str) -> Result<(String, String)> {
        let out = self.invoke(command, Privilege::Root).await?;
        checked(command, out)
    }

    /// Returns trimmed (stdout, stderr) without judging either stream.
    async fn execute_unchecked(&self, command: &str) -> Result<(String, String)> {
        let out = self.invoke(command, Privilege::User).await?;
        Ok((out.stdout.trim().to_string(), out.stderr.trim().to_string()))
    }

    async fn sudo_unchecked(&self, command: &str) -> Result<(String, String)> {
        let out = self.invoke(command, Privilege::Root).await?;
        Ok((out.stdout.trim().to_string(), out.stderr.trim().to_string()))
    }
}

fn checked(command: &str, out: CommandOutput) -> Result<(String, String)> {
    let stderr = out.stderr.trim();
    if !stderr.is_empty() {
        log::warn!("'{}' wrote to stderr: {}", command, stderr);
        return Err(Error::RemoteExecution {
            command: command.to_string(),
            stderr: stderr.to_string(),
        });
    }
    Ok((out.stdout.trim().to_string(), String::new()))
}

/// Wraps the string in single quotes so that "sh -c" receives it verbatim.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Prefixes the command for elevated execution.
pub fn with_privilege(command: &str, privilege: Privilege) -> String {
    match privilege {
        Privilege::User => command.to_string(),
        Privilege::Root => format!("sudo sh -c {}", shell_escape(command)),
    }
}

/// Spawns the command, collects both streams, and kills the child on timeout.
async fn run(mut cmd: Command, program: &str, limit: Duration) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(ret) => ret.map_err(|e| Error::other(format!("failed to spawn {program}: {e}")))?,
        Err(_) => {
            return Err(Error::Other {
                message: format!("{program} timed out after {:?}", limit),
                is_retryable: true,
            })
        }
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    })
}

/// Runs commands through the system "ssh" binary and copies files with "scp".
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub user: String,
    pub host: String,
    pub key_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl SshTransport {
    pub fn new(user: &str, host: &str) -> Self {
        Self {
            user: user.to_string(),
            host: host.to_string(),
            key_path: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
        if let Some(p) = &self.key_path {
            args.push(String::from("-i"));
            args.push(p.display().to_string());
        }
        args
    }

    /// Arguments for one "ssh" invocation, the command being the last one.
    pub fn ssh_args(&self, command: &str, privilege: Privilege) -> Vec<String> {
        let mut args = self.base_args();
        args.push(self.destination());
        args.push(with_privilege(command, privilege));
        args
    }

    /// Opens an interactive login shell on the host, inheriting this
    /// terminal, and returns once the operator exits it. No timeout applies.
    pub async fn open_session(&self) -> Result<()> {
        let mut args = self.base_args();
        args.push(String::from("-t"));
        args.push(self.destination());

        log::info!("opening interactive session on {}", self.destination());
        let status = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| Error::other(format!("failed to spawn ssh: {e}")))?;
        if !status.success() {
            return Err(Error::other(format!(
                "interactive session on {} exited with {status}",
                self.destination()
            )));
        }
        Ok(())
    }

    async fn scp(&self, from: String, to: String) -> Result<()> {
        let mut args = self.base_args();
        args.push(from.clone());
        args.push(to.clone());

        let mut cmd = Command::new("scp");
        cmd.args(&args);
        let out = run(cmd, "scp", self.timeout).await?;
        if out.status != Some(0) {
            return Err(Error::Other {
                message: format!("failed to copy {from} to {to}: {}", out.stderr.trim()),
                is_retryable: false,
            });
        }
        Ok(())
    }
}

impl Transport for SshTransport {
    fn target(&self) -> String {
        self.destination()
    }

    async fn invoke(&self, command: &str, privilege: Privilege) -> Result<CommandOutput> {
        log::info!("running on {}: {}", self.destination(), command);
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(command, privilege));
        run(cmd, "ssh", self.timeout).await
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        log::info!("uploading {} to {}:{}", local.display(), self.destination(), remote);
        self.scp(
            local.display().to_string(),
            format!("{}:{}", self.destination(), remote),
        )
        .await
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        log::info!("downloading {}:{} to {}", self.destination(), remote, local.display());
        self.scp(
            format!("{}:{}", self.destination(), remote),
            local.display().to_string(),
        )
        .await
    }
}

/// Runs commands on this machine through "sh -c".
#[derive(Debug, Clone)]
pub struct LocalTransport {
    pub timeout: Duration,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Transport for LocalTransport {
    fn target(&self) -> String {
        String::from("localhost")
    }

    async fn invoke(&self, command: &str, privilege: Privilege) -> Result<CommandOutput> {
        log::info!("running locally: {}", command);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &with_privilege(command, privilege)]);
        run(cmd, "sh", self.timeout).await
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        tokio::fs::copy(local, remote)
            .await
            .map_err(|e| Error::other(format!("failed to copy {} to {remote}: {e}", local.display())))?;
        Ok(())
    }

    async fn own_pids(&self) -> Result<Vec<u32>> {
        let mut pids = vec![std::process::id()];
        let mut pid = std::process::id();
        loop {
            let mut cmd = Command::new("ps");
            cmd.args(["-o", "ppid=", "-p", &pid.to_string()]);
            let out = run(cmd, "ps", self.timeout).await?;
            match out.stdout.trim().parse::<u32>() {
                // stop below init so that pid 1 stays visible
                Ok(ppid) if ppid > 1 && !pids.contains(&ppid) => {
                    pids.push(ppid);
                    pid = ppid;
                }
                _ => break,
            }
        }
        Ok(pids)
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        tokio::fs::copy(remote, local)
            .await
            .map_err(|e| Error::other(format!("failed to copy {remote} to {}: {e}", local.display())))?;
        Ok(())
    }
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::transport::test_shell_escape --exact --show-output
#[test]
fn test_shell_escape() {
    assert_eq!(shell_escape("ls -la"), "'ls -la'");
    assert_eq!(shell_escape("echo 'hi'"), "'echo '\\''hi'\\'''");
    assert_eq!(with_privilege("ls", Privilege::User), "ls");
    assert_eq!(with_privilege("apt update", Privilege::Root), "sudo sh -c 'apt update'");

    let t = SshTransport::new("ubuntu", "10.0.0.1").with_key_path("/tmp/k.pem");
    let args = t.ssh_args("uptime", Privilege::User);
    assert_eq!(
        args,
        vec![
            "-o",
            "LogLevel=ERROR",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "StrictHostKeyChecking=no",
            "-i",
            "/tmp/k.pem",
            "ubuntu@10.0.0.1",
            "uptime",
        ]
    );
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::transport::test_local_transport --exact --show-output
#[tokio::test]
async fn test_local_transport() {
    let _ = env_logger::builder().is_test(true).try_init();

    let t = LocalTransport::default();
    let (stdout, stderr) = t.execute("echo hello").await.unwrap();
    assert_eq!(stdout, "hello");
    assert!(stderr.is_empty());

    // exit status is ignored, stderr is not
    let err = t.execute("echo oops >&2").await.unwrap_err();
    assert_eq!(err.to_string(), "oops ( running: $ echo oops >&2 )");

    let (_, stderr) = t.execute_unchecked("echo v1.2 >&2").await.unwrap();
    assert_eq!(stderr, "v1.2");

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    std::fs::write(&src, "abc").unwrap();
    let dst = dir.path().join("b.txt");
    t.put(&src, &dst.display().to_string()).await.unwrap();
    assert_eq!(std::fs::read_to_string(&dst).unwrap(), "abc");
}
