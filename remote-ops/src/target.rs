use std::{path::Path, time::Duration};

use clap::{value_parser, Arg, ArgMatches, Command};
use infra_ops::{
    errors::Result,
    remote::transport::{CommandOutput, LocalTransport, Privilege, SshTransport, Transport},
    spec::{DEFAULT_SSH_TIMEOUT_SECONDS, DEFAULT_SSH_USER},
};

/// Where commands run: a remote host over SSH, or this machine.
pub enum Target {
    Ssh(SshTransport),
    Local(LocalTransport),
}

impl Transport for Target {
    fn target(&self) -> String {
        match self {
            Target::Ssh(t) => t.target(),
            Target::Local(t) => t.target(),
        }
    }

    async fn invoke(&self, command: &str, privilege: Privilege) -> Result<CommandOutput> {
        match self {
            Target::Ssh(t) => t.invoke(command, privilege).await,
            Target::Local(t) => t.invoke(command, privilege).await,
        }
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        match self {
            Target::Ssh(t) => t.put(local, remote).await,
            Target::Local(t) => t.put(local, remote).await,
        }
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        match self {
            Target::Ssh(t) => t.get(remote, local).await,
            Target::Local(t) => t.get(remote, local).await,
        }
    }

    async fn own_pids(&self) -> Result<Vec<u32>> {
        match self {
            Target::Ssh(t) => t.own_pids().await,
            Target::Local(t) => t.own_pids().await,
        }
    }
}

/// Adds the log level and connection flags shared by every subcommand.
pub fn with_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("LOG_LEVEL")
            .long("log-level")
            .short('l')
            .help("Sets the log level")
            .required(false)
            .num_args(1)
            .value_parser(["debug", "info"])
            .default_value("info"),
    )
    .arg(
        Arg::new("HOST")
            .long("host")
            .help("Sets the host (public IPv4 or DNS name) to SSH into")
            .required_unless_present("LOCAL")
            .num_args(1),
    )
    .arg(
        Arg::new("LOCAL")
            .long("local")
            .help("Runs on this machine instead of over SSH")
            .required(false)
            .num_args(0)
            .conflicts_with("HOST"),
    )
    .arg(
        Arg::new("USER")
            .long("user")
            .short('u')
            .help("Sets the SSH login user")
            .required(false)
            .num_args(1)
            .default_value(DEFAULT_SSH_USER),
    )
    .arg(
        Arg::new("KEY_PATH")
            .long("key-path")
            .short('i')
            .help("Sets the SSH private key path")
            .required(false)
            .num_args(1),
    )
    .arg(
        Arg::new("TIMEOUT_SECONDS")
            .long("timeout-seconds")
            .help("Sets the per-command timeout")
            .required(false)
            .num_args(1)
            .value_parser(value_parser!(u64))
            .default_value("60"),
    )
}

pub fn log_level(matches: &ArgMatches) -> String {
    matches
        .get_one::<String>("LOG_LEVEL")
        .unwrap_or(&String::from("info"))
        .clone()
}

pub fn from_matches(matches: &ArgMatches) -> Target {
    let timeout = Duration::from_secs(
        *matches
            .get_one::<u64>("TIMEOUT_SECONDS")
            .unwrap_or(&DEFAULT_SSH_TIMEOUT_SECONDS),
    );
    if matches.get_flag("LOCAL") {
        return Target::Local(LocalTransport { timeout });
    }

    let user = matches.get_one::<String>("USER").unwrap();
    let host = matches.get_one::<String>("HOST").unwrap();
    let mut t = SshTransport::new(user, host).with_timeout(timeout);
    if let Some(key_path) = matches.get_one::<String>("KEY_PATH") {
        t = t.with_key_path(key_path);
    }
    Target::Ssh(t)
}

/// RUST_LOG=debug cargo test --package remote-ops --bin remote-ops -- target::test_from_matches --exact --show-output
#[test]
fn test_from_matches() {
    let cmd = with_args(Command::new("test"));

    let matches = cmd
        .clone()
        .try_get_matches_from(["test", "--host", "10.0.0.1", "-i", "/tmp/k.pem"])
        .unwrap();
    match from_matches(&matches) {
        Target::Ssh(t) => {
            assert_eq!(t.target(), "ubuntu@10.0.0.1");
            assert_eq!(t.key_path, Some(std::path::PathBuf::from("/tmp/k.pem")));
            assert_eq!(t.timeout, Duration::from_secs(60));
        }
        Target::Local(_) => panic!("expected ssh target"),
    }
    assert_eq!(log_level(&matches), "info");

    let matches = cmd
        .clone()
        .try_get_matches_from(["test", "--local", "--timeout-seconds", "5"])
        .unwrap();
    match from_matches(&matches) {
        Target::Local(t) => assert_eq!(t.timeout, Duration::from_secs(5)),
        Target::Ssh(_) => panic!("expected local target"),
    }

    // one of the two is required, never both
    assert!(cmd.clone().try_get_matches_from(["test"]).is_err());
    assert!(cmd
        .try_get_matches_from(["test", "--local", "--host", "10.0.0.1"])
        .is_err());
}
