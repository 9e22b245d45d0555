use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    remote::transport::Transport,
};

/// Lists every process with its full command line.
pub const PS_COMMAND: &str = "ps -aeo pid,command";

/// One row of "ps -aeo pid,command".
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Process {
    pub pid: u32,
    pub command: String,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pid, self.command)
    }
}

/// Parses the process table, skipping the header and blank lines.
/// A row whose first column is not a PID fails the whole parse.
pub fn parse(output: &str) -> Result<Vec<Process>> {
    let mut processes = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (pid, command) = match line.split_once(char::is_whitespace) {
            Some((p, c)) => (p, c.trim()),
            None => (line, ""),
        };
        if pid == "PID" {
            continue;
        }

        let pid = pid.parse::<u32>().map_err(|e| {
            Error::other(format!("unexpected process row '{line}' ({e})"))
        })?;
        processes.push(Process {
            pid,
            command: command.to_string(),
        });
    }
    Ok(processes)
}

/// Drops the rows that belong to whoever is looking: the given PIDs and the
/// listing command itself (plus any shell wrapping it).
pub fn excluding(processes: Vec<Process>, own_pids: &[u32]) -> Vec<Process> {
    processes
        .into_iter()
        .filter(|p| !own_pids.contains(&p.pid) && !p.command.contains(PS_COMMAND))
        .collect()
}

/// Lists the processes on the transport's host, minus the caller's own.
pub async fn list<T: Transport>(transport: &T) -> Result<Vec<Process>> {
    let (table, _) = transport.execute(PS_COMMAND).await?;
    let own_pids = transport.own_pids().await?;
    Ok(excluding(parse(&table)?, &own_pids))
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::ps::test_parse --exact --show-output
#[test]
fn test_parse() {
    let output = "    PID COMMAND
      1 /sbin/init
    412 /lib/systemd/systemd-journald
   8821 SCREEN -dmS ticker bash -c while true; do date; sleep 2; done
  10234 ps -aeo pid,command
";
    let processes = parse(output).unwrap();
    assert_eq!(processes.len(), 4);
    assert_eq!(
        processes[0],
        Process {
            pid: 1,
            command: String::from("/sbin/init")
        }
    );
    assert_eq!(
        processes[2].command,
        "SCREEN -dmS ticker bash -c while true; do date; sleep 2; done"
    );
    assert_eq!(processes[3].to_string(), "10234 ps -aeo pid,command");

    assert!(parse("").unwrap().is_empty());
    assert!(parse("    PID COMMAND\n  abc /bin/sh\n").is_err());
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::ps::test_excluding --exact --show-output
#[test]
fn test_excluding() {
    let output = "    PID COMMAND
      1 /sbin/init
   4100 bash
   4121 remote-ops kill --local --pattern ticker.py
   4130 sh -c ps -aeo pid,command
   4131 ps -aeo pid,command
   8821 python3 ticker.py
";
    let others = excluding(parse(output).unwrap(), &[4121, 4100]);
    assert_eq!(
        others,
        vec![
            Process {
                pid: 1,
                command: String::from("/sbin/init")
            },
            Process {
                pid: 8821,
                command: String::from("python3 ticker.py")
            },
        ]
    );
}
