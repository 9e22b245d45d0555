//! Parsers and command builders for GNU "screen".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    cloud::Observed,
    errors::{Error, Result},
    remote::{ps::Process, transport::shell_escape},
};

pub const SCREEN_LIST: &str = "screen -ls";
pub const SCREEN_WIPE: &str = "screen -wipe";

/// Rendered in place of the command when no process matches the launch signature.
pub const UNKNOWN_COMMAND: &str = "???";

/// Observed state of a listed session.
pub const SESSION_RUNNING: &str = "running";

/// A detached session started by this crate (or by anyone else).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RemoteSession {
    /// "<pid>.<name>" as printed by "screen -ls".
    pub session_id: String,
    pub pid: u32,
    pub name: String,
    pub command: Option<String>,
}

impl RemoteSession {
    pub fn command_or_unknown(&self) -> &str {
        self.command.as_deref().unwrap_or(UNKNOWN_COMMAND)
    }
}

impl fmt::Display for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.session_id,
            self.name,
            self.command_or_unknown()
        )
    }
}

impl Observed for RemoteSession {
    fn id(&self) -> &str {
        &self.session_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn state(&self) -> &str {
        SESSION_RUNNING
    }
}

/// Session names are limited to "[A-Za-z0-9._-]", so they reach the shell
/// verbatim and come back unchanged in "<pid>.<name>".
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(Error::other(format!("invalid session name '{name}'")));
    }
    Ok(())
}

/// Builds the detached launch command. The name must pass [`validate_name`].
pub fn start_command(name: &str, command: &str, logfile: Option<&str>) -> String {
    match logfile {
        Some(f) => format!(
            "screen -dmS {name} -L -Logfile {} bash -c {}",
            shell_escape(f),
            shell_escape(command)
        ),
        None => format!("screen -dmS {name} bash -c {}", shell_escape(command)),
    }
}

/// Parses "screen -ls" into (session id, pid, name) triples.
pub fn parse_list(output: &str) -> Result<Vec<(String, u32, String)>> {
    let mut sessions = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("No Sockets")
            || line.starts_with("There is a screen")
            || line.starts_with("There are screens")
            || line.contains("Socket in")
            || line.contains("Sockets in")
        {
            continue;
        }

        let session_id = line.split('\t').next().unwrap_or(line).trim();
        let (pid, name) = session_id.split_once('.').ok_or_else(|| {
            Error::other(format!("unexpected screen session '{session_id}'"))
        })?;
        let pid = pid.parse::<u32>().map_err(|e| {
            Error::other(format!("unexpected screen session '{session_id}' ({e})"))
        })?;
        sessions.push((session_id.to_string(), pid, name.to_string()));
    }
    Ok(sessions)
}

/// Recovers the user command from the "SCREEN" process line, if it was
/// launched by [`start_command`] under this name. The result is trimmed, so
/// surrounding whitespace of the original command is not recovered.
pub fn launched_command(name: &str, process_command: &str) -> Option<String> {
    let rest = process_command.strip_prefix(&format!("SCREEN -dmS {name} "))?;
    let rest = match rest.strip_prefix("-L -Logfile ") {
        Some(r) => r.split_once(' ')?.1,
        None => rest,
    };
    let rest = rest.strip_prefix("bash -c")?;
    Some(rest.trim().to_string())
}

/// Joins the session list with the process table on pid.
pub fn join(listed: Vec<(String, u32, String)>, processes: &[Process]) -> Vec<RemoteSession> {
    listed
        .into_iter()
        .map(|(session_id, pid, name)| {
            let command = processes
                .iter()
                .filter(|p| p.pid == pid)
                .find_map(|p| launched_command(&name, &p.command));
            RemoteSession {
                session_id,
                pid,
                name,
                command,
            }
        })
        .collect()
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::screen::test_parse_list --exact --show-output
#[test]
fn test_parse_list() {
    let output = "There are screens on:
\t8821.ticker\t(10/18/2026 09:12:01 AM)\t(Detached)
\t9011.testing-4417201\t(10/18/2026 09:14:40 AM)\t(Detached)
2 Sockets in /run/screen/S-ubuntu.
";
    let listed = parse_list(output).unwrap();
    assert_eq!(
        listed,
        vec![
            (String::from("8821.ticker"), 8821, String::from("ticker")),
            (
                String::from("9011.testing-4417201"),
                9011,
                String::from("testing-4417201")
            ),
        ]
    );

    let output = "There is a screen on:
\t8821.web.server\t(Detached)
1 Socket in /run/screen/S-ubuntu.
";
    let listed = parse_list(output).unwrap();
    assert_eq!(listed[0].2, "web.server");

    assert!(parse_list("No Sockets found in /run/screen/S-ubuntu.\n")
        .unwrap()
        .is_empty());
    assert!(parse_list("garbage\n").is_err());
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::screen::test_join --exact --show-output
#[test]
fn test_join() {
    assert_eq!(
        start_command("ticker", "while true; do date; sleep 2; done", None),
        "screen -dmS ticker bash -c 'while true; do date; sleep 2; done'"
    );
    assert_eq!(
        start_command("ticker", "date", Some("ticker.screen.log")),
        "screen -dmS ticker -L -Logfile 'ticker.screen.log' bash -c 'date'"
    );
    assert_eq!(
        start_command("ticker", "date", Some("x;y")),
        "screen -dmS ticker -L -Logfile 'x;y' bash -c 'date'"
    );

    assert!(validate_name("testing-1").is_ok());
    assert!(validate_name("web.server_2").is_ok());
    for name in ["", "a;touch", "a b", "$HOME", "it's", "a/b"] {
        assert!(validate_name(name).is_err(), "{name}");
    }

    assert_eq!(
        launched_command("ticker", "SCREEN -dmS ticker bash -c date"),
        Some(String::from("date"))
    );
    assert_eq!(
        launched_command(
            "ticker",
            "SCREEN -dmS ticker -L -Logfile ticker.screen.log bash -c date"
        ),
        Some(String::from("date"))
    );
    assert_eq!(
        launched_command("ticker", "SCREEN -dmS ticker bash -c   date  "),
        Some(String::from("date"))
    );
    assert_eq!(launched_command("ticker", "SCREEN -dmS other bash -c date"), None);
    assert_eq!(launched_command("ticker", "SCREEN -S ticker"), None);

    let processes = vec![
        Process {
            pid: 8821,
            command: String::from("SCREEN -dmS ticker bash -c while true; do date; sleep 2; done"),
        },
        Process {
            pid: 8822,
            command: String::from("bash -c while true; do date; sleep 2; done"),
        },
        Process {
            pid: 9011,
            command: String::from("SCREEN -S manual"),
        },
    ];
    let sessions = join(
        vec![
            (String::from("8821.ticker"), 8821, String::from("ticker")),
            (String::from("9011.manual"), 9011, String::from("manual")),
        ],
        &processes,
    );
    assert_eq!(
        sessions[0].command.as_deref(),
        Some("while true; do date; sleep 2; done")
    );
    assert_eq!(sessions[1].command, None);
    assert_eq!(sessions[1].command_or_unknown(), "???");
    assert_eq!(sessions[1].to_string(), "9011.manual\tmanual\t???");
}
