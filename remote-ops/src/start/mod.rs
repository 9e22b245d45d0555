use std::{
    io::{self, stdout},
    time::Duration,
};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::{
    reconcile::Reconciler,
    remote::{registry::SessionRegistry, transport::Transport},
};

use crate::target::{self, Target};

pub const NAME: &str = "start";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Starts a command in a detached screen session and waits until it is listed")
            .arg(
                Arg::new("NAME")
                    .long("name")
                    .short('n')
                    .help("Sets the session name")
                    .required(true)
                    .num_args(1),
            )
            .arg(
                Arg::new("COMMAND")
                    .long("command")
                    .short('c')
                    .help("Sets the command to run inside the session")
                    .required(true)
                    .num_args(1),
            )
            .arg(
                Arg::new("LOGFILE")
                    .long("logfile")
                    .help("Logs the session output to this file (defaults to '<name>.screen.log')")
                    .required(false)
                    .num_args(1),
            )
            .arg(
                Arg::new("WAIT_SECONDS")
                    .long("wait-seconds")
                    .help("Sets how long to wait for the session to show up")
                    .required(false)
                    .num_args(1)
                    .value_parser(value_parser!(u64))
                    .default_value("30"),
            ),
    )
}

pub async fn execute(
    log_level: &str,
    target: &Target,
    name: &str,
    cmd: &str,
    logfile: Option<String>,
    wait_seconds: u64,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let logfile = logfile.unwrap_or_else(|| format!("{}.screen.log", name));
    let registry = SessionRegistry::new(target);

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "\n\n\nSTEP: start session '{}' on {}\n",
            name,
            target.target()
        )),
        ResetColor
    )?;
    registry.start(name, cmd, Some(&logfile)).await?;

    let reconciler =
        Reconciler::with_timeout(Duration::from_secs(wait_seconds), Duration::from_secs(1));
    let session = registry.wait_running(name, &reconciler).await?;
    log::info!(
        "session '{}' is {} after {} poll(s)",
        session.id,
        session.observed_state,
        session.attempts
    );
    println!("{}", session.into_record()?);

    Ok(())
}
