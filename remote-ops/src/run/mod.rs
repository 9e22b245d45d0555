use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::remote::transport::Transport;

use crate::target::{self, Target};

pub const NAME: &str = "run";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Runs one command, failing when it writes to stderr")
            .arg(
                Arg::new("COMMAND")
                    .long("command")
                    .short('c')
                    .help("Sets the shell command to run")
                    .required(true)
                    .num_args(1),
            )
            .arg(
                Arg::new("SUDO")
                    .long("sudo")
                    .help("Runs the command as root")
                    .required(false)
                    .num_args(0),
            ),
    )
}

pub async fn execute(log_level: &str, target: &Target, cmd: &str, sudo: bool) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!("\n$ {} ({})\n", cmd, target.target())),
        ResetColor
    )?;
    let (output, _) = if sudo {
        target.sudo(cmd).await?
    } else {
        target.execute(cmd).await?
    };
    println!("{}", output);

    Ok(())
}
