use std::io::{self, stdout};

use clap::Command;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::remote::{registry::SessionRegistry, transport::Transport};

use crate::target::{self, Target};

pub const NAME: &str = "screens";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME).about("Lists detached screen sessions with the command each one runs"),
    )
}

pub async fn execute(log_level: &str, target: &Target) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let sessions = SessionRegistry::new(target).list_sessions().await?;
    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!(
            "\n{} session(s) on {}\n",
            sessions.len(),
            target.target()
        )),
        ResetColor
    )?;
    for s in sessions.iter() {
        println!("{}", s);
    }

    Ok(())
}
