use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::remote::{registry::SessionRegistry, transport::Transport};

use crate::target::{self, Target};

pub const NAME: &str = "ps";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Lists running processes")
            .arg(
                Arg::new("PATTERN")
                    .long("pattern")
                    .short('p')
                    .help("Lists only processes whose command contains the pattern")
                    .required(false)
                    .num_args(1),
            ),
    )
}

pub async fn execute(log_level: &str, target: &Target, pattern: &str) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let processes: Vec<_> = SessionRegistry::new(target)
        .ps()
        .await?
        .into_iter()
        .filter(|p| p.command.contains(pattern))
        .collect();

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!(
            "\n{} process(es) on {}\n",
            processes.len(),
            target.target()
        )),
        ResetColor
    )?;
    for p in processes.iter() {
        println!("{}", p);
    }

    Ok(())
}
