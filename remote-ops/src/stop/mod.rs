use std::{
    io::{self, stdout},
    time::Duration,
};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use infra_ops::remote::{registry::SessionRegistry, transport::Transport};

use crate::target::{self, Target};

pub const NAME: &str = "stop";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Stops every screen session matching the name")
            .arg(
                Arg::new("NAME")
                    .long("name")
                    .short('n')
                    .help("Sets the session name to stop")
                    .required(true)
                    .num_args(1),
            )
            .arg(
                Arg::new("EXACT")
                    .long("exact")
                    .help("Stops only sessions named exactly '--name' (default matches substrings)")
                    .required(false)
                    .num_args(0),
            )
            .arg(
                Arg::new("STOP_TIMEOUT_SECONDS")
                    .long("stop-timeout-seconds")
                    .help("Sets how long to keep killing matching sessions")
                    .required(false)
                    .num_args(1)
                    .value_parser(value_parser!(u64))
                    .default_value("10"),
            )
            .arg(
                Arg::new("SKIP_PROMPT")
                    .long("skip-prompt")
                    .help("Skips prompt mode")
                    .required(false)
                    .num_args(0),
            ),
    )
}

pub async fn execute(
    log_level: &str,
    target: &Target,
    name: &str,
    exact: bool,
    stop_timeout_seconds: u64,
    skip_prompt: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let registry = SessionRegistry::new(target)
        .with_stop_timeout(Duration::from_secs(stop_timeout_seconds));
    let matching = registry.find(name, exact).await?;
    if matching.is_empty() {
        log::info!("no session matches '{}' on {}", name, target.target());
        return Ok(());
    }

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\n{} session(s) to stop\n", matching.len())),
        ResetColor
    )?;
    for s in matching.iter() {
        println!("{}", s);
    }
    println!();

    if !skip_prompt {
        let options = &[
            "No, I am not ready to stop these sessions!",
            "Yes, let's stop these sessions!",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'stop' option")
            .items(&options[..])
            .default(0)
            .interact()
            .unwrap();
        if selected == 0 {
            return Ok(());
        }
    }

    execute!(
        stdout(),
        SetForegroundColor(Color::Red),
        Print("\n\n\nSTEP: stop sessions\n"),
        ResetColor
    )?;
    registry.stop(name, exact).await?;
    log::info!("stopped all sessions matching '{}'", name);

    Ok(())
}
