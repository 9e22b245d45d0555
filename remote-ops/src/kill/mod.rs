use std::io::{self, stdout, Error, ErrorKind};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use infra_ops::remote::{
    registry::{KillTarget, SessionRegistry},
    transport::Transport,
};

use crate::target::{self, Target};

pub const NAME: &str = "kill";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Sends SIGKILL to one process, by PID or by a unique command pattern")
            .arg(
                Arg::new("PID")
                    .long("pid")
                    .help("Sets the process ID to kill")
                    .required_unless_present("PATTERN")
                    .num_args(1)
                    .value_parser(value_parser!(u32))
                    .conflicts_with("PATTERN"),
            )
            .arg(
                Arg::new("PATTERN")
                    .long("pattern")
                    .short('p')
                    .help("Kills the only process whose command contains the pattern")
                    .required(false)
                    .num_args(1),
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
    pid: Option<u32>,
    pattern: Option<String>,
    skip_prompt: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let kill_target = match (pid, pattern) {
        (Some(pid), _) => KillTarget::Pid(pid),
        (None, Some(pattern)) => KillTarget::Pattern(pattern),
        (None, None) => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "either '--pid' or '--pattern' must be set",
            ))
        }
    };

    if !skip_prompt {
        let options = &[
            "No, I am not ready to kill this process!",
            "Yes, let's kill this process!",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Select your 'kill' option ({:?} on {})",
                kill_target,
                target.target()
            ))
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
        Print(format!("\n\n\nSTEP: kill {:?}\n", kill_target)),
        ResetColor
    )?;
    let output = SessionRegistry::new(target).kill(kill_target).await?;
    if !output.is_empty() {
        println!("{}", output);
    }

    Ok(())
}
