use std::io::{self, Error, ErrorKind};

use clap::Command;

use crate::target::{self, Target};

pub const NAME: &str = "shell";

pub fn command() -> Command {
    target::with_args(Command::new(NAME).about("Opens an interactive SSH session on the host"))
}

pub async fn execute(log_level: &str, target: &Target) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    match target {
        Target::Ssh(t) => {
            t.open_session().await?;
            Ok(())
        }
        Target::Local(_) => Err(Error::new(
            ErrorKind::InvalidInput,
            "'shell' needs '--host'; use your own terminal for this machine",
        )),
    }
}
