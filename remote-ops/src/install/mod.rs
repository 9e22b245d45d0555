use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::{host::Host, remote::transport::Transport};

use crate::target::{self, Target};

pub const NAME: &str = "install";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Installs apt and pip packages that are not installed yet")
            .arg(
                Arg::new("APT_PACKAGES")
                    .long("apt-packages")
                    .help("Comma-separated apt packages")
                    .required(false)
                    .num_args(1),
            )
            .arg(
                Arg::new("PIP_PACKAGES")
                    .long("pip-packages")
                    .help("Comma-separated pip packages (e.g., requests==2.31.0)")
                    .required(false)
                    .num_args(1),
            )
            .arg(
                Arg::new("FORCE")
                    .long("force")
                    .help("Reinstalls packages that are already installed")
                    .required(false)
                    .num_args(0),
            ),
    )
}

fn split(s: &str) -> Vec<&str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect()
}

pub async fn execute(
    log_level: &str,
    target: &Target,
    apt_packages: &str,
    pip_packages: &str,
    force: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let host = Host::new(target);

    let apt = split(apt_packages);
    if !apt.is_empty() {
        execute!(
            stdout(),
            SetForegroundColor(Color::Green),
            Print(format!(
                "\n\n\nSTEP: install apt packages on {}\n",
                target.target()
            )),
            ResetColor
        )?;
        host.update_apt_packages().await?;
        host.install_apt_packages(&apt, force).await?;
    }

    let pip = split(pip_packages);
    if !pip.is_empty() {
        execute!(
            stdout(),
            SetForegroundColor(Color::Green),
            Print(format!(
                "\n\n\nSTEP: install pip packages on {}\n",
                target.target()
            )),
            ResetColor
        )?;
        host.install_pip_packages(&pip, force).await?;
    }

    Ok(())
}
