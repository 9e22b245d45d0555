use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::{host::Host, remote::transport::Transport};

use crate::target::{self, Target};

pub const NAME: &str = "inspect";

pub fn command() -> Command {
    target::with_args(
        Command::new(NAME)
            .about("Prints the operating system, tool versions and firewall status of a host")
            .arg(
                Arg::new("PROCESS")
                    .long("process")
                    .short('p')
                    .help("Also reports whether a process with this name is running")
                    .required(false)
                    .num_args(1),
            ),
    )
}

pub async fn execute(log_level: &str, target: &Target, process: &str) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let host = Host::new(target);
    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nHost: {}\n", target.target())),
        ResetColor
    )?;
    println!("os:       {}", host.operating_system().await?);
    println!("python:   {}", host.python_version().await?);
    println!("pip:      {}", host.pip_version().await?);
    println!("git:      {}", host.git_version().await?);
    println!("nginx:    {}", host.nginx_version().await?);
    println!("firewall: {}", host.firewall_status().await?);

    if !process.is_empty() {
        match host.running_process_id(process).await? {
            Some(pid) => println!("process '{}' is running (pid {})", process, pid),
            None => println!("process '{}' is not running", process),
        }
    }

    Ok(())
}
