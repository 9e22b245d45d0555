use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use infra_ops::{
    aws::Aws,
    cloud::{Filter, Instances, Lister, STATE_TERMINATED},
    provision::{Provisioner, ReconcilePolicy, DEFAULT_CLEAN_UP_PREFIX},
    spec,
};

pub const NAME: &str = "clean-up";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Terminates every instance whose name starts with the prefix")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .arg(
            Arg::new("REGION")
                .long("region")
                .short('r')
                .help("Sets the AWS region for API calls/endpoints")
                .required(true)
                .num_args(1)
                .default_value(spec::DEFAULT_REGION),
        )
        .arg(
            Arg::new("PREFIX")
                .long("prefix")
                .help("Sets the instance name prefix to clean up")
                .required(false)
                .num_args(1)
                .default_value(DEFAULT_CLEAN_UP_PREFIX),
        )
        .arg(
            Arg::new("SKIP_PROMPT")
                .long("skip-prompt")
                .help("Skips prompt mode")
                .required(false)
                .num_args(0),
        )
}

pub async fn execute(
    log_level: &str,
    region: &str,
    prefix: &str,
    skip_prompt: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let aws = Aws::load(region).await;
    let targets: Vec<_> = Instances::new(&aws)
        .list(&Filter::all())
        .await?
        .into_iter()
        .filter(|i| i.name.starts_with(prefix) && i.state != STATE_TERMINATED)
        .collect();
    if targets.is_empty() {
        log::info!("no instance with prefix '{}' in {}", prefix, region);
        return Ok(());
    }

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!(
            "\nFound {} instance(s) with prefix '{}'\n",
            targets.len(),
            prefix
        )),
        ResetColor
    )?;
    for i in targets.iter() {
        println!("{}\t{}\t{}\t{}", i.instance_id, i.name, i.state, i.public_ip);
    }
    println!();

    if !skip_prompt {
        let options = &[
            "No, I am not ready to terminate these instances!",
            "Yes, let's terminate these instances!",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'clean-up' option")
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
        Print("\n\n\nSTEP: terminate instances\n"),
        ResetColor
    )?;
    let terminated = Provisioner::new(&aws, ReconcilePolicy::default())
        .clean_up(prefix)
        .await?;
    log::info!("terminated {} instance(s): {:?}", terminated.len(), terminated);

    Ok(())
}
