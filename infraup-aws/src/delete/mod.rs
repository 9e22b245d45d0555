use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use infra_ops::{
    aws::Aws,
    cloud::{Buckets, Filter, Lister},
    provision::Provisioner,
    spec::Spec,
};

pub const NAME: &str = "delete";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Deletes resources based on configuration")
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
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The spec file to load")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("SKIP_PROMPT")
                .long("skip-prompt")
                .help("Skips prompt mode")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("DELETE_S3_BUCKET")
                .long("delete-s3-bucket")
                .help("Enables delete S3 bucket (use with caution!)")
                .required(false)
                .num_args(0),
        )
}

pub async fn execute(
    log_level: &str,
    spec_file_path: &str,
    delete_s3_bucket: bool,
    skip_prompt: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let spec = Spec::load(spec_file_path)?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nLoaded configuration: '{}'\n", spec_file_path)),
        ResetColor
    )?;
    let spec_contents = spec.encode_yaml()?;
    println!("{}\n", spec_contents);

    if !skip_prompt {
        let options = &[
            "No, I am not ready to delete resources!",
            "Yes, let's delete resources!",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'delete' option")
            .items(&options[..])
            .default(0)
            .interact()
            .unwrap();
        if selected == 0 {
            return Ok(());
        }
    }

    let aws = Aws::load(&spec.region).await;
    let provisioner = Provisioner::new(&aws, spec.reconcile.policy());

    execute!(
        stdout(),
        SetForegroundColor(Color::Red),
        Print("\n\n\nSTEP: delete EC2 instance\n"),
        ResetColor
    )?;
    match provisioner.find_live(&spec.instance.name).await? {
        Some(instance) => {
            provisioner
                .set_termination_protection(&instance.instance_id, false)
                .await?;
            let terminated = provisioner
                .terminate_instance(&instance.instance_id)
                .await?;
            log::info!(
                "instance {} reached '{}' after {} poll(s)",
                terminated.id,
                terminated.observed_state,
                terminated.attempts
            );
        }
        None => log::info!("instance '{}' does not exist; skipping", spec.instance.name),
    }

    if delete_s3_bucket {
        if let Some(bucket) = &spec.bucket {
            execute!(
                stdout(),
                SetForegroundColor(Color::Red),
                Print("\n\n\nSTEP: delete S3 bucket\n"),
                ResetColor
            )?;
            let existing = Buckets::new(&aws)
                .list(&Filter::by_name(&bucket.name))
                .await?;
            if existing.is_empty() {
                log::info!("bucket '{}' does not exist; skipping", bucket.name);
            } else {
                provisioner.delete_bucket(&bucket.name).await?;
            }
        }
    }

    println!();
    log::info!("delete all success!");
    Ok(())
}
