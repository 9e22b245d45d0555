use std::{
    env,
    io::{self, stdout},
};

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

pub const NAME: &str = "apply";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Applies/creates resources based on configuration")
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
}

pub async fn execute(log_level: &str, spec_file_path: &str, skip_prompt: bool) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let spec = Spec::load(spec_file_path)?;
    spec.validate()?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nLoaded Spec: '{}'\n", spec_file_path)),
        ResetColor
    )?;
    let spec_contents = spec.encode_yaml()?;
    println!("{}\n", spec_contents);

    if !skip_prompt {
        let options = &[
            "No, I am not ready to create resources.",
            "Yes, let's create resources.",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'apply' option")
            .items(&options[..])
            .default(0)
            .interact()
            .unwrap();
        if selected == 0 {
            return Ok(());
        }
    }

    log::info!("creating resources (with spec path {})", spec_file_path);
    let aws = Aws::load(&spec.region).await;
    let provisioner = Provisioner::new(&aws, spec.reconcile.policy());

    if let Some(bucket) = &spec.bucket {
        execute!(
            stdout(),
            SetForegroundColor(Color::Green),
            Print("\n\n\nSTEP: create S3 bucket\n"),
            ResetColor
        )?;
        let existing = Buckets::new(&aws)
            .list(&Filter::by_name(&bucket.name))
            .await?;
        if existing.is_empty() {
            let created = provisioner.create_bucket(bucket).await?;
            log::info!("created bucket {}", created.name);
        } else {
            log::info!("bucket '{}' already exists; skipping", bucket.name);
        }
    }

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print("\n\n\nSTEP: create EC2 instance\n"),
        ResetColor
    )?;
    let instance = provisioner.ensure_instance(&spec.instance).await?;
    println!("{}", serde_yaml::to_string(&instance).unwrap());

    let key_path = if spec.ssh.key_path.is_empty() {
        format!("{}.pem", spec.instance.key_name)
    } else {
        spec.ssh.key_path.clone()
    };
    let user = &spec.ssh.user;
    let ip = &instance.public_ip;

    // ssh -o "StrictHostKeyChecking no" -i [key path] [user name]@[public IPv4]
    println!(
        "
# change SSH key permission
chmod 400 {key_path}
# instance '{}' ({}, {})
ssh -o \"StrictHostKeyChecking no\" -i {key_path} {user}@{ip}
# download to local machine
scp -i {key_path} {user}@{ip}:REMOTE_FILE_PATH LOCAL_FILE_PATH
scp -i {key_path} -r {user}@{ip}:REMOTE_DIRECTORY_PATH LOCAL_DIRECTORY_PATH
# upload to remote machine
scp -i {key_path} LOCAL_FILE_PATH {user}@{ip}:REMOTE_FILE_PATH
scp -i {key_path} -r LOCAL_DIRECTORY_PATH {user}@{ip}:REMOTE_DIRECTORY_PATH
",
        instance.name, instance.instance_id, instance.zone,
    );

    let exec_path = env::current_exe().expect("unexpected None current_exe");
    println!();
    println!("# run the following to delete resources");
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "{} delete \\\n--delete-s3-bucket \\\n--spec-file-path {}\n\n",
            exec_path.display(),
            spec_file_path
        )),
        ResetColor
    )?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print("\n\n\nSTEP: apply complete\n"),
        ResetColor
    )?;
    Ok(())
}
