use std::io::{self, stdout};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::spec::{self, DefaultSpecOption, Spec};

pub const NAME: &str = "default-spec";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Writes a default configuration")
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
            Arg::new("INSTANCE_NAME")
                .long("instance-name")
                .help("Sets the instance 'Name' tag (defaults to the spec ID)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("INSTANCE_TYPE")
                .long("instance-type")
                .help("Sets the EC2 instance type")
                .required(false)
                .num_args(1)
                .default_value(spec::DEFAULT_INSTANCE_TYPE),
        )
        .arg(
            Arg::new("IMAGE_ID")
                .long("image-id")
                .help("Sets the AMI to launch")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("ZONE")
                .long("zone")
                .help("Sets the availability zone (defaults to the 'a' zone of the region)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("KEY_NAME")
                .long("key-name")
                .help("Sets the EC2 key pair name")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("SECURITY_GROUP_ID")
                .long("security-group-id")
                .help("Sets the security group ID (comma-separated for more than one)")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("DISK_SIZE_IN_GB")
                .long("disk-size-in-gb")
                .help("Sets the root volume size")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(i32))
                .default_value("20"),
        )
        .arg(
            Arg::new("DISABLE_TERMINATION_PROTECTION")
                .long("disable-termination-protection")
                .help("Launches the instance without termination protection")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("BUCKET_NAME")
                .long("bucket-name")
                .help("Sets the S3 bucket to create along with the instance (skipped if empty)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("CORS_ALLOWED_ORIGINS")
                .long("cors-allowed-origins")
                .help("Comma-separated origins allowed to GET from the bucket")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("SSH_USER")
                .long("ssh-user")
                .help("Sets the SSH login user")
                .required(false)
                .num_args(1)
                .default_value(spec::DEFAULT_SSH_USER),
        )
        .arg(
            Arg::new("SSH_KEY_PATH")
                .long("ssh-key-path")
                .help("Sets the private key path matching the key pair")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The config file to create")
                .required(false)
                .num_args(1),
        )
}

pub fn execute(log_level: &str, opts: DefaultSpecOption) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let spec = Spec::default_aws(opts.clone());
    spec.validate()?;

    let spec_file_path = {
        if opts.spec_file_path.is_empty() {
            dir_manager::home::named(&spec.id, Some(".yaml"))
        } else {
            opts.spec_file_path
        }
    };
    spec.sync(&spec_file_path)?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nSaved spec: '{}'\n", spec_file_path)),
        ResetColor
    )?;
    let spec_contents = spec.encode_yaml()?;
    println!("{}", spec_contents);

    println!();
    println!("# run the following to create resources");
    execute!(
        stdout(),
        SetForegroundColor(Color::Magenta),
        Print(format!("vi {}\n\n", spec_file_path)),
        ResetColor
    )?;
    let exec_path = std::env::current_exe().expect("unexpected None current_exe");
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "{} apply \\\n--spec-file-path {}\n",
            exec_path.display(),
            spec_file_path
        )),
        ResetColor
    )?;
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

    Ok(())
}
