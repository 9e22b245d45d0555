use std::io::{self, stdout};

use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use infra_ops::{
    aws::Aws,
    cloud::{Buckets, Filter, Instances, Lister, Volumes},
    spec,
};
use serde::Serialize;

pub const NAME: &str = "list";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Lists instances, volumes or buckets with their observed state")
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
            Arg::new("KIND")
                .long("kind")
                .short('k')
                .help("Sets the resource kind to list")
                .required(false)
                .num_args(1)
                .value_parser(["instances", "volumes", "buckets"])
                .default_value("instances"),
        )
        .arg(
            Arg::new("NAME")
                .long("name")
                .short('n')
                .help("Lists only resources with this name")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("CONTAINS")
                .long("contains")
                .help("Matches names containing '--name' instead of equal to it")
                .required(false)
                .num_args(0),
        )
}

pub async fn execute(
    log_level: &str,
    region: &str,
    kind: &str,
    name: &str,
    contains: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let filter = if name.is_empty() {
        Filter::all()
    } else if contains {
        Filter::name_containing(name)
    } else {
        Filter::by_name(name)
    };

    let aws = Aws::load(region).await;
    match kind {
        "volumes" => print_records(kind, &filter, Volumes::new(&aws).list(&filter).await?),
        "buckets" => print_records(kind, &filter, Buckets::new(&aws).list(&filter).await?),
        _ => print_records(kind, &filter, Instances::new(&aws).list(&filter).await?),
    }
}

fn print_records<R: Serialize>(kind: &str, filter: &Filter, records: Vec<R>) -> io::Result<()> {
    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\n{} {} ({})\n", records.len(), kind, filter)),
        ResetColor
    )?;
    if records.is_empty() {
        return Ok(());
    }
    let contents = serde_yaml::to_string(&records)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("failed to encode {}", e)))?;
    println!("{}", contents);
    Ok(())
}
