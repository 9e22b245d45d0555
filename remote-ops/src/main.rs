mod inspect;
mod install;
mod kill;
mod ps;
mod run;
mod screens;
mod shell;
mod start;
mod stop;
mod target;

use clap::{crate_version, Command};

const APP_NAME: &str = "remote-ops";

#[tokio::main]
async fn main() {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Runs commands and manages detached screen sessions on a host")
        .subcommands(vec![
            run::command(),
            ps::command(),
            screens::command(),
            start::command(),
            stop::command(),
            kill::command(),
            inspect::command(),
            install::command(),
            shell::command(),
        ])
        .get_matches();

    match matches.subcommand() {
        Some((run::NAME, sub_matches)) => {
            run::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches.get_one::<String>("COMMAND").unwrap().clone(),
                sub_matches.get_flag("SUDO"),
            )
            .await
            .expect("failed to execute 'run'");
        }

        Some((ps::NAME, sub_matches)) => {
            ps::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches
                    .get_one::<String>("PATTERN")
                    .unwrap_or(&String::new())
                    .clone(),
            )
            .await
            .expect("failed to execute 'ps'");
        }

        Some((screens::NAME, sub_matches)) => {
            screens::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
            )
            .await
            .expect("failed to execute 'screens'");
        }

        Some((start::NAME, sub_matches)) => {
            start::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches.get_one::<String>("NAME").unwrap().clone(),
                &sub_matches.get_one::<String>("COMMAND").unwrap().clone(),
                sub_matches.get_one::<String>("LOGFILE").cloned(),
                *sub_matches.get_one::<u64>("WAIT_SECONDS").unwrap_or(&30),
            )
            .await
            .expect("failed to execute 'start'");
        }

        Some((stop::NAME, sub_matches)) => {
            stop::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches.get_one::<String>("NAME").unwrap().clone(),
                sub_matches.get_flag("EXACT"),
                *sub_matches
                    .get_one::<u64>("STOP_TIMEOUT_SECONDS")
                    .unwrap_or(&infra_ops::spec::DEFAULT_SESSION_STOP_TIMEOUT_SECONDS),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await
            .expect("failed to execute 'stop'");
        }

        Some((kill::NAME, sub_matches)) => {
            kill::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                sub_matches.get_one::<u32>("PID").copied(),
                sub_matches.get_one::<String>("PATTERN").cloned(),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await
            .expect("failed to execute 'kill'");
        }

        Some((inspect::NAME, sub_matches)) => {
            inspect::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches
                    .get_one::<String>("PROCESS")
                    .unwrap_or(&String::new())
                    .clone(),
            )
            .await
            .expect("failed to execute 'inspect'");
        }

        Some((install::NAME, sub_matches)) => {
            install::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
                &sub_matches
                    .get_one::<String>("APT_PACKAGES")
                    .unwrap_or(&String::new())
                    .clone(),
                &sub_matches
                    .get_one::<String>("PIP_PACKAGES")
                    .unwrap_or(&String::new())
                    .clone(),
                sub_matches.get_flag("FORCE"),
            )
            .await
            .expect("failed to execute 'install'");
        }

        Some((shell::NAME, sub_matches)) => {
            shell::execute(
                &target::log_level(sub_matches),
                &target::from_matches(sub_matches),
            )
            .await
            .expect("failed to execute 'shell'");
        }

        _ => unreachable!("unknown subcommand"),
    }
}
