mod apply;
mod clean_up;
mod default_spec;
mod delete;
mod list;

use clap::{crate_version, Command};

const APP_NAME: &str = "infraup-aws";

/// Should be able to run with idempotency
/// (e.g., re-running "apply" reuses the live instance of the same name)
#[tokio::main]
async fn main() {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Single-host EC2/EBS/S3 provisioning on AWS")
        .subcommands(vec![
            default_spec::command(),
            apply::command(),
            delete::command(),
            clean_up::command(),
            list::command(),
        ])
        .get_matches();

    match matches.subcommand() {
        Some((default_spec::NAME, sub_matches)) => {
            let s = sub_matches
                .get_one::<String>("CORS_ALLOWED_ORIGINS")
                .unwrap_or(&String::new())
                .clone();
            let mut cors_allowed_origins: Vec<String> = Vec::new();
            for origin in s.split(',') {
                let trimmed = origin.trim().to_string();
                if !trimmed.is_empty() {
                    cors_allowed_origins.push(trimmed);
                }
            }

            let opts = infra_ops::spec::DefaultSpecOption {
                region: sub_matches.get_one::<String>("REGION").unwrap().clone(),

                instance_name: sub_matches
                    .get_one::<String>("INSTANCE_NAME")
                    .unwrap_or(&String::new())
                    .clone(),
                instance_type: sub_matches
                    .get_one::<String>("INSTANCE_TYPE")
                    .unwrap()
                    .clone(),
                image_id: sub_matches.get_one::<String>("IMAGE_ID").unwrap().clone(),
                zone: sub_matches
                    .get_one::<String>("ZONE")
                    .unwrap_or(&String::new())
                    .clone(),
                key_name: sub_matches.get_one::<String>("KEY_NAME").unwrap().clone(),
                security_group_id: sub_matches
                    .get_one::<String>("SECURITY_GROUP_ID")
                    .unwrap()
                    .clone(),
                disk_size_in_gb: *sub_matches
                    .get_one::<i32>("DISK_SIZE_IN_GB")
                    .unwrap_or(&infra_ops::spec::DEFAULT_DISK_SIZE_IN_GB),
                termination_protection: !sub_matches
                    .get_flag("DISABLE_TERMINATION_PROTECTION"),

                bucket_name: sub_matches
                    .get_one::<String>("BUCKET_NAME")
                    .unwrap_or(&String::new())
                    .clone(),
                cors_allowed_origins,

                ssh_user: sub_matches.get_one::<String>("SSH_USER").unwrap().clone(),
                ssh_key_path: sub_matches
                    .get_one::<String>("SSH_KEY_PATH")
                    .unwrap_or(&String::new())
                    .clone(),

                spec_file_path: sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
            };
            default_spec::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                opts,
            )
            .expect("failed to execute 'default-spec'");
        }

        Some((apply::NAME, sub_matches)) => {
            apply::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap()
                    .clone(),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await
            .expect("failed to execute 'apply'");
        }

        Some((delete::NAME, sub_matches)) => {
            delete::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap()
                    .clone(),
                sub_matches.get_flag("DELETE_S3_BUCKET"),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await
            .expect("failed to execute 'delete'");
        }

        Some((clean_up::NAME, sub_matches)) => {
            clean_up::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches.get_one::<String>("REGION").unwrap().clone(),
                &sub_matches.get_one::<String>("PREFIX").unwrap().clone(),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await
            .expect("failed to execute 'clean-up'");
        }

        Some((list::NAME, sub_matches)) => {
            list::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches.get_one::<String>("REGION").unwrap().clone(),
                &sub_matches.get_one::<String>("KIND").unwrap().clone(),
                &sub_matches
                    .get_one::<String>("NAME")
                    .unwrap_or(&String::new())
                    .clone(),
                sub_matches.get_flag("CONTAINS"),
            )
            .await
            .expect("failed to execute 'list'");
        }

        _ => unreachable!("unknown subcommand"),
    }
}
