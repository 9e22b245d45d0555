use std::{
    fs::{self, File},
    io::{self, Error, ErrorKind, Write},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    cloud::{BucketOptions, LaunchOptions},
    provision::ReconcilePolicy,
    reconcile::Reconciler,
};

pub const DEFAULT_REGION: &str = "us-east-2";
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";
pub const DEFAULT_DEVICE: &str = "/dev/sda1";
pub const DEFAULT_DISK_SIZE_IN_GB: i32 = 20;
pub const DEFAULT_SSH_USER: &str = "ubuntu";
pub const DEFAULT_SSH_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_SESSION_STOP_TIMEOUT_SECONDS: u64 = 10;

/// Operator configuration for one provisioned host (and optional bucket).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Spec {
    /// User-provided ID of this deployment.
    #[serde(default)]
    pub id: String,
    pub region: String,

    pub instance: LaunchOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<BucketOptions>,

    #[serde(default)]
    pub ssh: Ssh,
    #[serde(default)]
    pub reconcile: Reconcile,

    #[serde(default = "default_session_stop_timeout_seconds")]
    pub session_stop_timeout_seconds: u64,
}

fn default_session_stop_timeout_seconds() -> u64 {
    DEFAULT_SESSION_STOP_TIMEOUT_SECONDS
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Ssh {
    pub user: String,
    /// Private key matching the instance key name.
    #[serde(default)]
    pub key_path: String,
    pub timeout_seconds: u64,
}

impl Default for Ssh {
    fn default() -> Self {
        Self {
            user: String::from(DEFAULT_SSH_USER),
            key_path: String::new(),
            timeout_seconds: DEFAULT_SSH_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub struct Poll {
    pub poll_interval_seconds: u64,
    pub max_attempts: usize,
}

impl Poll {
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Duration::from_secs(self.poll_interval_seconds),
            self.max_attempts,
        )
    }
}

/// Poll budgets per asynchronous transition.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Reconcile {
    pub instance_start: Poll,
    pub instance_healthy: Poll,
    pub instance_terminate: Poll,
    pub volume_delete: Poll,
}

impl Default for Reconcile {
    fn default() -> Self {
        let poll = |max_attempts| Poll {
            poll_interval_seconds: 5,
            max_attempts,
        };
        Self {
            instance_start: poll(24),
            instance_healthy: poll(60),
            instance_terminate: poll(36),
            volume_delete: poll(12),
        }
    }
}

impl Reconcile {
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            instance_start: self.instance_start.reconciler(),
            instance_healthy: self.instance_healthy.reconciler(),
            instance_terminate: self.instance_terminate.reconciler(),
            volume_delete: self.volume_delete.reconciler(),
        }
    }
}

/// Defines "default-spec" option.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct DefaultSpecOption {
    pub region: String,

    /// Instance name; defaults to the spec ID.
    pub instance_name: String,
    pub instance_type: String,
    pub image_id: String,
    /// Defaults to the "a" zone of the region.
    pub zone: String,
    pub key_name: String,
    pub security_group_id: String,
    pub disk_size_in_gb: i32,
    pub termination_protection: bool,

    pub bucket_name: String,
    pub cors_allowed_origins: Vec<String>,

    pub ssh_user: String,
    pub ssh_key_path: String,

    pub spec_file_path: String,
}

impl Default for DefaultSpecOption {
    fn default() -> Self {
        Self {
            region: String::from(DEFAULT_REGION),
            instance_name: String::new(),
            instance_type: String::from(DEFAULT_INSTANCE_TYPE),
            image_id: String::new(),
            zone: String::new(),
            key_name: String::new(),
            security_group_id: String::new(),
            disk_size_in_gb: DEFAULT_DISK_SIZE_IN_GB,
            termination_protection: true,
            bucket_name: String::new(),
            cors_allowed_origins: Vec::new(),
            ssh_user: String::from(DEFAULT_SSH_USER),
            ssh_key_path: String::new(),
            spec_file_path: String::new(),
        }
    }
}

impl Spec {
    /// Creates a default spec.
    pub fn default_aws(opts: DefaultSpecOption) -> Self {
        let id = match Path::new(&opts.spec_file_path).file_stem() {
            Some(stem) if !opts.spec_file_path.is_empty() => stem.to_string_lossy().to_string(),
            _ => id_manager::time::with_prefix("infra"),
        };

        let name = if opts.instance_name.is_empty() {
            id.clone()
        } else {
            opts.instance_name.clone()
        };
        let zone = if opts.zone.is_empty() {
            format!("{}a", opts.region)
        } else {
            opts.zone.clone()
        };

        let bucket = if opts.bucket_name.is_empty() {
            None
        } else {
            Some(BucketOptions {
                name: opts.bucket_name.clone(),
                cors_allowed_origins: opts.cors_allowed_origins.clone(),
            })
        };

        Self {
            id,
            region: opts.region.clone(),
            instance: LaunchOptions {
                name,
                instance_type: opts.instance_type,
                image_id: opts.image_id,
                zone,
                key_name: opts.key_name,
                security_group_id: opts.security_group_id,
                device: String::from(DEFAULT_DEVICE),
                disk_size_in_gb: opts.disk_size_in_gb,
                delete_on_termination: true,
                termination_protection: opts.termination_protection,
            },
            bucket,
            ssh: Ssh {
                user: opts.ssh_user,
                key_path: opts.ssh_key_path,
                timeout_seconds: DEFAULT_SSH_TIMEOUT_SECONDS,
            },
            reconcile: Reconcile::default(),
            session_stop_timeout_seconds: DEFAULT_SESSION_STOP_TIMEOUT_SECONDS,
        }
    }

    /// Converts to string in YAML format.
    pub fn encode_yaml(&self) -> io::Result<String> {
        serde_yaml::to_string(&self).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to serialize Spec to YAML {}", e),
            )
        })
    }

    /// Saves the current spec to disk
    /// and overwrites the file.
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing Spec to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        let d = self.encode_yaml()?;
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;

        Ok(())
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading Spec from {}", file_path);

        if !Path::new(file_path).exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("file {} does not exists", file_path),
            ));
        }

        let f = File::open(file_path).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to open {} ({})", file_path, e),
            )
        })?;
        serde_yaml::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e)))
    }

    /// Validates the spec.
    pub fn validate(&self) -> io::Result<()> {
        log::info!("validating Spec");

        if self.id.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "'id' cannot be empty"));
        }
        if self.region.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "'region' cannot be empty"));
        }

        if self.instance.name.len() <= 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("'instance.name' '{}' is too short", self.instance.name),
            ));
        }
        for (field, v) in [
            ("instance.instance_type", &self.instance.instance_type),
            ("instance.image_id", &self.instance.image_id),
            ("instance.zone", &self.instance.zone),
            ("instance.key_name", &self.instance.key_name),
            ("instance.security_group_id", &self.instance.security_group_id),
            ("instance.device", &self.instance.device),
        ] {
            if v.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("'{field}' cannot be empty"),
                ));
            }
        }
        if self.instance.disk_size_in_gb <= 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "'instance.disk_size_in_gb' {} must be positive",
                    self.instance.disk_size_in_gb
                ),
            ));
        }

        if let Some(bucket) = &self.bucket {
            if bucket.name.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "'bucket.name' cannot be empty",
                ));
            }
        }

        for (op, poll) in [
            ("instance_start", &self.reconcile.instance_start),
            ("instance_healthy", &self.reconcile.instance_healthy),
            ("instance_terminate", &self.reconcile.instance_terminate),
            ("volume_delete", &self.reconcile.volume_delete),
        ] {
            if poll.max_attempts == 0 || poll.poll_interval_seconds == 0 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("'reconcile.{op}' must poll at least once at a non-zero interval"),
                ));
            }
        }
        if self.session_stop_timeout_seconds == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'session_stop_timeout_seconds' must be positive",
            ));
        }

        Ok(())
    }
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- spec::test_spec --exact --show-output
#[test]
fn test_spec() {
    let _ = env_logger::builder().is_test(true).try_init();

    let id = random_manager::secure_string(10);
    let bucket = format!("test-{}", id_manager::time::timestamp(8));

    let contents = format!(
        r#"

id: {}
region: us-east-2

instance:
  name: test-server
  instance_type: t2.micro
  image_id: ami-097a2df4ac947655f
  zone: us-east-2c
  key_name: test-key
  security_group_id: sg-0364d234122df6a66
  device: /dev/sda1
  disk_size_in_gb: 20

bucket:
  name: {}
  cors_allowed_origins:
  - https://example.com

reconcile:
  instance_start:
    poll_interval_seconds: 5
    max_attempts: 24
  instance_healthy:
    poll_interval_seconds: 10
    max_attempts: 30
  instance_terminate:
    poll_interval_seconds: 5
    max_attempts: 36
  volume_delete:
    poll_interval_seconds: 5
    max_attempts: 12

"#,
        id, bucket,
    );
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let ret = f.write_all(contents.as_bytes());
    assert!(ret.is_ok());
    let config_path = f.path().to_str().unwrap();

    let cfg = Spec::load(config_path).unwrap();
    assert!(cfg.validate().is_ok());

    let ret = cfg.sync(config_path);
    assert!(ret.is_ok());

    let orig = Spec {
        id: id.clone(),
        region: String::from("us-east-2"),
        instance: LaunchOptions {
            name: String::from("test-server"),
            instance_type: String::from("t2.micro"),
            image_id: String::from("ami-097a2df4ac947655f"),
            zone: String::from("us-east-2c"),
            key_name: String::from("test-key"),
            security_group_id: String::from("sg-0364d234122df6a66"),
            device: String::from("/dev/sda1"),
            disk_size_in_gb: 20,
            delete_on_termination: true,
            termination_protection: true,
        },
        bucket: Some(BucketOptions {
            name: bucket.clone(),
            cors_allowed_origins: vec![String::from("https://example.com")],
        }),
        ssh: Ssh::default(),
        reconcile: Reconcile {
            instance_healthy: Poll {
                poll_interval_seconds: 10,
                max_attempts: 30,
            },
            ..Reconcile::default()
        },
        session_stop_timeout_seconds: 10,
    };
    assert_eq!(cfg, orig);
    assert_eq!(Spec::load(config_path).unwrap(), orig);

    let policy = cfg.reconcile.policy();
    assert_eq!(policy.instance_healthy.max_attempts, 30);
    assert_eq!(policy.instance_healthy.poll_interval, Duration::from_secs(10));
    assert_eq!(policy.volume_delete.budget(), Duration::from_secs(60));

    let mut invalid = orig.clone();
    invalid.instance.key_name = String::new();
    assert!(invalid.validate().is_err());

    let mut invalid = orig;
    invalid.reconcile.instance_start.max_attempts = 0;
    assert!(invalid.validate().is_err());
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- spec::test_default_aws --exact --show-output
#[test]
fn test_default_aws() {
    let spec = Spec::default_aws(DefaultSpecOption {
        image_id: String::from("ami-097a2df4ac947655f"),
        key_name: String::from("test-key"),
        security_group_id: String::from("sg-0364d234122df6a66"),
        spec_file_path: String::from("/tmp/test-server.yaml"),
        ..DefaultSpecOption::default()
    });
    assert_eq!(spec.id, "test-server");
    assert_eq!(spec.instance.name, "test-server");
    assert_eq!(spec.instance.zone, "us-east-2a");
    assert!(spec.bucket.is_none());
    assert!(spec.validate().is_ok());
    assert_eq!(spec.reconcile.policy(), ReconcilePolicy::default());
    assert_eq!(
        Duration::from_secs(spec.session_stop_timeout_seconds),
        crate::remote::registry::DEFAULT_STOP_TIMEOUT
    );
}
