//! Normalized cloud records, the control-plane seam, and the resource
//! listers built on top of it.
//!
//! Every upstream response is flattened into one of the records below by
//! the control-plane implementation. Listers never talk to the SDK
//! directly, so tests can swap in an in-memory control plane.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Placeholder for fields the upstream omits (e.g., no public IP yet).
pub const UNKNOWN: &str = "-";

/// Healthy sentinel for both instance status checks.
pub const STATUS_OK: &str = "ok";

pub const STATE_PENDING: &str = "pending";
pub const STATE_RUNNING: &str = "running";
pub const STATE_TERMINATED: &str = "terminated";

pub const VOLUME_STATE_DELETED: &str = "deleted";

/// Pseudo-state reported for buckets, which have no lifecycle field.
pub const BUCKET_STATE_EXISTS: &str = "exists";

/// Returned by the S3 sub-resource lookups when the sub-resource was never set.
pub const SETTING_NOT_FOUND: &str = "Not Found";
pub const PUBLIC_ACCESS_BLOCKED: &str = "Blocked";
pub const PUBLIC_ACCESS_NOT_BLOCKED: &str = "Not Blocked";

/// Anything a lister can return and a reconciler can observe.
pub trait Observed: Clone + fmt::Debug {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn state(&self) -> &str;
}

/// Represents one EC2 instance.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Instance {
    pub instance_id: String,
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,
    pub state: String,
    pub zone: String,
    pub public_ip: String,
    pub public_dns_name: String,
    pub security_group_names: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub volumes: Vec<BlockDevice>,
    pub termination_protection: bool,
    /// "-" until the status API has an entry for the instance.
    pub instance_status: String,
    pub system_status: String,
}

impl Instance {
    /// Comma-joined security group IDs, the form the launch options use.
    pub fn security_group_id(&self) -> String {
        self.security_group_ids.join(",")
    }
}

impl Observed for Instance {
    fn id(&self) -> &str {
        &self.instance_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn state(&self) -> &str {
        &self.state
    }
}

/// EBS mapping as seen from the instance.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BlockDevice {
    pub device: String,
    pub volume_id: String,
    pub status: String,
    pub delete_on_termination: bool,
}

/// Represents one EBS volume.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Volume {
    pub volume_id: String,
    pub name: String,
    pub volume_type: String,
    pub size_in_gb: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub state: String,
    pub zone: String,
    pub encrypted: bool,
    pub attachments: Vec<VolumeAttachment>,
}

impl Observed for Volume {
    fn id(&self) -> &str {
        &self.volume_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn state(&self) -> &str {
        &self.state
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct VolumeAttachment {
    pub instance_id: String,
    pub device: String,
    pub state: String,
}

/// Represents one S3 bucket and its security-relevant sub-resources.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Bucket {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// e.g., "AES256" or "Not Found".
    pub encryption: String,
    /// e.g., "Enabled" or "Not Found".
    pub versioning: String,
    /// "Blocked", "Not Blocked" or "Not Found".
    pub public_access: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Observed for Bucket {
    fn id(&self) -> &str {
        &self.name
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn state(&self) -> &str {
        BUCKET_STATE_EXISTS
    }
}

/// Launch parameters for a single instance with one root volume.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LaunchOptions {
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
    pub zone: String,
    pub key_name: String,
    pub security_group_id: String,
    /// Root device name, e.g., "/dev/sda1".
    pub device: String,
    pub disk_size_in_gb: i32,
    #[serde(default = "default_true")]
    pub delete_on_termination: bool,
    #[serde(default = "default_true")]
    pub termination_protection: bool,
}

/// Bucket creation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BucketOptions {
    pub name: String,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// The cloud control plane as consumed by this crate.
/// Implementations must return fully normalized records and treat
/// any unexpected response shape as a non-retryable error.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    fn region(&self) -> &str;

    async fn describe_instances(&self) -> Result<Vec<Instance>>;
    async fn describe_volumes(&self) -> Result<Vec<Volume>>;
    /// Launches one instance and returns its ID.
    async fn run_instance(&self, opts: &LaunchOptions) -> Result<String>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
    async fn describe_termination_protection(&self, instance_id: &str) -> Result<bool>;
    async fn modify_termination_protection(&self, instance_id: &str, value: bool) -> Result<()>;

    async fn describe_buckets(&self, name: Option<&str>) -> Result<Vec<Bucket>>;
    async fn create_bucket(&self, opts: &BucketOptions) -> Result<()>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameMatch {
    #[default]
    Exact,
    Contains,
}

/// Narrows a listing by ID and/or name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub name_match: NameMatch,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn name_containing(pattern: impl Into<String>) -> Self {
        Self {
            name: Some(pattern.into()),
            name_match: NameMatch::Contains,
            ..Self::default()
        }
    }

    pub fn matches<R: Observed>(&self, record: &R) -> bool {
        if let Some(id) = &self.id {
            if record.id() != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            let ok = match self.name_match {
                NameMatch::Exact => record.name() == name,
                NameMatch::Contains => record.name().contains(name.as_str()),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (None, None) => write!(f, "*"),
            (Some(id), None) => write!(f, "'{id}'"),
            (None, Some(name)) => match self.name_match {
                NameMatch::Exact => write!(f, "'{name}'"),
                NameMatch::Contains => write!(f, "'*{name}*'"),
            },
            (Some(id), Some(name)) => write!(f, "'{name}'/'{id}'"),
        }
    }
}

/// Queries the current state of one kind of resource.
#[allow(async_fn_in_trait)]
pub trait Lister {
    type Record: Observed;

    /// Human-readable resource kind used in error messages.
    fn kind(&self) -> &'static str;

    /// Lists every record matching the filter; zero matches is not an error.
    async fn list(&self, filter: &Filter) -> Result<Vec<Self::Record>>;

    /// Fails with "NotFound" on zero matches and "Ambiguous" on more than one.
    async fn get_one(&self, filter: &Filter) -> Result<Self::Record> {
        let mut records = self.list(filter).await?;
        match records.len() {
            0 => Err(Error::NotFound {
                message: format!("{} {} does not exist", self.kind(), filter),
            }),
            1 => Ok(records.remove(0)),
            n => Err(Error::Ambiguous {
                message: format!(
                    "{} {} specifies more than one {} (N={n})",
                    self.kind(),
                    filter,
                    self.kind()
                ),
            }),
        }
    }
}

pub struct Instances<'a, C> {
    cp: &'a C,
}

impl<'a, C: ControlPlane> Instances<'a, C> {
    pub fn new(cp: &'a C) -> Self {
        Self { cp }
    }
}

impl<'a, C: ControlPlane> Lister for Instances<'a, C> {
    type Record = Instance;

    fn kind(&self) -> &'static str {
        "instance"
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<Instance>> {
        let instances = self.cp.describe_instances().await?;
        Ok(instances.into_iter().filter(|i| filter.matches(i)).collect())
    }
}

pub struct Volumes<'a, C> {
    cp: &'a C,
}

impl<'a, C: ControlPlane> Volumes<'a, C> {
    pub fn new(cp: &'a C) -> Self {
        Self { cp }
    }
}

impl<'a, C: ControlPlane> Lister for Volumes<'a, C> {
    type Record = Volume;

    fn kind(&self) -> &'static str {
        "volume"
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<Volume>> {
        let volumes = self.cp.describe_volumes().await?;
        Ok(volumes.into_iter().filter(|v| filter.matches(v)).collect())
    }
}

pub struct Buckets<'a, C> {
    cp: &'a C,
}

impl<'a, C: ControlPlane> Buckets<'a, C> {
    pub fn new(cp: &'a C) -> Self {
        Self { cp }
    }
}

impl<'a, C: ControlPlane> Lister for Buckets<'a, C> {
    type Record = Bucket;

    fn kind(&self) -> &'static str {
        "bucket"
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<Bucket>> {
        // sub-resource lookups are one call each, so narrow before fetching them
        let exact = match (filter.name_match, &filter.name, &filter.id) {
            (NameMatch::Exact, Some(n), _) => Some(n.as_str()),
            (_, None, Some(id)) => Some(id.as_str()),
            _ => None,
        };
        let buckets = self.cp.describe_buckets(exact).await?;
        Ok(buckets.into_iter().filter(|b| filter.matches(b)).collect())
    }
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- cloud::test_filter --exact --show-output
#[test]
fn test_filter() {
    let v = Volume {
        volume_id: String::from("vol-0123"),
        name: String::from("test-1234-data"),
        volume_type: String::from("gp2"),
        size_in_gb: 29,
        created_at: None,
        state: String::from("in-use"),
        zone: String::from("us-east-2c"),
        encrypted: false,
        attachments: Vec::new(),
    };

    assert!(Filter::all().matches(&v));
    assert!(Filter::by_id("vol-0123").matches(&v));
    assert!(!Filter::by_id("vol-9999").matches(&v));
    assert!(Filter::by_name("test-1234-data").matches(&v));
    assert!(!Filter::by_name("test-1234").matches(&v));
    assert!(Filter::name_containing("1234").matches(&v));

    let f = Filter {
        id: Some(String::from("vol-9999")),
        name: Some(String::from("test-1234-data")),
        name_match: NameMatch::Exact,
    };
    assert!(!f.matches(&v));

    assert_eq!(Filter::by_name("a").to_string(), "'a'");
    assert_eq!(Filter::name_containing("a").to_string(), "'*a*'");
    assert_eq!(Filter::all().to_string(), "*");
}
