pub mod ec2;
pub mod s3;

use std::time::Duration;

use aws_sdk_ec2::{error::SdkError, primitives::DateTime as SmithyDateTime};
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    cloud::{Bucket, BucketOptions, ControlPlane, Instance, LaunchOptions, Volume},
    errors::Result,
};

/// Returns true if the SDK error is a transport-level failure worth retrying.
#[inline]
pub fn is_error_retryable<E, R>(e: &SdkError<E, R>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => true,
        SdkError::DispatchFailure(e) => e.is_timeout() || e.is_io(),
        _ => false,
    }
}

pub(crate) fn to_utc(dt: Option<&SmithyDateTime>) -> Option<DateTime<Utc>> {
    let dt = dt?;
    Utc.timestamp_opt(dt.secs(), dt.subsec_nanos()).single()
}

/// EC2 and S3 in one region, behind the control-plane trait.
pub struct Aws {
    region: String,
    pub ec2: ec2::Manager,
    pub s3: s3::Manager,
}

impl Aws {
    /// Loads credentials from the standard AWS environment.
    pub async fn load(region: &str) -> Self {
        log::info!("loading AWS configuration for region '{}'", region);
        let shared_config =
            aws_manager::load_config(Some(region.to_string()), None, Some(Duration::from_secs(30)))
                .await;
        Self {
            region: region.to_string(),
            ec2: ec2::Manager::new(aws_sdk_ec2::Client::new(&shared_config)),
            s3: s3::Manager::new(aws_sdk_s3::Client::new(&shared_config), region),
        }
    }
}

impl ControlPlane for Aws {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        self.ec2.describe_instances().await
    }

    async fn describe_volumes(&self) -> Result<Vec<Volume>> {
        self.ec2.describe_volumes().await
    }

    async fn run_instance(&self, opts: &LaunchOptions) -> Result<String> {
        self.ec2.run_instance(opts).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.ec2.terminate_instance(instance_id).await
    }

    async fn describe_termination_protection(&self, instance_id: &str) -> Result<bool> {
        self.ec2.describe_termination_protection(instance_id).await
    }

    async fn modify_termination_protection(&self, instance_id: &str, value: bool) -> Result<()> {
        self.ec2
            .modify_termination_protection(instance_id, value)
            .await
    }

    async fn describe_buckets(&self, name: Option<&str>) -> Result<Vec<Bucket>> {
        self.s3.describe_buckets(name).await
    }

    async fn create_bucket(&self, opts: &BucketOptions) -> Result<()> {
        self.s3.create_bucket(opts).await
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.s3.delete_bucket(name).await
    }
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- aws::test_to_utc --exact --show-output
#[test]
fn test_to_utc() {
    let dt = SmithyDateTime::from_secs(1_697_587_200);
    let converted = to_utc(Some(&dt)).unwrap();
    assert_eq!(converted.to_rfc3339(), "2023-10-18T00:00:00+00:00");
    assert!(to_utc(None).is_none());
}
