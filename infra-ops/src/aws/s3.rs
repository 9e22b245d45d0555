use aws_sdk_s3::{
    types::{
        BucketLocationConstraint, BucketVersioningStatus, CorsConfiguration, CorsRule,
        CreateBucketConfiguration, PublicAccessBlockConfiguration, ServerSideEncryption,
        ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration,
        ServerSideEncryptionRule, VersioningConfiguration,
    },
    Client,
};

use crate::{
    aws::{is_error_retryable, to_utc},
    cloud::{
        Bucket, BucketOptions, PUBLIC_ACCESS_BLOCKED, PUBLIC_ACCESS_NOT_BLOCKED, SETTING_NOT_FOUND,
    },
    errors::{Error::API, Result},
};

/// Implements AWS S3 manager.
#[derive(Debug, Clone)]
pub struct Manager {
    region: String,
    cli: Client,
}

fn blocked_config() -> PublicAccessBlockConfiguration {
    PublicAccessBlockConfiguration::builder()
        .block_public_acls(true)
        .block_public_policy(true)
        .ignore_public_acls(true)
        .restrict_public_buckets(true)
        .build()
}

impl Manager {
    pub fn new(cli: Client, region: &str) -> Self {
        Self {
            region: region.to_string(),
            cli,
        }
    }

    /// Lists buckets (optionally just the named one) with their encryption,
    /// versioning, public access block and CORS settings.
    pub async fn describe_buckets(&self, name: Option<&str>) -> Result<Vec<Bucket>> {
        let resp = self.cli.list_buckets().send().await.map_err(|e| API {
            message: format!("failed list_buckets {:?}", e),
            is_retryable: is_error_retryable(&e),
        })?;

        let mut buckets = Vec::new();
        for b in resp.buckets().unwrap_or_default() {
            let bucket_name = match b.name() {
                Some(n) => n,
                None => continue,
            };
            if let Some(want) = name {
                if want != bucket_name {
                    continue;
                }
            }

            buckets.push(Bucket {
                name: bucket_name.to_string(),
                created_at: to_utc(b.creation_date()),
                encryption: self.get_encryption(bucket_name).await?,
                versioning: self.get_versioning(bucket_name).await?,
                public_access: self.get_public_access(bucket_name).await?,
                cors_allowed_origins: self.get_cors_allowed_origins(bucket_name).await?,
            });
        }
        Ok(buckets)
    }

    async fn get_encryption(&self, bucket: &str) -> Result<String> {
        let ret = self.cli.get_bucket_encryption().bucket(bucket).send().await;
        let resp = match ret {
            Ok(v) => v,
            Err(e) => {
                if is_error_not_found(&e, "ServerSideEncryptionConfigurationNotFoundError") {
                    return Ok(String::from(SETTING_NOT_FOUND));
                }
                return Err(API {
                    message: format!("failed get_bucket_encryption {:?}", e),
                    is_retryable: is_error_retryable(&e),
                });
            }
        };
        Ok(resp
            .server_side_encryption_configuration()
            .and_then(|c| c.rules())
            .and_then(|r| r.first())
            .and_then(|r| r.apply_server_side_encryption_by_default())
            .and_then(|d| d.sse_algorithm())
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| String::from(SETTING_NOT_FOUND)))
    }

    async fn get_versioning(&self, bucket: &str) -> Result<String> {
        let resp = self
            .cli
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed get_bucket_versioning {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;
        // never-enabled buckets carry no status at all
        Ok(resp
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| String::from(SETTING_NOT_FOUND)))
    }

    async fn get_public_access(&self, bucket: &str) -> Result<String> {
        let ret = self.cli.get_public_access_block().bucket(bucket).send().await;
        let resp = match ret {
            Ok(v) => v,
            Err(e) => {
                if is_error_not_found(&e, "NoSuchPublicAccessBlockConfiguration") {
                    return Ok(String::from(SETTING_NOT_FOUND));
                }
                return Err(API {
                    message: format!("failed get_public_access_block {:?}", e),
                    is_retryable: is_error_retryable(&e),
                });
            }
        };
        match resp.public_access_block_configuration() {
            Some(c) if *c == blocked_config() => Ok(String::from(PUBLIC_ACCESS_BLOCKED)),
            Some(_) => Ok(String::from(PUBLIC_ACCESS_NOT_BLOCKED)),
            None => Ok(String::from(SETTING_NOT_FOUND)),
        }
    }

    async fn get_cors_allowed_origins(&self, bucket: &str) -> Result<Vec<String>> {
        let ret = self.cli.get_bucket_cors().bucket(bucket).send().await;
        let resp = match ret {
            Ok(v) => v,
            Err(e) => {
                if is_error_not_found(&e, "NoSuchCORSConfiguration") {
                    return Ok(Vec::new());
                }
                return Err(API {
                    message: format!("failed get_bucket_cors {:?}", e),
                    is_retryable: is_error_retryable(&e),
                });
            }
        };
        Ok(resp
            .cors_rules()
            .and_then(|r| r.first())
            .and_then(|r| r.allowed_origins())
            .map(|o| o.to_vec())
            .unwrap_or_default())
    }

    /// Creates a private bucket with AES256 default encryption, versioning
    /// and (when origins are given) a GET-only CORS rule.
    pub async fn create_bucket(&self, opts: &BucketOptions) -> Result<()> {
        log::info!("creating S3 bucket '{}' in region {}", opts.name, self.region);

        let mut req = self.cli.create_bucket().bucket(&opts.name);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        req.send().await.map_err(|e| API {
            message: format!("failed create_bucket {:?}", e),
            is_retryable: is_error_retryable(&e),
        })?;

        log::info!("setting S3 bucket public_access_block configuration to private");
        self.cli
            .put_public_access_block()
            .bucket(&opts.name)
            .public_access_block_configuration(blocked_config())
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed put_public_access_block {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        let sse = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build();
        let rule = ServerSideEncryptionRule::builder()
            .apply_server_side_encryption_by_default(sse)
            .build();
        self.cli
            .put_bucket_encryption()
            .bucket(&opts.name)
            .server_side_encryption_configuration(
                ServerSideEncryptionConfiguration::builder()
                    .rules(rule)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed put_bucket_encryption {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        self.cli
            .put_bucket_versioning()
            .bucket(&opts.name)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed put_bucket_versioning {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        if opts.cors_allowed_origins.is_empty() {
            log::info!("no CORS origins given; skipping CORS rule");
            return Ok(());
        }
        let rule = CorsRule::builder()
            .allowed_headers("*")
            .allowed_methods("GET")
            .set_allowed_origins(Some(opts.cors_allowed_origins.clone()))
            .build();
        self.cli
            .put_bucket_cors()
            .bucket(&opts.name)
            .cors_configuration(CorsConfiguration::builder().cors_rules(rule).build())
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed put_bucket_cors {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        log::info!("created S3 bucket '{}'", opts.name);
        Ok(())
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        log::info!("deleting S3 bucket '{}' in region {}", name, self.region);
        self.cli
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed delete_bucket {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;
        log::info!("deleted S3 bucket '{}'", name);
        Ok(())
    }
}

/// S3 reports unset sub-resources as service errors with these codes.
#[inline]
fn is_error_not_found<E: std::fmt::Debug, R: std::fmt::Debug>(
    e: &aws_sdk_s3::error::SdkError<E, R>,
    code: &str,
) -> bool {
    match e {
        aws_sdk_s3::error::SdkError::ServiceError(err) => format!("{:?}", err).contains(code),
        _ => false,
    }
}
