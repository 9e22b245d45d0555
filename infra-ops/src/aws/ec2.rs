use aws_sdk_ec2::{
    types::{
        AttributeBooleanValue, BlockDeviceMapping, EbsBlockDevice, InstanceAttributeName,
        InstanceType, Placement, ResourceType, RunInstancesMonitoringEnabled, Tag,
        TagSpecification, VolumeType,
    },
    Client,
};

use crate::{
    aws::{is_error_retryable, to_utc},
    cloud::{
        BlockDevice, Instance, LaunchOptions, Volume, VolumeAttachment, STATE_TERMINATED, UNKNOWN,
    },
    errors::{
        Error::{Other, API},
        Result,
    },
};

/// Implements AWS EC2 manager.
#[derive(Debug, Clone)]
pub struct Manager {
    cli: Client,
}

impl Manager {
    pub fn new(cli: Client) -> Self {
        Self { cli }
    }

    /// Lists every instance in the region, with its termination protection
    /// and status checks resolved.
    pub async fn describe_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .cli
                .describe_instances()
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| API {
                    message: format!("failed describe_instances {:?}", e),
                    is_retryable: is_error_retryable(&e),
                })?;

            for r in resp.reservations().unwrap_or_default() {
                let found = r.instances().unwrap_or_default();
                if found.len() != 1 {
                    return Err(Other {
                        message: format!(
                            "reservation {:?} has {} instance(s), expected exactly one",
                            r.reservation_id(),
                            found.len()
                        ),
                        is_retryable: false,
                    });
                }
                let mut instance = normalize_instance(&found[0])?;
                if instance.state != STATE_TERMINATED {
                    instance.termination_protection = self
                        .describe_termination_protection(&instance.instance_id)
                        .await?;
                    let (instance_status, system_status) =
                        self.describe_instance_status(&instance.instance_id).await?;
                    instance.instance_status = instance_status;
                    instance.system_status = system_status;
                }
                instances.push(instance);
            }

            token = resp.next_token().map(|s| s.to_string());
            if token.is_none() {
                break;
            }
        }
        log::debug!("described {} instance(s)", instances.len());
        Ok(instances)
    }

    /// Returns (instance status, system status), "-" for both when the
    /// status API has no entry yet.
    async fn describe_instance_status(&self, instance_id: &str) -> Result<(String, String)> {
        let resp = self
            .cli
            .describe_instance_status()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed describe_instance_status {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        let statuses = resp.instance_statuses().unwrap_or_default();
        match statuses.first() {
            Some(s) => {
                let instance_status = s
                    .instance_status()
                    .and_then(|v| v.status())
                    .map(|v| v.as_str().to_string())
                    .unwrap_or_else(|| String::from(UNKNOWN));
                let system_status = s
                    .system_status()
                    .and_then(|v| v.status())
                    .map(|v| v.as_str().to_string())
                    .unwrap_or_else(|| String::from(UNKNOWN));
                Ok((instance_status, system_status))
            }
            None => Ok((String::from(UNKNOWN), String::from(UNKNOWN))),
        }
    }

    pub async fn describe_termination_protection(&self, instance_id: &str) -> Result<bool> {
        let resp = self
            .cli
            .describe_instance_attribute()
            .attribute(InstanceAttributeName::DisableApiTermination)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed describe_instance_attribute {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        Ok(resp
            .disable_api_termination()
            .and_then(|v| v.value())
            .unwrap_or(false))
    }

    pub async fn modify_termination_protection(&self, instance_id: &str, value: bool) -> Result<()> {
        log::info!("setting termination protection for '{}' to {}", instance_id, value);
        self.cli
            .modify_instance_attribute()
            .instance_id(instance_id)
            .disable_api_termination(AttributeBooleanValue::builder().value(value).build())
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed modify_instance_attribute {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;
        Ok(())
    }

    /// Launches exactly one instance with a single gp2 root volume.
    pub async fn run_instance(&self, opts: &LaunchOptions) -> Result<String> {
        log::info!(
            "launching instance '{}' ({}, {}) in {}",
            opts.name,
            opts.instance_type,
            opts.image_id,
            opts.zone
        );

        let ebs = EbsBlockDevice::builder()
            .delete_on_termination(opts.delete_on_termination)
            .volume_size(opts.disk_size_in_gb)
            .volume_type(VolumeType::Gp2)
            .build();
        let name_tag = Tag::builder().key("Name").value(&opts.name).build();

        let resp = self
            .cli
            .run_instances()
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&opts.device)
                    .ebs(ebs)
                    .build(),
            )
            .image_id(&opts.image_id)
            .instance_type(InstanceType::from(opts.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .monitoring(RunInstancesMonitoringEnabled::builder().enabled(false).build())
            .placement(Placement::builder().availability_zone(&opts.zone).build())
            .key_name(&opts.key_name)
            .set_security_group_ids(Some(
                opts.security_group_id
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            ))
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(name_tag)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed run_instances {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;

        let launched = resp.instances().unwrap_or_default();
        if launched.len() != 1 {
            return Err(Other {
                message: format!("run_instances returned {} instance(s)", launched.len()),
                is_retryable: false,
            });
        }
        let instance_id = launched[0].instance_id().ok_or_else(|| Other {
            message: String::from("run_instances returned no instance ID"),
            is_retryable: false,
        })?;
        log::info!("launched instance '{}' as {}", opts.name, instance_id);
        Ok(instance_id.to_string())
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        log::info!("terminating instance '{}'", instance_id);
        self.cli
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| API {
                message: format!("failed terminate_instances {:?}", e),
                is_retryable: is_error_retryable(&e),
            })?;
        Ok(())
    }

    pub async fn describe_volumes(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .cli
                .describe_volumes()
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| API {
                    message: format!("failed describe_volumes {:?}", e),
                    is_retryable: is_error_retryable(&e),
                })?;

            for v in resp.volumes().unwrap_or_default() {
                volumes.push(normalize_volume(v)?);
            }

            token = resp.next_token().map(|s| s.to_string());
            if token.is_none() {
                break;
            }
        }
        Ok(volumes)
    }
}

fn name_tag(tags: Option<&[Tag]>) -> String {
    tags.unwrap_or_default()
        .iter()
        .find(|t| t.key() == Some("Name"))
        .and_then(|t| t.value())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn or_unknown(v: Option<&str>) -> String {
    v.filter(|s| !s.is_empty()).unwrap_or(UNKNOWN).to_string()
}

/// Flattens the SDK instance; a missing instance ID is a shape violation.
fn normalize_instance(i: &aws_sdk_ec2::types::Instance) -> Result<Instance> {
    let instance_id = i.instance_id().ok_or_else(|| Other {
        message: String::from("describe_instances returned an instance without ID"),
        is_retryable: false,
    })?;

    let groups = i.security_groups().unwrap_or_default();
    let volumes = i
        .block_device_mappings()
        .unwrap_or_default()
        .iter()
        .map(|m| {
            let ebs = m.ebs();
            BlockDevice {
                device: or_unknown(m.device_name()),
                volume_id: or_unknown(ebs.and_then(|e| e.volume_id())),
                status: ebs
                    .and_then(|e| e.status())
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| String::from(UNKNOWN)),
                delete_on_termination: ebs
                    .and_then(|e| e.delete_on_termination())
                    .unwrap_or(false),
            }
        })
        .collect();

    Ok(Instance {
        instance_id: instance_id.to_string(),
        name: name_tag(i.tags()),
        image_id: or_unknown(i.image_id()),
        instance_type: i
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| String::from(UNKNOWN)),
        key_name: or_unknown(i.key_name()),
        launched_at: to_utc(i.launch_time()),
        state: i
            .state()
            .and_then(|s| s.name())
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| String::from(UNKNOWN)),
        zone: or_unknown(i.placement().and_then(|p| p.availability_zone())),
        public_ip: or_unknown(i.public_ip_address()),
        public_dns_name: or_unknown(i.public_dns_name()),
        security_group_names: groups
            .iter()
            .filter_map(|g| g.group_name())
            .map(|s| s.to_string())
            .collect(),
        security_group_ids: groups
            .iter()
            .filter_map(|g| g.group_id())
            .map(|s| s.to_string())
            .collect(),
        volumes,
        termination_protection: false,
        instance_status: String::from(UNKNOWN),
        system_status: String::from(UNKNOWN),
    })
}

fn normalize_volume(v: &aws_sdk_ec2::types::Volume) -> Result<Volume> {
    let volume_id = v.volume_id().ok_or_else(|| Other {
        message: String::from("describe_volumes returned a volume without ID"),
        is_retryable: false,
    })?;

    Ok(Volume {
        volume_id: volume_id.to_string(),
        name: name_tag(v.tags()),
        volume_type: v
            .volume_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| String::from(UNKNOWN)),
        size_in_gb: v.size().unwrap_or(0),
        created_at: to_utc(v.create_time()),
        state: v
            .state()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| String::from(UNKNOWN)),
        zone: or_unknown(v.availability_zone()),
        encrypted: v.encrypted().unwrap_or(false),
        attachments: v
            .attachments()
            .unwrap_or_default()
            .iter()
            .map(|a| VolumeAttachment {
                instance_id: or_unknown(a.instance_id()),
                device: or_unknown(a.device()),
                state: a
                    .state()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| String::from(UNKNOWN)),
            })
            .collect(),
    })
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- aws::ec2::test_normalize --exact --show-output
#[test]
fn test_normalize() {
    use aws_sdk_ec2::types::{
        EbsInstanceBlockDevice, InstanceBlockDeviceMapping, InstanceState, InstanceStateName,
    };

    let raw = aws_sdk_ec2::types::Instance::builder()
        .instance_id("i-0123456789abcdef0")
        .image_id("ami-097a2df4ac947655f")
        .instance_type(InstanceType::T2Micro)
        .state(
            InstanceState::builder()
                .name(InstanceStateName::Running)
                .build(),
        )
        .tags(Tag::builder().key("team").value("infra").build())
        .tags(Tag::builder().key("Name").value("test-1").build())
        .block_device_mappings(
            InstanceBlockDeviceMapping::builder()
                .device_name("/dev/sda1")
                .ebs(
                    EbsInstanceBlockDevice::builder()
                        .volume_id("vol-0123")
                        .delete_on_termination(true)
                        .build(),
                )
                .build(),
        )
        .build();

    let i = normalize_instance(&raw).unwrap();
    assert_eq!(i.instance_id, "i-0123456789abcdef0");
    assert_eq!(i.name, "test-1");
    assert_eq!(i.instance_type, "t2.micro");
    assert_eq!(i.state, "running");
    assert_eq!(i.key_name, UNKNOWN);
    assert_eq!(i.public_ip, UNKNOWN);
    assert_eq!(i.volumes.len(), 1);
    assert_eq!(i.volumes[0].volume_id, "vol-0123");
    assert_eq!(i.volumes[0].status, UNKNOWN);
    assert!(i.volumes[0].delete_on_termination);

    let raw = aws_sdk_ec2::types::Instance::builder().build();
    assert!(normalize_instance(&raw).is_err());
}
