//! Instance and bucket lifecycle operations on top of a control plane.

use std::time::Duration;

use crate::{
    cloud::{
        Bucket, BucketOptions, Buckets, ControlPlane, Filter, Instance, Instances, LaunchOptions,
        Lister, Volumes, STATE_RUNNING, STATE_TERMINATED, VOLUME_STATE_DELETED,
    },
    errors::{Error, Result},
    reconcile::{instance_healthy, ManagedResource, Predicate, Reconciler},
};

/// Only volume type ever launched.
pub const VOLUME_TYPE: &str = "gp2";

pub const DEFAULT_CLEAN_UP_PREFIX: &str = "test-";

/// Poll budgets for each asynchronous transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub instance_start: Reconciler,
    pub instance_healthy: Reconciler,
    pub instance_terminate: Reconciler,
    pub volume_delete: Reconciler,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        let itv = Duration::from_secs(5);
        Self {
            instance_start: Reconciler::new(itv, 24),
            instance_healthy: Reconciler::new(itv, 60),
            instance_terminate: Reconciler::new(itv, 36),
            volume_delete: Reconciler::new(itv, 12),
        }
    }
}

pub struct Provisioner<'a, C> {
    cp: &'a C,
    policy: ReconcilePolicy,
}

impl<'a, C: ControlPlane> Provisioner<'a, C> {
    pub fn new(cp: &'a C, policy: ReconcilePolicy) -> Self {
        Self { cp, policy }
    }

    /// Returns the instance with this name that is not yet terminated, if any.
    /// Terminated instances stay listed for a while and are ignored.
    pub async fn find_live(&self, name: &str) -> Result<Option<Instance>> {
        let mut live: Vec<Instance> = Instances::new(self.cp)
            .list(&Filter::by_name(name))
            .await?
            .into_iter()
            .filter(|i| i.state != STATE_TERMINATED)
            .collect();
        match live.len() {
            0 => Ok(None),
            1 => Ok(live.pop()),
            n => Err(Error::Ambiguous {
                message: format!("instance '{name}' specifies more than one instance (N={n})"),
            }),
        }
    }

    /// Launches one instance and blocks until it is running with the
    /// requested termination protection, then verifies what was created.
    pub async fn create_instance(&self, opts: &LaunchOptions) -> Result<Instance> {
        if opts.name.len() <= 2 {
            return Err(Error::other(format!("illegal instance name '{}'", opts.name)));
        }
        if opts.disk_size_in_gb <= 0 {
            return Err(Error::other(format!(
                "disk size {} is too small",
                opts.disk_size_in_gb
            )));
        }
        if opts.key_name.is_empty() {
            return Err(Error::other("key name must be provided"));
        }
        if self.find_live(&opts.name).await?.is_some() {
            return Err(Error::other(format!("instance '{}' already exists", opts.name)));
        }

        log::info!("creating instance '{}' in {}", opts.name, self.cp.region());
        let instance_id = self.cp.run_instance(opts).await?;

        let started = self
            .policy
            .instance_start
            .wait_until(
                &Instances::new(self.cp),
                &Filter::by_id(&instance_id),
                &Predicate::state_is(STATE_RUNNING),
            )
            .await?;
        log::info!(
            "instance {}/{} is running after {} poll(s)",
            instance_id,
            opts.name,
            started.attempts
        );

        self.set_termination_protection(&instance_id, opts.termination_protection)
            .await?;

        let instance = Instances::new(self.cp)
            .get_one(&Filter::by_id(&instance_id))
            .await?;
        self.verify_instance(&instance, opts).await?;

        log::info!("instance '{}' was created", opts.name);
        Ok(instance)
    }

    async fn verify_instance(&self, instance: &Instance, opts: &LaunchOptions) -> Result<()> {
        let mismatch = |field: &str, got: &dyn std::fmt::Debug| {
            Error::other(format!(
                "instance '{}' was not created as requested: unexpected {field} {got:?}",
                opts.name
            ))
        };

        if instance.name != opts.name {
            return Err(mismatch("name", &instance.name));
        }
        if instance.state != STATE_RUNNING {
            return Err(mismatch("state", &instance.state));
        }
        if instance.instance_type != opts.instance_type {
            return Err(mismatch("instance type", &instance.instance_type));
        }
        if instance.image_id != opts.image_id {
            return Err(mismatch("image", &instance.image_id));
        }
        if instance.key_name != opts.key_name {
            return Err(mismatch("key name", &instance.key_name));
        }
        if instance.security_group_id() != opts.security_group_id {
            return Err(mismatch("security group", &instance.security_group_ids));
        }
        if instance.termination_protection != opts.termination_protection {
            return Err(mismatch(
                "termination protection",
                &instance.termination_protection,
            ));
        }

        if instance.volumes.len() != 1 {
            return Err(mismatch("block devices", &instance.volumes));
        }
        let bd = &instance.volumes[0];
        if bd.device != opts.device
            || bd.status != "attached"
            || bd.delete_on_termination != opts.delete_on_termination
        {
            return Err(mismatch("block device", bd));
        }

        let volume = Volumes::new(self.cp)
            .get_one(&Filter::by_id(&bd.volume_id))
            .await?;
        if volume.size_in_gb != opts.disk_size_in_gb || volume.volume_type != VOLUME_TYPE {
            return Err(mismatch("volume", &volume));
        }
        if volume.attachments.len() != 1
            || volume.attachments[0].instance_id != instance.instance_id
            || volume.attachments[0].device != opts.device
        {
            return Err(mismatch("volume attachments", &volume.attachments));
        }
        Ok(())
    }

    /// Blocks until both status checks of the named instance report "ok".
    pub async fn wait_healthy(&self, name: &str) -> Result<Instance> {
        let instance = self.find_live(name).await?.ok_or_else(|| Error::NotFound {
            message: format!("instance '{name}' does not exist"),
        })?;
        let resource = self
            .policy
            .instance_healthy
            .wait_until(
                &Instances::new(self.cp),
                &Filter::by_id(&instance.instance_id),
                &instance_healthy(),
            )
            .await?;
        resource.into_record()
    }

    /// Reuses a live instance with the same name, or creates one, and waits
    /// until it is healthy.
    pub async fn ensure_instance(&self, opts: &LaunchOptions) -> Result<Instance> {
        match self.find_live(&opts.name).await? {
            Some(i) => log::info!("instance '{}' already exists ({})", opts.name, i.instance_id),
            None => {
                self.create_instance(opts).await?;
            }
        }
        self.wait_healthy(&opts.name).await
    }

    pub async fn set_termination_protection(&self, instance_id: &str, value: bool) -> Result<()> {
        let instance = Instances::new(self.cp)
            .get_one(&Filter::by_id(instance_id))
            .await?;
        log::info!(
            "setting termination protection for {}/{} to {}",
            instance_id,
            instance.name,
            value
        );

        self.cp
            .modify_termination_protection(instance_id, value)
            .await?;
        let current = self.cp.describe_termination_protection(instance_id).await?;
        if current != value {
            return Err(Error::other(format!(
                "termination protection for {instance_id} is {current}, expected {value}"
            )));
        }
        Ok(())
    }

    /// Terminates the instance, waits until it is gone, then waits until
    /// every volume marked delete-on-termination is deleted as well.
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<ManagedResource<Instance>> {
        let instance = Instances::new(self.cp)
            .get_one(&Filter::by_id(instance_id))
            .await?;
        log::info!("terminating instance {}/{}", instance_id, instance.name);
        self.cp.terminate_instance(instance_id).await?;

        let terminated = self
            .policy
            .instance_terminate
            .wait_until(
                &Instances::new(self.cp),
                &Filter::by_id(instance_id),
                &Predicate::state_is_or_absent(STATE_TERMINATED),
            )
            .await?;

        // block devices are detached once terminated, so use the earlier listing
        for bd in instance.volumes.iter() {
            if !bd.delete_on_termination {
                log::info!(
                    "volume {} was not marked for delete-on-termination",
                    bd.volume_id
                );
                continue;
            }
            self.policy
                .volume_delete
                .wait_until(
                    &Volumes::new(self.cp),
                    &Filter::by_id(&bd.volume_id),
                    &Predicate::state_is_or_absent(VOLUME_STATE_DELETED),
                )
                .await?;
            log::info!("volume {} was deleted at instance termination", bd.volume_id);
        }
        Ok(terminated)
    }

    /// Tears down every non-terminated instance whose name starts with the
    /// prefix, returning the terminated instance IDs.
    pub async fn clean_up(&self, prefix: &str) -> Result<Vec<String>> {
        if prefix.is_empty() {
            return Err(Error::other("clean-up prefix must not be empty"));
        }

        let targets: Vec<Instance> = Instances::new(self.cp)
            .list(&Filter::all())
            .await?
            .into_iter()
            .filter(|i| i.name.starts_with(prefix) && i.state != STATE_TERMINATED)
            .collect();
        log::info!("cleaning up {} instance(s) with prefix '{}'", targets.len(), prefix);

        let mut terminated = Vec::with_capacity(targets.len());
        for i in targets {
            self.set_termination_protection(&i.instance_id, false).await?;
            self.terminate_instance(&i.instance_id).await?;
            terminated.push(i.instance_id);
        }
        Ok(terminated)
    }

    /// Creates a private, encrypted, versioned bucket and returns it as listed.
    pub async fn create_bucket(&self, opts: &BucketOptions) -> Result<Bucket> {
        if opts.name.is_empty() {
            return Err(Error::other("bucket name must not be empty"));
        }
        log::info!("creating bucket '{}' in {}", opts.name, self.cp.region());
        self.cp.create_bucket(opts).await?;
        Buckets::new(self.cp).get_one(&Filter::by_name(&opts.name)).await
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        log::info!("deleting bucket '{}'", name);
        self.cp.delete_bucket(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cloud::STATUS_OK, fakes::FakeControlPlane};

    fn launch_options(name: &str) -> LaunchOptions {
        LaunchOptions {
            name: name.to_string(),
            instance_type: String::from("t2.micro"),
            image_id: String::from("ami-097a2df4ac947655f"),
            zone: String::from("us-east-2c"),
            key_name: String::from("test-key"),
            security_group_id: String::from("sg-0364d234122df6a66"),
            device: String::from("/dev/sda1"),
            disk_size_in_gb: 20,
            delete_on_termination: true,
            termination_protection: true,
        }
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- provision::tests::test_instance_lifecycle --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_instance_lifecycle() {
        let _ = env_logger::builder().is_test(true).try_init();

        let cp = FakeControlPlane::default();
        let p = Provisioner::new(&cp, ReconcilePolicy::default());

        let name = format!("test-{}", random_manager::secure_string(6));
        let created = p.create_instance(&launch_options(&name)).await.unwrap();
        assert_eq!(created.state, STATE_RUNNING);
        assert!(created.termination_protection);
        assert_eq!(created.volumes.len(), 1);
        let volume_id = created.volumes[0].volume_id.clone();

        // same name twice is refused
        let err = p.create_instance(&launch_options(&name)).await.unwrap_err();
        assert!(err.message().contains("already exists"));

        let healthy = p.wait_healthy(&name).await.unwrap();
        assert_eq!(healthy.instance_status, STATUS_OK);
        assert_eq!(healthy.system_status, STATUS_OK);

        // protected instances cannot be terminated
        assert!(p.terminate_instance(&created.instance_id).await.is_err());

        let removed = p.clean_up(DEFAULT_CLEAN_UP_PREFIX).await.unwrap();
        assert_eq!(removed, vec![created.instance_id.clone()]);

        let instances = Instances::new(&cp)
            .list(&Filter::by_id(&created.instance_id))
            .await
            .unwrap();
        assert!(instances.iter().all(|i| i.state == STATE_TERMINATED));
        assert!(Volumes::new(&cp)
            .list(&Filter::by_id(&volume_id))
            .await
            .unwrap()
            .is_empty());

        // nothing left to clean up
        assert!(p.clean_up(DEFAULT_CLEAN_UP_PREFIX).await.unwrap().is_empty());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- provision::tests::test_ensure_instance --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_ensure_instance() {
        let cp = FakeControlPlane::default();
        let p = Provisioner::new(&cp, ReconcilePolicy::default());

        let mut opts = launch_options("test-ensure");
        opts.termination_protection = false;
        let first = p.ensure_instance(&opts).await.unwrap();
        let second = p.ensure_instance(&opts).await.unwrap();
        assert_eq!(first.instance_id, second.instance_id);

        p.terminate_instance(&first.instance_id).await.unwrap();
        assert!(p.find_live("test-ensure").await.unwrap().is_none());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- provision::tests::test_wait_healthy_timeout --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_wait_healthy_timeout() {
        let cp = FakeControlPlane::default();
        cp.set_impaired(true);
        let p = Provisioner::new(&cp, ReconcilePolicy::default());

        p.create_instance(&launch_options("test-impaired"))
            .await
            .unwrap();
        let err = p.wait_healthy("test-impaired").await.unwrap_err();
        match err {
            Error::TimeoutExceeded { attempts, .. } => assert_eq!(attempts, 60),
            e => panic!("unexpected error {e:?}"),
        }

        assert!(matches!(
            p.wait_healthy("test-nothing").await.unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- provision::tests::test_create_instance_validation --exact --show-output
    #[tokio::test]
    async fn test_create_instance_validation() {
        let cp = FakeControlPlane::default();
        let p = Provisioner::new(&cp, ReconcilePolicy::default());

        let mut opts = launch_options("ab");
        assert!(p.create_instance(&opts).await.is_err());

        opts.name = String::from("test-1");
        opts.disk_size_in_gb = 0;
        assert!(p.create_instance(&opts).await.is_err());

        opts.disk_size_in_gb = 20;
        opts.key_name = String::new();
        assert!(p.create_instance(&opts).await.is_err());

        assert!(cp.describe_instances().await.unwrap().is_empty());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- provision::tests::test_bucket_lifecycle --exact --show-output
    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let cp = FakeControlPlane::default();
        let p = Provisioner::new(&cp, ReconcilePolicy::default());

        let name = id_manager::time::with_prefix("test-bucket");
        let bucket = p
            .create_bucket(&BucketOptions {
                name: name.clone(),
                cors_allowed_origins: vec![String::from("https://example.com")],
            })
            .await
            .unwrap();
        assert_eq!(bucket.encryption, "AES256");
        assert_eq!(bucket.versioning, "Enabled");
        assert_eq!(bucket.public_access, "Blocked");
        assert_eq!(bucket.cors_allowed_origins, vec!["https://example.com"]);

        p.delete_bucket(&name).await.unwrap();
        let err = Buckets::new(&cp)
            .get_one(&Filter::by_name(&name))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
