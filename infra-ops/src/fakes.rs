//! In-memory control plane and scripted host used by the unit tests.

use std::{
    collections::HashMap,
    path::Path,
    sync::Mutex,
};

use crate::{
    cloud::{
        BlockDevice, Bucket, BucketOptions, ControlPlane, Instance, LaunchOptions, Volume,
        VolumeAttachment, PUBLIC_ACCESS_BLOCKED, STATE_PENDING, STATE_RUNNING, STATE_TERMINATED,
        STATUS_OK, UNKNOWN,
    },
    errors::{Error, Result},
    remote::{
        ps::PS_COMMAND,
        screen::{SCREEN_LIST, SCREEN_WIPE},
        transport::{CommandOutput, Privilege, Transport},
    },
};

pub fn instance(id: &str, name: &str, state: &str) -> Instance {
    Instance {
        instance_id: id.to_string(),
        name: name.to_string(),
        image_id: String::from("ami-097a2df4ac947655f"),
        instance_type: String::from("t2.micro"),
        key_name: String::from("test-key"),
        launched_at: None,
        state: state.to_string(),
        zone: String::from("us-east-2c"),
        public_ip: String::from(UNKNOWN),
        public_dns_name: String::from(UNKNOWN),
        security_group_names: Vec::new(),
        security_group_ids: Vec::new(),
        volumes: Vec::new(),
        termination_protection: false,
        instance_status: String::from(UNKNOWN),
        system_status: String::from(UNKNOWN),
    }
}

/// Number of "describe_instances" calls each transition takes.
const STEPS: u32 = 2;

#[derive(Default)]
struct CloudState {
    next_id: u32,
    instances: Vec<Instance>,
    volumes: Vec<Volume>,
    buckets: Vec<Bucket>,
    timers: HashMap<String, u32>,
    impaired: bool,
}

impl CloudState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Moves every in-flight instance one step closer to its next state.
    fn advance(&mut self) {
        let impaired = self.impaired;
        let mut deleted_volumes = Vec::new();
        for i in self.instances.iter_mut() {
            let timer = self.timers.entry(i.instance_id.clone()).or_insert(STEPS);
            let in_flight = i.state == STATE_PENDING
                || i.state == "shutting-down"
                || (i.state == STATE_RUNNING && i.system_status != STATUS_OK && !impaired);
            if !in_flight {
                continue;
            }
            *timer = timer.saturating_sub(1);
            if *timer > 0 {
                continue;
            }
            *timer = STEPS;

            match i.state.as_str() {
                STATE_PENDING => {
                    i.state = STATE_RUNNING.to_string();
                    i.instance_status = String::from("initializing");
                    i.system_status = String::from("initializing");
                }
                STATE_RUNNING => {
                    i.instance_status = STATUS_OK.to_string();
                    i.system_status = STATUS_OK.to_string();
                }
                _ => {
                    i.state = STATE_TERMINATED.to_string();
                    i.instance_status = String::from(UNKNOWN);
                    i.system_status = String::from(UNKNOWN);
                    for bd in i.volumes.drain(..) {
                        if bd.delete_on_termination {
                            deleted_volumes.push(bd.volume_id);
                        }
                    }
                }
            }
        }
        self.volumes.retain(|v| !deleted_volumes.contains(&v.volume_id));
    }

    fn instance_mut(&mut self, instance_id: &str) -> Result<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| Error::API {
                message: format!("InvalidInstanceID.NotFound: {instance_id}"),
                is_retryable: false,
            })
    }
}

/// Control plane whose instances move pending -> running -> healthy and
/// shutting-down -> terminated over successive listings.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<CloudState>,
}

impl FakeControlPlane {
    /// Keeps the system status check from ever passing.
    pub fn set_impaired(&self, impaired: bool) {
        self.state.lock().unwrap().impaired = impaired;
    }
}

impl ControlPlane for FakeControlPlane {
    fn region(&self) -> &str {
        "us-east-2"
    }

    async fn describe_instances(&self) -> Result<Vec<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.advance();
        Ok(state.instances.clone())
    }

    async fn describe_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn run_instance(&self, opts: &LaunchOptions) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let n = state.next_id();
        let instance_id = format!("i-{n:017x}");
        let volume_id = format!("vol-{n:017x}");

        let mut i = instance(&instance_id, &opts.name, STATE_PENDING);
        i.instance_type = opts.instance_type.clone();
        i.image_id = opts.image_id.clone();
        i.key_name = opts.key_name.clone();
        i.zone = opts.zone.clone();
        i.security_group_ids = opts
            .security_group_id
            .split(',')
            .map(|s| s.to_string())
            .collect();
        i.volumes = vec![BlockDevice {
            device: opts.device.clone(),
            volume_id: volume_id.clone(),
            status: String::from("attached"),
            delete_on_termination: opts.delete_on_termination,
        }];
        state.instances.push(i);

        state.volumes.push(Volume {
            volume_id,
            name: String::from(UNKNOWN),
            volume_type: String::from("gp2"),
            size_in_gb: opts.disk_size_in_gb,
            created_at: None,
            state: String::from("in-use"),
            zone: opts.zone.clone(),
            encrypted: false,
            attachments: vec![VolumeAttachment {
                instance_id: instance_id.clone(),
                device: opts.device.clone(),
                state: String::from("attached"),
            }],
        });
        Ok(instance_id)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let i = state.instance_mut(instance_id)?;
        if i.termination_protection {
            return Err(Error::API {
                message: format!("OperationNotPermitted: {instance_id} has termination protection"),
                is_retryable: false,
            });
        }
        if i.state != STATE_TERMINATED {
            i.state = String::from("shutting-down");
        }
        Ok(())
    }

    async fn describe_termination_protection(&self, instance_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state.instance_mut(instance_id)?.termination_protection)
    }

    async fn modify_termination_protection(&self, instance_id: &str, value: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.instance_mut(instance_id)?.termination_protection = value;
        Ok(())
    }

    async fn describe_buckets(&self, name: Option<&str>) -> Result<Vec<Bucket>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .buckets
            .iter()
            .filter(|b| name.map(|n| n == b.name).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn create_bucket(&self, opts: &BucketOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.buckets.iter().any(|b| b.name == opts.name) {
            return Err(Error::API {
                message: format!("BucketAlreadyOwnedByYou: {}", opts.name),
                is_retryable: false,
            });
        }
        state.buckets.push(Bucket {
            name: opts.name.clone(),
            created_at: None,
            encryption: String::from("AES256"),
            versioning: String::from("Enabled"),
            public_access: String::from(PUBLIC_ACCESS_BLOCKED),
            cors_allowed_origins: opts.cors_allowed_origins.clone(),
        });
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.buckets.len();
        state.buckets.retain(|b| b.name != name);
        if state.buckets.len() == before {
            return Err(Error::API {
                message: format!("NoSuchBucket: {name}"),
                is_retryable: false,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct HostState {
    next_pid: u32,
    /// (pid, command) in start order.
    processes: Vec<(u32, String)>,
    /// (pid, name) in start order.
    sessions: Vec<(u32, String)>,
    scripted: HashMap<String, CommandOutput>,
    invoked: Vec<(String, Privilege)>,
    unkillable: bool,
}

impl HostState {
    fn spawn(&mut self, command: &str) -> u32 {
        self.next_pid = self.next_pid.max(1000) + 1;
        self.processes.push((self.next_pid, command.to_string()));
        self.next_pid
    }

    fn screen_ls(&self) -> String {
        let dir = "/run/screen/S-ubuntu.";
        let rows: String = self
            .sessions
            .iter()
            .map(|(pid, name)| format!("\t{pid}.{name}\t(Detached)\n"))
            .collect();
        match self.sessions.len() {
            0 => format!("No Sockets found in {dir}\n"),
            1 => format!("There is a screen on:\n{rows}1 Socket in {dir}\n"),
            n => format!("There are screens on:\n{rows}{n} Sockets in {dir}\n"),
        }
    }

    fn ps(&self) -> String {
        let mut out = String::from("    PID COMMAND\n");
        for (pid, command) in self.processes.iter() {
            out.push_str(&format!("{pid:>7} {command}\n"));
        }
        out
    }

    fn handle(&mut self, command: &str) -> CommandOutput {
        let ok = |stdout: String| CommandOutput {
            stdout,
            stderr: String::new(),
            status: Some(0),
        };
        let fail = |stderr: String| CommandOutput {
            stdout: String::new(),
            stderr,
            status: Some(1),
        };

        if let Some(out) = self.scripted.get(command) {
            return out.clone();
        }
        if command == SCREEN_WIPE {
            return ok(self.screen_ls());
        }
        if command == SCREEN_LIST {
            return ok(self.screen_ls());
        }
        if command == PS_COMMAND {
            return ok(self.ps());
        }
        if let Some(pid) = command.strip_prefix("kill -9 ") {
            let pid: u32 = match pid.parse() {
                Ok(p) => p,
                Err(_) => return fail(format!("bash: line 1: kill: {pid}: arguments must be process or job IDs")),
            };
            if !self.processes.iter().any(|(p, _)| *p == pid) {
                return fail(format!("bash: line 1: kill: ({pid}) - No such process"));
            }
            if !self.unkillable {
                self.processes.retain(|(p, _)| *p != pid);
                self.sessions.retain(|(p, _)| *p != pid);
            }
            return ok(String::new());
        }
        if let Some(rest) = command.strip_prefix("screen -dmS ") {
            let name = rest.split(' ').next().unwrap_or_default().to_string();
            // the shell strips the quotes around the user command
            let pid = self.spawn(&format!("SCREEN -dmS {}", rest.replace('\'', "")));
            self.sessions.push((pid, name));
            return ok(String::new());
        }
        let program = command.split(' ').next().unwrap_or_default();
        fail(format!("bash: line 1: {program}: command not found"))
    }
}

/// Host that emulates "screen", "ps" and "kill", plus canned answers for
/// any other command registered with [`FakeHost::script`].
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn spawn(&self, command: &str) -> u32 {
        self.state.lock().unwrap().spawn(command)
    }

    pub fn set_unkillable(&self, unkillable: bool) {
        self.state.lock().unwrap().unkillable = unkillable;
    }

    pub fn script(&self, command: &str, stdout: &str, stderr: &str) {
        self.state.lock().unwrap().scripted.insert(
            command.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                status: Some(if stderr.is_empty() { 0 } else { 1 }),
            },
        );
    }

    /// Every command invoked so far, in order.
    pub fn invoked(&self) -> Vec<(String, Privilege)> {
        self.state.lock().unwrap().invoked.clone()
    }
}

impl Transport for FakeHost {
    fn target(&self) -> String {
        String::from("ubuntu@fake-host")
    }

    async fn invoke(&self, command: &str, privilege: Privilege) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.invoked.push((command.to_string(), privilege));
        Ok(state.handle(command))
    }

    async fn put(&self, _local: &Path, _remote: &str) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _remote: &str, _local: &Path) -> Result<()> {
        Ok(())
    }
}
