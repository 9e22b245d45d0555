use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::{
    cloud::{Filter, Lister},
    spec::DEFAULT_SESSION_STOP_TIMEOUT_SECONDS,
    errors::{Error, Result},
    reconcile::{ManagedResource, Predicate, Reconciler},
    remote::{
        ps::{self, Process, PS_COMMAND},
        screen::{self, RemoteSession, SCREEN_LIST, SCREEN_WIPE, SESSION_RUNNING},
        transport::Transport,
    },
};

pub const DEFAULT_STOP_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_SESSION_STOP_TIMEOUT_SECONDS);
pub const DEFAULT_STOP_INTERVAL: Duration = Duration::from_secs(1);

/// Which process "kill" targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    Pid(u32),
    /// Substring of the command line; must match exactly one process.
    Pattern(String),
}

/// Lists sessions on one host. Every listing wipes dead sessions first.
pub struct Sessions<'a, T> {
    transport: &'a T,
}

impl<'a, T: Transport> Sessions<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }
}

impl<'a, T: Transport> Lister for Sessions<'a, T> {
    type Record = RemoteSession;

    fn kind(&self) -> &'static str {
        "screen session"
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<RemoteSession>> {
        // "screen -wipe" and "screen -ls" exit non-zero when there is nothing
        // to report, but write to stdout only
        self.transport.execute(SCREEN_WIPE).await?;
        let (listed, _) = self.transport.execute(SCREEN_LIST).await?;
        let listed = screen::parse_list(&listed)?;
        if listed.is_empty() {
            return Ok(Vec::new());
        }

        let (table, _) = self.transport.execute(PS_COMMAND).await?;
        let processes = ps::parse(&table)?;
        Ok(screen::join(listed, &processes)
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect())
    }
}

/// Tracks detached "screen" sessions on a host: absent -> running -> absent.
pub struct SessionRegistry<'a, T> {
    transport: &'a T,
    stop_timeout: Duration,
    stop_interval: Duration,
}

impl<'a, T: Transport> SessionRegistry<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            stop_interval: DEFAULT_STOP_INTERVAL,
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Process list of the host without the caller's own processes.
    pub async fn ps(&self) -> Result<Vec<Process>> {
        ps::list(self.transport).await
    }

    /// Launches a detached session; returns the (usually empty) output.
    pub async fn start(&self, name: &str, command: &str, logfile: Option<&str>) -> Result<String> {
        screen::validate_name(name)?;
        log::info!("starting session '{}' on {}", name, self.transport.target());
        let (stdout, _) = self
            .transport
            .execute(&screen::start_command(name, command, logfile))
            .await?;
        Ok(stdout)
    }

    pub async fn list_sessions(&self) -> Result<Vec<RemoteSession>> {
        Sessions::new(self.transport).list(&Filter::all()).await
    }

    /// Sessions named exactly "name", or containing it when "exact" is false.
    pub async fn find(&self, name: &str, exact: bool) -> Result<Vec<RemoteSession>> {
        Sessions::new(self.transport)
            .list(&session_filter(name, exact))
            .await
    }

    /// Polls until exactly one session with this name is listed.
    pub async fn wait_running(
        &self,
        name: &str,
        reconciler: &Reconciler,
    ) -> Result<ManagedResource<RemoteSession>> {
        reconciler
            .wait_until(
                &Sessions::new(self.transport),
                &Filter::by_name(name),
                &Predicate::state_is(SESSION_RUNNING),
            )
            .await
    }

    /// Kills every matching session until none is listed or the stop
    /// budget runs out. Stopping nothing is not an error.
    pub async fn stop(&self, name: &str, exact: bool) -> Result<()> {
        let filter = session_filter(name, exact);
        let sessions = Sessions::new(self.transport);
        let deadline = Instant::now() + self.stop_timeout;

        let mut attempts = 0;
        let mut matching = sessions.list(&filter).await?;
        while !matching.is_empty() {
            if Instant::now() > deadline {
                return Err(Error::TimeoutExceeded {
                    message: format!("time expired while trying to stop all {filter} screens"),
                    attempts,
                    last_observed: format!("{:?}", matching),
                });
            }
            attempts += 1;

            for s in &matching {
                log::info!("stopping session '{}'", s.session_id);
                self.kill(KillTarget::Pid(s.pid)).await?;
            }
            self.transport.execute(SCREEN_WIPE).await?;

            sleep(self.stop_interval).await;
            matching = sessions.list(&filter).await?;
        }
        Ok(())
    }

    /// Sends SIGKILL to one process and returns the command's output.
    pub async fn kill(&self, target: KillTarget) -> Result<String> {
        let pid = match target {
            KillTarget::Pid(pid) => pid,
            KillTarget::Pattern(pattern) => {
                let processes = self.ps().await?;
                let mut matching: Vec<Process> = processes
                    .into_iter()
                    .filter(|p| p.command.contains(pattern.as_str()))
                    .collect();
                match matching.len() {
                    0 => {
                        return Err(Error::NotFound {
                            message: format!("pattern '{pattern}' does not match any process"),
                        })
                    }
                    1 => matching.remove(0).pid,
                    n => {
                        return Err(Error::Ambiguous {
                            message: format!(
                                "pattern '{pattern}' matches more than one process (N={n})"
                            ),
                        })
                    }
                }
            }
        };

        log::info!("killing {} on {}", pid, self.transport.target());
        let (stdout, _) = self.transport.execute(&format!("kill -9 {pid}")).await?;
        Ok(stdout)
    }
}

fn session_filter(name: &str, exact: bool) -> Filter {
    if exact {
        Filter::by_name(name)
    } else {
        Filter::name_containing(name)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{fakes::FakeHost, remote::transport::LocalTransport};

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::registry::tests::test_session_lifecycle --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_session_lifecycle() {
        let _ = env_logger::builder().is_test(true).try_init();

        let host = FakeHost::default();
        let registry = SessionRegistry::new(&host);
        assert!(registry.list_sessions().await.unwrap().is_empty());

        registry
            .start("testing-1", "while true; do date; sleep 2; done", Some("testing-1.screen.log"))
            .await
            .unwrap();
        registry.start("testing-2", "sleep 100", None).await.unwrap();
        registry.start("ticker", "date", None).await.unwrap();

        let resource = registry
            .wait_running("testing-1", &Reconciler::new(Duration::from_secs(1), 3))
            .await
            .unwrap();
        assert_eq!(resource.attempts, 1);

        let sessions = registry.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].name, "testing-1");
        assert_eq!(
            sessions[0].command.as_deref(),
            Some("while true; do date; sleep 2; done")
        );
        assert_eq!(sessions[1].command.as_deref(), Some("sleep 100"));

        // exact match leaves "testing-2" alone
        registry.stop("testing", true).await.unwrap();
        assert_eq!(registry.list_sessions().await.unwrap().len(), 3);

        registry.stop("testing-", false).await.unwrap();
        let names: Vec<String> = registry
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec![String::from("ticker")]);

        // stopping what is already gone succeeds
        registry.stop("testing-", false).await.unwrap();
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::registry::tests::test_stop_timeout --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout() {
        let host = FakeHost::default();
        host.set_unkillable(true);
        let registry = SessionRegistry::new(&host).with_stop_timeout(Duration::from_secs(3));
        registry.start("stubborn", "sleep 1000", None).await.unwrap();

        let started = Instant::now();
        let err = registry.stop("stubborn", true).await.unwrap_err();
        assert!(matches!(err, Error::TimeoutExceeded { .. }));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::registry::tests::test_kill --exact --show-output
    #[tokio::test]
    async fn test_kill() {
        let host = FakeHost::default();
        host.spawn("python3 ticker.py");
        host.spawn("python3 server.py --port 8080");
        let registry = SessionRegistry::new(&host);

        let err = registry
            .kill(KillTarget::Pattern(String::from("nothing-like-this")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = registry
            .kill(KillTarget::Pattern(String::from("python3")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ambiguous { .. }));

        registry
            .kill(KillTarget::Pattern(String::from("ticker")))
            .await
            .unwrap();
        let processes = registry.ps().await.unwrap();
        assert!(processes.iter().all(|p| !p.command.contains("ticker")));
        assert!(processes.iter().any(|p| p.command.contains("server.py")));

        // the host reports unknown pids on stderr
        let err = registry.kill(KillTarget::Pid(99999)).await.unwrap_err();
        assert!(matches!(err, Error::RemoteExecution { .. }));
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::registry::tests::test_start_rejects_names --exact --show-output
    #[tokio::test]
    async fn test_start_rejects_names() {
        let host = FakeHost::default();
        let registry = SessionRegistry::new(&host);

        for name in ["a;touch", "$(reboot)", "it's", "two words", ""] {
            assert!(registry.start(name, "date", None).await.is_err(), "{name}");
        }
        assert!(host.invoked().is_empty());

        registry.start("quoted", "date", Some("x;y")).await.unwrap();
        assert_eq!(
            host.invoked()[0].0,
            "screen -dmS quoted -L -Logfile 'x;y' bash -c 'date'"
        );
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- remote::registry::tests::test_kill_local_pattern --exact --show-output
    #[tokio::test]
    async fn test_kill_local_pattern() {
        let _ = env_logger::builder().is_test(true).try_init();

        let t = LocalTransport::default();
        let own_pids = t.own_pids().await.unwrap();
        assert_eq!(own_pids[0], std::process::id());

        let marker = format!("killme{}", random_manager::secure_string(12));
        let mut child = std::process::Command::new("sh")
            .args(["-c", &format!("sleep 30; : {marker}")])
            .spawn()
            .unwrap();

        // this test process and its ancestors are never candidates
        let registry = SessionRegistry::new(&t);
        let processes = registry.ps().await.unwrap();
        assert!(processes.iter().all(|p| !own_pids.contains(&p.pid)));
        assert!(processes.iter().all(|p| !p.command.contains(PS_COMMAND)));

        registry
            .kill(KillTarget::Pattern(marker.clone()))
            .await
            .unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());

        let err = registry
            .kill(KillTarget::Pattern(marker))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
