//! Bounded polling loop that drives a resource toward a desired predicate.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::{
    cloud::{Filter, Instance, Lister, Observed, STATUS_OK},
    errors::{Error, Result},
};

/// Observed state recorded when a poll returns no record.
pub const STATE_ABSENT: &str = "absent";

/// Tracks a single resource across the polls of one reconciliation.
#[derive(Debug, Clone)]
pub struct ManagedResource<R> {
    pub id: String,
    pub name: String,
    pub desired_state: String,
    pub observed_state: String,
    /// Most recent observation, "None" once the resource is gone.
    pub observed: Option<R>,
    pub last_checked_at: DateTime<Utc>,
    /// Number of polls spent so far.
    pub attempts: usize,
}

impl<R: Observed> ManagedResource<R> {
    pub fn new(filter: &Filter, desired_state: &str) -> Self {
        Self {
            id: filter.id.clone().unwrap_or_default(),
            name: filter.name.clone().unwrap_or_default(),
            desired_state: desired_state.to_string(),
            observed_state: String::new(),
            observed: None,
            last_checked_at: Utc::now(),
            attempts: 0,
        }
    }

    fn observe(&mut self, record: Option<R>) {
        self.attempts += 1;
        self.last_checked_at = Utc::now();
        match &record {
            Some(r) => {
                self.id = r.id().to_string();
                self.name = r.name().to_string();
                self.observed_state = r.state().to_string();
            }
            None => {
                self.observed_state = STATE_ABSENT.to_string();
            }
        }
        self.observed = record;
    }

    /// Returns the final record, failing if the resource ended up absent.
    pub fn into_record(self) -> Result<R> {
        let name = self.name;
        self.observed.ok_or_else(|| Error::NotFound {
            message: format!("'{name}' was reconciled to absent"),
        })
    }
}

/// Desired-state check evaluated against the freshest observation.
pub struct Predicate<R> {
    description: String,
    check: Box<dyn Fn(Option<&R>) -> bool>,
}

impl<R> fmt::Debug for Predicate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .finish()
    }
}

impl<R> Predicate<R> {
    pub fn new(description: impl Into<String>, check: impl Fn(Option<&R>) -> bool + 'static) -> Self {
        Self {
            description: description.into(),
            check: Box::new(check),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn holds(&self, observed: Option<&R>) -> bool {
        (self.check)(observed)
    }
}

impl<R: Observed> Predicate<R> {
    /// Present and in the given state.
    pub fn state_is(state: &str) -> Self {
        let want = state.to_string();
        Self::new(state, move |r: Option<&R>| {
            r.map(|r| r.state() == want).unwrap_or(false)
        })
    }

    /// In the given (terminal) state or no longer listed at all.
    pub fn state_is_or_absent(state: &str) -> Self {
        let want = state.to_string();
        Self::new(format!("{state} or {STATE_ABSENT}"), move |r: Option<&R>| {
            r.map(|r| r.state() == want).unwrap_or(true)
        })
    }

    pub fn absent() -> Self {
        Self::new(STATE_ABSENT, |r: Option<&R>| r.is_none())
    }
}

/// Both the instance check and the system check must report "ok".
pub fn instance_healthy() -> Predicate<Instance> {
    Predicate::new("healthy", |r: Option<&Instance>| match r {
        Some(i) => i.instance_status == STATUS_OK && i.system_status == STATUS_OK,
        None => false,
    })
}

/// Bounded poll loop: sleeps, lists, evaluates, and gives up after
/// "max_attempts" polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    pub poll_interval: Duration,
    pub max_attempts: usize,
}

impl Reconciler {
    pub fn new(poll_interval: Duration, max_attempts: usize) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }

    /// Derives the attempt count from a wall-clock budget (at least one poll).
    pub fn with_timeout(timeout: Duration, poll_interval: Duration) -> Self {
        let max_attempts = if poll_interval.is_zero() {
            1
        } else {
            let n = timeout.as_millis().div_ceil(poll_interval.as_millis());
            usize::try_from(n).unwrap_or(usize::MAX).max(1)
        };
        Self::new(poll_interval, max_attempts)
    }

    /// Upper bound on the time spent sleeping in one reconciliation.
    pub fn budget(&self) -> Duration {
        self.poll_interval
            .saturating_mul(u32::try_from(self.max_attempts).unwrap_or(u32::MAX))
    }

    /// Polls until the predicate holds for the single record matching the
    /// filter (or its absence), returning the tracked resource.
    ///
    /// Lister errors propagate unchanged; more than one match is "Ambiguous".
    pub async fn wait_until<L: Lister>(
        &self,
        lister: &L,
        filter: &Filter,
        predicate: &Predicate<L::Record>,
    ) -> Result<ManagedResource<L::Record>> {
        log::info!(
            "reconciling {} {} to '{}' (interval {:?}, max attempts {})",
            lister.kind(),
            filter,
            predicate.description(),
            self.poll_interval,
            self.max_attempts
        );

        let mut resource = ManagedResource::new(filter, predicate.description());
        for _ in 0..self.max_attempts {
            sleep(self.poll_interval).await;

            let mut records = lister.list(filter).await?;
            if records.len() > 1 {
                return Err(Error::Ambiguous {
                    message: format!(
                        "{} {} matched {} records while reconciling",
                        lister.kind(),
                        filter,
                        records.len()
                    ),
                });
            }
            resource.observe(records.pop());
            log::info!(
                "poll {}/{} for {} {}: observed '{}'",
                resource.attempts,
                self.max_attempts,
                lister.kind(),
                filter,
                resource.observed_state
            );

            if predicate.holds(resource.observed.as_ref()) {
                log::info!(
                    "{} {} reached '{}'",
                    lister.kind(),
                    filter,
                    predicate.description()
                );
                return Ok(resource);
            }
        }

        log::warn!(
            "{} {} did not reach '{}' in {} attempt(s)",
            lister.kind(),
            filter,
            predicate.description(),
            resource.attempts
        );
        Err(Error::TimeoutExceeded {
            message: format!(
                "{} {} did not reach '{}'",
                lister.kind(),
                filter,
                predicate.description()
            ),
            attempts: resource.attempts,
            last_observed: format!("{:?}", resource.observed),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Probe {
        id: String,
        state: String,
    }

    impl Observed for Probe {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.id
        }
        fn state(&self) -> &str {
            &self.state
        }
    }

    fn probe(state: &str) -> Probe {
        Probe {
            id: String::from("i-1"),
            state: state.to_string(),
        }
    }

    /// Replays one listing per call, repeating the last one forever.
    struct ScriptedLister {
        script: Mutex<VecDeque<Vec<Probe>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLister {
        fn new(script: Vec<Vec<Probe>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Lister for ScriptedLister {
        type Record = Probe;

        fn kind(&self) -> &'static str {
            "probe"
        }

        async fn list(&self, _filter: &Filter) -> Result<Vec<Probe>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap_or_default())
            }
        }
    }

    struct FailingLister;

    impl Lister for FailingLister {
        type Record = Probe;

        fn kind(&self) -> &'static str {
            "probe"
        }

        async fn list(&self, _filter: &Filter) -> Result<Vec<Probe>> {
            Err(Error::API {
                message: String::from("throttled"),
                is_retryable: true,
            })
        }
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_wait_until_success --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_success() {
        let _ = env_logger::builder().is_test(true).try_init();

        let lister = ScriptedLister::new(vec![
            vec![probe("pending")],
            vec![probe("pending")],
            vec![probe("running")],
        ]);
        let reconciler = Reconciler::new(Duration::from_secs(5), 24);

        let started = tokio::time::Instant::now();
        let resource = reconciler
            .wait_until(&lister, &Filter::by_id("i-1"), &Predicate::state_is("running"))
            .await
            .unwrap();

        assert_eq!(resource.attempts, 3);
        assert_eq!(resource.observed_state, "running");
        assert_eq!(resource.desired_state, "running");
        assert_eq!(resource.observed, Some(probe("running")));
        assert_eq!(lister.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_wait_until_first_poll --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_first_poll() {
        let lister = ScriptedLister::new(vec![vec![probe("running")]]);
        let reconciler = Reconciler::new(Duration::from_secs(5), 24);

        let started = tokio::time::Instant::now();
        let resource = reconciler
            .wait_until(&lister, &Filter::by_id("i-1"), &Predicate::state_is("running"))
            .await
            .unwrap();

        assert_eq!(lister.calls(), 1);
        assert_eq!(resource.attempts, 1);
        assert_eq!(started.elapsed(), reconciler.poll_interval);
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_wait_until_timeout --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_timeout() {
        let _ = env_logger::builder().is_test(true).try_init();

        let lister = ScriptedLister::new(vec![vec![probe("pending")]]);
        let reconciler = Reconciler::new(Duration::from_secs(5), 4);

        let started = tokio::time::Instant::now();
        let err = reconciler
            .wait_until(&lister, &Filter::by_id("i-1"), &Predicate::state_is("running"))
            .await
            .unwrap_err();

        assert_eq!(lister.calls(), 4);
        assert!(started.elapsed() >= Duration::from_secs(20));
        match err {
            Error::TimeoutExceeded {
                attempts,
                last_observed,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert!(last_observed.contains("pending"));
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_never_true_predicate --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_never_true_predicate() {
        let lister = ScriptedLister::new(vec![vec![probe("running")]]);
        let reconciler = Reconciler::new(Duration::from_secs(1), 3);
        let never = Predicate::new("never", |_: Option<&Probe>| false);

        let err = reconciler
            .wait_until(&lister, &Filter::all(), &never)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimeoutExceeded { attempts: 3, .. }));
        assert_eq!(lister.calls(), 3);
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_absent_predicates --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_absent_predicates() {
        let lister = ScriptedLister::new(vec![
            vec![probe("shutting-down")],
            vec![probe("terminated")],
            vec![],
        ]);
        let reconciler = Reconciler::new(Duration::from_secs(5), 10);

        let resource = reconciler
            .wait_until(
                &lister,
                &Filter::by_id("i-1"),
                &Predicate::state_is_or_absent("terminated"),
            )
            .await
            .unwrap();
        assert_eq!(resource.attempts, 2);
        assert_eq!(resource.observed_state, "terminated");

        let resource = reconciler
            .wait_until(&lister, &Filter::by_id("i-1"), &Predicate::absent())
            .await
            .unwrap();
        assert_eq!(resource.observed_state, STATE_ABSENT);
        assert!(resource.observed.is_none());
        assert!(resource.into_record().is_err());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_ambiguous_and_errors --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_and_errors() {
        let lister = ScriptedLister::new(vec![vec![probe("running"), probe("running")]]);
        let reconciler = Reconciler::new(Duration::from_secs(1), 5);

        let err = reconciler
            .wait_until(&lister, &Filter::all(), &Predicate::state_is("running"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ambiguous { .. }));
        assert_eq!(lister.calls(), 1);

        let err = reconciler
            .wait_until(&FailingLister, &Filter::all(), &Predicate::absent())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_instance_healthy --exact --show-output
    #[test]
    fn test_instance_healthy() {
        let mut i = crate::fakes::instance("i-1", "test-1", "running");
        let healthy = instance_healthy();
        assert!(!healthy.holds(None));
        assert!(!healthy.holds(Some(&i)));

        i.instance_status = String::from("ok");
        assert!(!healthy.holds(Some(&i)));

        i.system_status = String::from("initializing");
        assert!(!healthy.holds(Some(&i)));

        i.system_status = String::from("ok");
        assert!(healthy.holds(Some(&i)));
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- reconcile::tests::test_with_timeout --exact --show-output
    #[test]
    fn test_with_timeout() {
        let r = Reconciler::with_timeout(Duration::from_secs(120), Duration::from_secs(5));
        assert_eq!(r.max_attempts, 24);
        assert_eq!(r.budget(), Duration::from_secs(120));

        let r = Reconciler::with_timeout(Duration::from_secs(11), Duration::from_secs(5));
        assert_eq!(r.max_attempts, 3);

        let r = Reconciler::with_timeout(Duration::from_secs(0), Duration::from_secs(5));
        assert_eq!(r.max_attempts, 1);
    }
}
