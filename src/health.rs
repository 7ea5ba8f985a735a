//! Post-deploy health verification.
//!
//! Every round probes the services that are not yet healthy in parallel,
//! then sleeps for the poll interval. The wait is bounded by the timeout;
//! on timeout the best-known status of each service is returned.

use chrono::{DateTime, Utc};
use converge::{Cancellation, Clock};
use hostkit::{ContainerRuntime, ProbeResult};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
}

impl From<ProbeResult> for HealthState {
    fn from(probe: ProbeResult) -> Self {
        match probe {
            ProbeResult::Healthy => Self::Healthy,
            ProbeResult::Unhealthy => Self::Unhealthy,
            ProbeResult::Starting => Self::Starting,
            ProbeResult::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    /// Wall-clock time of the last probe, `None` if never probed
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

/// Polls container health probes until ready or out of time
pub struct HealthVerifier {
    runtime: Arc<dyn ContainerRuntime>,
    project: String,
    clock: Arc<dyn Clock>,
    cancel: Cancellation,
}

impl HealthVerifier {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, project: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            project: project.to_string(),
            clock,
            cancel: Cancellation::new(),
        }
    }

    /// Stop polling early when `cancel` fires
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll until every service is healthy or `timeout` elapses.
    ///
    /// Never blocks past `timeout`. Healthy services are not probed again.
    pub fn wait_until_ready(
        &self,
        services: &[String],
        timeout: Duration,
        poll_interval: Duration,
    ) -> BTreeMap<String, HealthStatus> {
        let mut statuses: BTreeMap<String, HealthStatus> = services
            .iter()
            .map(|s| (s.clone(), HealthStatus::default()))
            .collect();
        let deadline = self.clock.elapsed() + timeout;

        loop {
            let pending: Vec<&String> = statuses
                .iter()
                .filter(|(_, status)| !status.is_healthy())
                .map(|(name, _)| name)
                .collect();

            let results: Vec<(String, HealthState)> = pending
                .par_iter()
                .map(|name| (name.to_string(), self.probe(name)))
                .collect();

            let checked_at = Utc::now();
            for (name, state) in results {
                if let Some(status) = statuses.get_mut(&name) {
                    if status.state != state {
                        log::debug!("Service {} is {}", name, state);
                    }
                    status.state = state;
                    status.last_checked_at = Some(checked_at);
                }
            }

            if statuses.values().all(HealthStatus::is_healthy) {
                log::info!("All {} services healthy", statuses.len());
                break;
            }

            let now = self.clock.elapsed();
            if now >= deadline {
                let waiting: Vec<&str> = statuses
                    .iter()
                    .filter(|(_, s)| !s.is_healthy())
                    .map(|(n, _)| n.as_str())
                    .collect();
                log::warn!(
                    "Timed out after {}s waiting for {}",
                    timeout.as_secs(),
                    waiting.join(", ")
                );
                break;
            }
            if self.cancel.is_cancelled() {
                log::warn!("Health check cancelled");
                break;
            }

            self.clock.sleep(poll_interval.min(deadline - now));
        }

        statuses
    }

    fn probe(&self, service: &str) -> HealthState {
        match self.runtime.health_probe(&self.project, service) {
            Ok(probe) => probe.into(),
            Err(e) => {
                log::debug!("Health probe for {} failed: {}", service, e);
                HealthState::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::ManualClock;
    use hostkit::ServiceState;
    use std::path::Path;

    /// Runtime whose services turn healthy at fixed virtual times
    struct TimedRuntime {
        clock: Arc<ManualClock>,
        healthy_at: BTreeMap<&'static str, Option<Duration>>,
        unhealthy_until_ready: ProbeResult,
    }

    impl ContainerRuntime for TimedRuntime {
        fn is_available(&self) -> bool {
            true
        }

        fn apply_topology(&self, _: &Path, _: &str) -> hostkit::Result<()> {
            Ok(())
        }

        fn service_status(&self, _: &str, _: &str) -> hostkit::Result<ServiceState> {
            Ok(ServiceState::Running)
        }

        fn health_probe(&self, _project: &str, service: &str) -> hostkit::Result<ProbeResult> {
            match self.healthy_at.get(service).copied().flatten() {
                Some(at) if self.clock.elapsed() >= at => Ok(ProbeResult::Healthy),
                Some(_) | None => Ok(self.unhealthy_until_ready),
            }
        }
    }

    fn verifier(
        healthy_at: &[(&'static str, Option<u64>)],
        not_ready: ProbeResult,
    ) -> (HealthVerifier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let runtime = TimedRuntime {
            clock: clock.clone(),
            healthy_at: healthy_at
                .iter()
                .map(|(n, at)| (*n, at.map(Duration::from_secs)))
                .collect(),
            unhealthy_until_ready: not_ready,
        };
        (
            HealthVerifier::new(Arc::new(runtime), "web-1", clock.clone()),
            clock,
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_db_ready_cache_never_times_out_at_deadline() {
        let (verifier, clock) = verifier(
            &[("db", Some(10)), ("cache", None)],
            ProbeResult::Unhealthy,
        );
        let result = verifier.wait_until_ready(
            &names(&["db", "cache"]),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );

        assert_eq!(clock.elapsed(), Duration::from_secs(60));
        assert_eq!(result["db"].state, HealthState::Healthy);
        assert_eq!(result["cache"].state, HealthState::Unhealthy);
        assert!(result["cache"].last_checked_at.is_some());
    }

    #[test]
    fn test_returns_as_soon_as_all_healthy() {
        let (verifier, clock) = verifier(
            &[("db", Some(10)), ("cache", Some(12))],
            ProbeResult::Starting,
        );
        let result = verifier.wait_until_ready(
            &names(&["db", "cache"]),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        assert!(result.values().all(HealthStatus::is_healthy));
        assert_eq!(clock.elapsed(), Duration::from_secs(15));
    }

    #[test]
    fn test_never_sleeps_past_deadline() {
        let (verifier, clock) = verifier(&[("app", None)], ProbeResult::Starting);
        let result = verifier.wait_until_ready(
            &names(&["app"]),
            Duration::from_secs(7),
            Duration::from_secs(5),
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(7));
        // Best known status, not a failure
        assert_eq!(result["app"].state, HealthState::Starting);
    }

    #[test]
    fn test_cancellation_stops_polling() {
        let (verifier, clock) = verifier(&[("app", None)], ProbeResult::Starting);
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = verifier
            .with_cancellation(cancel)
            .wait_until_ready(&names(&["app"]), Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(result["app"].state, HealthState::Starting);
    }

    #[test]
    fn test_empty_service_list() {
        let (verifier, clock) = verifier(&[], ProbeResult::Unknown);
        assert!(verifier
            .wait_until_ready(&[], Duration::from_secs(60), Duration::from_secs(5))
            .is_empty());
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
