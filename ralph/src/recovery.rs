//! Wait-and-recheck loop for transient API failures.
//!
//! The loop walks a fixed list of waits. Before each wait it notifies the
//! operator, then sleeps, then probes the API. The first healthy probe ends
//! the loop; running out of waits is a failure. This sleep is the only place
//! the pipeline blocks on purpose.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::TaskRef;
use crate::io::audit_log::{AuditEvent, AuditLog};
use crate::io::console;
use crate::io::health::HealthCheck;
use crate::io::notify::{Notification, Notifier, notify};

/// Suspension point of the recovery loop.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    /// Health probes performed.
    pub probes: usize,
}

/// Collaborators the loop needs.
pub struct RecoveryDeps<'a> {
    pub health: &'a dyn HealthCheck,
    pub sleeper: &'a dyn Sleeper,
    pub notifier: &'a dyn Notifier,
    pub audit: &'a AuditLog,
}

/// Run one pass over `delays`; returns on the first healthy probe.
#[instrument(skip_all, fields(task = %task, waits = delays.len()))]
pub fn recovery_loop(
    task: &TaskRef,
    delays: &[Duration],
    deps: &RecoveryDeps<'_>,
) -> Result<RecoveryOutcome> {
    let max_attempts = delays.len();
    for (i, delay) in delays.iter().enumerate() {
        let attempt = i + 1;
        notify(
            deps.notifier,
            Notification::RecoveryStart {
                attempt,
                max_attempts,
                delay: *delay,
            },
        );
        console::info(&format!(
            "Recovery attempt {attempt}/{max_attempts} in {}",
            describe_delay(*delay)
        ));
        info!(attempt, delay_secs = delay.as_secs(), "waiting before health check");

        deps.sleeper.sleep(*delay);
        let report = deps.health.check();

        deps.audit.record(AuditEvent::RecoveryProbe {
            attempt,
            max_attempts,
            delay_secs: delay.as_secs(),
            status: report.status.as_str().to_string(),
            message: report.message.clone(),
        })?;

        if report.status.is_healthy() {
            notify(
                deps.notifier,
                Notification::RecoverySuccess { task: task.clone() },
            );
            console::success("API recovered");
            info!(attempt, "api recovered");
            return Ok(RecoveryOutcome {
                recovered: true,
                probes: attempt,
            });
        }
        warn!(attempt, status = report.status.as_str(), "api still unhealthy");
        console::dim(&format!("{}: {}", report.status.as_str(), report.message));
    }

    Ok(RecoveryOutcome {
        recovered: false,
        probes: max_attempts,
    })
}

fn describe_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs >= 60 {
        format!("{} min", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::health::HealthStatus;
    use crate::test_support::{RecordingNotifier, RecordingSleeper, ScriptedHealthCheck};

    fn delays(secs: &[u64]) -> Vec<Duration> {
        secs.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn stops_at_first_healthy_probe() {
        let temp = tempfile::tempdir().expect("tempdir");
        let audit = AuditLog::create(&temp.path().join("session.jsonl")).expect("audit");
        let health = ScriptedHealthCheck::new(vec![HealthStatus::RateLimited, HealthStatus::Healthy]);
        let sleeper = RecordingSleeper::default();
        let notifier = RecordingNotifier::default();
        let deps = RecoveryDeps {
            health: &health,
            sleeper: &sleeper,
            notifier: &notifier,
            audit: &audit,
        };

        let outcome =
            recovery_loop(&TaskRef::new("shop", 1), &delays(&[600, 1200, 1800]), &deps)
                .expect("recovery");
        assert_eq!(
            outcome,
            RecoveryOutcome {
                recovered: true,
                probes: 2
            }
        );
        assert_eq!(health.calls(), 2);
        assert_eq!(sleeper.slept(), delays(&[600, 1200]));
        assert_eq!(
            notifier.kinds(),
            vec!["recovery_start", "recovery_start", "recovery_success"]
        );
    }

    #[test]
    fn exhausts_every_wait_when_never_healthy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let audit = AuditLog::create(&temp.path().join("session.jsonl")).expect("audit");
        let health = ScriptedHealthCheck::always(HealthStatus::Overloaded);
        let sleeper = RecordingSleeper::default();
        let notifier = RecordingNotifier::default();
        let deps = RecoveryDeps {
            health: &health,
            sleeper: &sleeper,
            notifier: &notifier,
            audit: &audit,
        };

        let outcome = recovery_loop(&TaskRef::new("shop", 1), &delays(&[1, 1, 1]), &deps)
            .expect("recovery");
        assert!(!outcome.recovered);
        assert_eq!(outcome.probes, 3);
        assert_eq!(health.calls(), 3);
        assert_eq!(sleeper.slept().len(), 3);
        assert!(!notifier.kinds().contains(&"recovery_success"));
    }

    #[test]
    fn formats_delays_for_operators() {
        assert_eq!(describe_delay(Duration::from_secs(1200)), "20 min");
        assert_eq!(describe_delay(Duration::from_secs(5)), "5s");
    }
}
