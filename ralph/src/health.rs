//! `ralph health`: one probe, reported as an exit code.

use tracing::instrument;

use crate::io::console;
use crate::io::health::HealthCheck;

/// Probe once and return the `ralph health` exit code.
#[instrument(skip_all)]
pub fn run_health(check: &dyn HealthCheck, verbose: bool) -> i32 {
    let report = check.check();
    if report.status.is_healthy() {
        console::success("API healthy");
    } else {
        console::error(&format!("API unhealthy: {}", report.status.as_str()));
    }
    if verbose {
        console::kv("Status", report.status.as_str());
        console::kv("Message", &report.message);
    }
    report.status.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;
    use crate::io::health::HealthStatus;
    use crate::test_support::ScriptedHealthCheck;

    #[test]
    fn maps_status_to_exit_code() {
        let cases = [
            (HealthStatus::Healthy, exit_codes::health::HEALTHY),
            (HealthStatus::AuthError, exit_codes::health::AUTH_ERROR),
            (HealthStatus::RateLimited, exit_codes::health::RATE_LIMITED),
            (HealthStatus::OtherError, exit_codes::health::OTHER_ERROR),
            (HealthStatus::Overloaded, exit_codes::health::OVERLOADED),
        ];
        for (status, code) in cases {
            let check = ScriptedHealthCheck::always(status);
            assert_eq!(run_health(&check, true), code);
            assert_eq!(check.calls(), 1);
        }
    }
}
