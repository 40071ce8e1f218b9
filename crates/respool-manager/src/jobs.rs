//! Read-only view of the external job registry.
//!
//! Workers advertise their in-flight job keyed by `(hostname, pid)`; the
//! supervisor only ever reads it, to log a diagnostic before signalling a
//! bloated worker. Lookups that fail for any reason return `None` and the
//! kill proceeds.

use chrono::{DateTime, NaiveDateTime, Utc};

/// What a worker reported it is currently doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Human-readable job description.
    pub description: String,
    /// Raw timestamp the job started at, as the worker recorded it.
    pub run_at: Option<String>,
}

impl JobSnapshot {
    /// Seconds the job has been running at `now`.
    ///
    /// Unparseable or missing `run_at` values count as 0 so a worker with a
    /// mangled record still gets a diagnostic line rather than none.
    pub fn runtime_secs(&self, now: DateTime<Utc>) -> i64 {
        let Some(raw) = self.run_at.as_deref() else {
            return 0;
        };
        match parse_run_at(raw) {
            Some(started) => (now - started).num_seconds().max(0),
            None => 0,
        }
    }
}

fn parse_run_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Read-only job registry lookup.
pub trait JobRegistry: Send + Sync {
    /// The job the worker at `(hostname, pid)` is currently running, if the
    /// registry knows of one.
    fn current_job(&self, hostname: &str, pid: u32) -> Option<JobSnapshot>;
}

/// Registry that knows nothing; diagnostics are simply skipped.
#[derive(Debug, Default)]
pub struct NoJobRegistry;

impl JobRegistry for NoJobRegistry {
    fn current_job(&self, _hostname: &str, _pid: u32) -> Option<JobSnapshot> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_runtime_from_rfc3339() {
        let job = JobSnapshot {
            description: "resize images".to_string(),
            run_at: Some("2024-05-01T12:00:00Z".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 30).unwrap();
        assert_eq!(job.runtime_secs(now), 330);
    }

    #[test]
    fn test_runtime_from_naive_timestamp() {
        let job = JobSnapshot {
            description: "send mail".to_string(),
            run_at: Some("2024-05-01 12:00:00".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 45).unwrap();
        assert_eq!(job.runtime_secs(now), 45);
    }

    #[test]
    fn test_unparseable_run_at_is_zero() {
        let job = JobSnapshot {
            description: "???".to_string(),
            run_at: Some("yesterday-ish".to_string()),
        };
        assert_eq!(job.runtime_secs(Utc::now()), 0);

        let job = JobSnapshot {
            description: "???".to_string(),
            run_at: None,
        };
        assert_eq!(job.runtime_secs(Utc::now()), 0);
    }

    #[test]
    fn test_no_registry_returns_nothing() {
        assert!(NoJobRegistry.current_job("host", 1).is_none());
    }
}
