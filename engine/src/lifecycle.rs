// Job lifecycle state machine
//
// Pure half of the lifecycle: which transitions are legal, which status the
// clock implies, and how much credit a completion is worth.

use crate::models::{Job, JobConfig, JobStatus, JobVariant, TeamPolicy};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Whether a job may move from `from` to `to`
pub fn is_permitted(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Scheduled, Open)
            | (Scheduled, Overdue)
            | (Scheduled, Complete)
            | (Scheduled, Cancelled)
            | (Open, Overdue)
            | (Open, Complete)
            | (Open, Cancelled)
            | (Overdue, Complete)
            | (Overdue, Cancelled)
    )
}

/// Status the clock implies for a job.
///
/// Terminal jobs, jobs without a due date and jobs without a config keep their
/// status. Offsets of `None` or zero fall back to `default_window_days`.
pub fn derive_status(
    job: &Job,
    config: Option<&JobConfig>,
    now: DateTime<Utc>,
    default_window_days: u32,
) -> JobStatus {
    if job.status.is_terminal() {
        return job.status;
    }
    let (Some(due), Some(config)) = (job.due_date, config) else {
        return job.status;
    };

    let window = |days: Option<u32>| {
        let days = days.filter(|d| *d > 0).unwrap_or(default_window_days);
        Duration::days(i64::from(days))
    };
    let open_time = due - window(config.open_days);
    let failed_time = due + window(config.failed_days);

    if now > failed_time {
        JobStatus::Cancelled
    } else if now > due {
        JobStatus::Overdue
    } else if now > open_time {
        JobStatus::Open
    } else {
        job.status
    }
}

impl Job {
    /// Credit paid to someone who completes this job in place of its assignee.
    ///
    /// Closed jobs pay nothing. Open jobs pay the base credit plus the
    /// team's overdue inflation for each day past due, never below zero.
    pub fn grabbed_rate(&self, policy: &TeamPolicy, now: DateTime<Utc>) -> u32 {
        if self.status.is_terminal() {
            return 0;
        }
        let base = f64::from(self.default_credit);
        let days_overdue = self
            .due_date
            .map(|due| (now - due).num_days())
            .unwrap_or(0) as f64;
        let rate = base + base * days_overdue * policy.overdue_inflation;
        rate.max(0.0).round().min(f64::from(u32::MAX)) as u32
    }
}

/// Amount credited to `completed_by` for finishing `job`
pub fn credit_amount(
    job: &Job,
    variant: Option<&JobVariant>,
    completed_by: Uuid,
    policy: &TeamPolicy,
    now: DateTime<Utc>,
) -> u32 {
    let amount = variant.map_or(job.default_credit, |v| v.credit);
    if completed_by == job.assignee_id {
        return amount;
    }
    let grabbed = Job {
        default_credit: amount,
        ..job.clone()
    };
    grabbed.grabbed_rate(policy, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn job_due(due: &str, config: &JobConfig) -> Job {
        let mut job = Job::from_config(config, Uuid::new_v4(), at("2023-01-01T00:00:00Z"));
        job.due_date = Some(at(due));
        job
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for to in JobStatus::ALL {
            assert!(!is_permitted(JobStatus::Complete, to));
            assert!(!is_permitted(JobStatus::Cancelled, to));
        }
    }

    #[test]
    fn test_no_backwards_transitions() {
        assert!(!is_permitted(JobStatus::Open, JobStatus::Scheduled));
        assert!(!is_permitted(JobStatus::Overdue, JobStatus::Open));
        assert!(!is_permitted(JobStatus::Open, JobStatus::Open));
        assert!(is_permitted(JobStatus::Scheduled, JobStatus::Complete));
    }

    #[test]
    fn test_derive_status_windows() {
        let mut config = JobConfig::new(Uuid::new_v4(), "Bins", 5);
        config.open_days = Some(2);
        config.failed_days = Some(3);
        let job = job_due("2023-01-10T23:30:00Z", &config);

        let status = |now: &str| derive_status(&job, Some(&config), at(now), 3650);
        assert_eq!(status("2023-01-08T00:00:00Z"), JobStatus::Scheduled);
        assert_eq!(status("2023-01-09T00:00:00Z"), JobStatus::Open);
        assert_eq!(status("2023-01-11T00:00:00Z"), JobStatus::Overdue);
        assert_eq!(status("2023-01-14T00:00:00Z"), JobStatus::Cancelled);
    }

    #[test]
    fn test_derive_status_default_window() {
        let config = JobConfig::new(Uuid::new_v4(), "Bins", 5);
        let job = job_due("2023-01-10T23:30:00Z", &config);
        // Ten years of lead time means the job opens straight away
        assert_eq!(
            derive_status(&job, Some(&config), at("2023-01-01T00:00:00Z"), 3650),
            JobStatus::Open
        );
    }

    #[test]
    fn test_derive_status_leaves_unconfigured_jobs() {
        let config = JobConfig::new(Uuid::new_v4(), "Bins", 5);
        let mut job = job_due("2023-01-10T23:30:00Z", &config);
        assert_eq!(
            derive_status(&job, None, at("2030-01-01T00:00:00Z"), 3650),
            JobStatus::Scheduled
        );

        job.due_date = None;
        assert_eq!(
            derive_status(&job, Some(&config), at("2030-01-01T00:00:00Z"), 3650),
            JobStatus::Scheduled
        );

        job.status = JobStatus::Complete;
        assert_eq!(
            derive_status(&job, Some(&config), at("2030-01-01T00:00:00Z"), 3650),
            JobStatus::Complete
        );
    }

    #[test]
    fn test_grabbed_rate_inflates_when_overdue() {
        let config = JobConfig::new(Uuid::new_v4(), "Bins", 10);
        let job = job_due("2023-01-10T00:00:00Z", &config);
        let policy = TeamPolicy {
            overdue_inflation: 0.1,
            ..TeamPolicy::default()
        };
        assert_eq!(job.grabbed_rate(&policy, at("2023-01-10T00:00:00Z")), 10);
        assert_eq!(job.grabbed_rate(&policy, at("2023-01-15T00:00:00Z")), 15);
        // Before the due date the rate shrinks and stops at zero
        assert_eq!(job.grabbed_rate(&policy, at("2022-12-01T00:00:00Z")), 0);
    }

    #[test]
    fn test_grabbed_rate_is_zero_when_closed() {
        let config = JobConfig::new(Uuid::new_v4(), "Bins", 10);
        let mut job = job_due("2023-01-10T00:00:00Z", &config);
        job.status = JobStatus::Cancelled;
        assert_eq!(job.grabbed_rate(&TeamPolicy::default(), at("2023-01-15T00:00:00Z")), 0);
    }

    #[test]
    fn test_credit_amount_prefers_variant() {
        let config = JobConfig::new(Uuid::new_v4(), "Bathroom", 10);
        let job = job_due("2023-01-10T00:00:00Z", &config);
        let variant = JobVariant::new(config.id, "Deep clean", 25);
        let now = at("2023-01-09T00:00:00Z");
        let policy = TeamPolicy::default();

        assert_eq!(credit_amount(&job, None, job.assignee_id, &policy, now), 10);
        assert_eq!(credit_amount(&job, Some(&variant), job.assignee_id, &policy, now), 25);
        // No inflation configured, so a grab pays the plain amount
        assert_eq!(credit_amount(&job, Some(&variant), Uuid::new_v4(), &policy, now), 25);
    }
}
