// Integration tests for the housework scheduling engine
// These tests drive whole workflows through the in-memory store: assignment
// transcripts, trigger cascades, credit and the housekeeping sweep.

use chrono::{DateTime, Duration, Utc};
use engine::clock::{Clock, FixedClock};
use engine::config::{HousekeepingConfig, SchedulingConfig};
use engine::errors::EngineError;
use engine::models::{
    Credit, ExistingJobPolicy, Holiday, Job, JobConfig, JobStatus, JobTrigger, LifecycleFlags,
    Membership, MembershipRole, Person, Team, TeamPolicy,
};
use engine::notify::{EventType, MemoryNotifier, Subject};
use engine::random::SequenceRandom;
use engine::storage::{JobStore, MemoryStore, StoreProvider, Transaction};
use engine::{Engine, Housekeeper, NewJob};
use std::sync::Arc;

const NON_URGENT_TRANSCRIPT: &str = "# Scheduling Load the dishwasher

## User One

- Available from: 2023-01-12
- Has 10 credit on job Load the dishwasher
- Has 10 credit in team Test Team
- Gets 0.20 random value

## User Two

- Available from: 2023-01-05
- Has 0 credit on job Load the dishwasher
- Has 20 credit in team Test Team
- Gets 0.30 random value

## Scoring

| Candidate | Random | Team | Job | Score |
| - | - | - | - | - |
| User One |0.20 * 10 |0.00 * 10 |0.08 * 10 |2.83 |
| User Two |0.30 * 10 |0.02 * 10 |0.00 * 10 |3.17 |

## Result

User One is selected.
";

const URGENT_TRANSCRIPT: &str = "# Scheduling Load the dishwasher

## User One

- Available from: 2023-01-12
- Has 10 credit on job Load the dishwasher
- Has 10 credit in team Test Team
- Gets 0.20 random value

## User Two

- Available from: 2023-01-05
- Has 0 credit on job Load the dishwasher
- Has 20 credit in team Test Team
- Gets 0.30 random value

## Availability

Some candidates were removed due to lack of availability.

## Scoring

| Candidate | Random | Team | Job | Score |
| - | - | - | - | - |
| User Two |0.30 * 10 |0.02 * 10 |0.00 * 10 |3.17 |

## Result

User Two is selected.
";

fn at(s: &str) -> DateTime<Utc> {
    s.parse().expect("Invalid timestamp")
}

/// Two-person household with a dishwasher chore that reschedules itself
struct Household {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    notifier: Arc<MemoryNotifier>,
    random: Arc<SequenceRandom>,
    team: Team,
    user_one: Membership,
    user_two: Membership,
    holiday: Holiday,
    dishwasher: JobConfig,
    laundry: JobConfig,
    trigger: JobTrigger,
    dishwasher_job: Job,
}

async fn household(policy: TeamPolicy) -> Household {
    let clock = Arc::new(FixedClock::new(at("2023-01-01T00:00:00Z")));
    let notifier = Arc::new(MemoryNotifier::new());
    let random = Arc::new(SequenceRandom::new(vec![0.2, 0.3]));
    let settings = SchedulingConfig {
        timezone: chrono_tz::UTC,
        ..SchedulingConfig::default()
    };
    let engine = Arc::new(
        Engine::new(settings, clock.clone(), random.clone(), notifier.clone())
            .expect("Failed to build engine"),
    );

    let store = Arc::new(MemoryStore::new());
    let mut tx = store.begin().await.unwrap();

    let team = engine
        .create_team(&mut tx, Team::new("Test Team", policy))
        .await
        .unwrap();

    let one = Person::new("user_1", "User", "One");
    let two = Person::new("user_2", "User", "Two");
    let user_one = Membership::new(one.id, team.id, MembershipRole::Admin);
    let user_two = Membership::new(two.id, team.id, MembershipRole::Member);
    let now = clock.now();
    let holiday = Holiday::new(one.id, now, now + Duration::days(10));
    tx.insert_person(one).await.unwrap();
    tx.insert_person(two).await.unwrap();
    tx.insert_membership(user_one.clone()).await.unwrap();
    tx.insert_membership(user_two.clone()).await.unwrap();
    tx.insert_holiday(holiday.clone()).await.unwrap();

    let dishwasher = JobConfig::new(team.id, "Load the dishwasher", 10);
    let laundry = JobConfig::new(team.id, "Load of laundry", 20);
    tx.insert_job_config(dishwasher.clone()).await.unwrap();
    tx.insert_job_config(laundry.clone()).await.unwrap();

    let trigger = JobTrigger::new(
        dishwasher.id,
        dishwasher.id,
        LifecycleFlags::on(JobStatus::Complete),
    );
    tx.insert_trigger(trigger.clone()).await.unwrap();
    let validation = engine
        .add_schedule_rule(
            &mut tx,
            trigger.id,
            "DaysSince",
            &serde_json::json!({"event": "closed", "days": 4}),
        )
        .await
        .unwrap();
    assert!(validation.ok, "{}", validation.message);

    // Finished history that gives each member some credit
    let mut dishwasher_job = Job::from_config(&dishwasher, user_one.id, now);
    dishwasher_job.status = JobStatus::Complete;
    dishwasher_job.closed_date = Some(now);
    dishwasher_job.completed_by_id = Some(user_one.id);
    let mut laundry_job = Job::from_config(&laundry, user_two.id, now);
    laundry_job.status = JobStatus::Complete;
    laundry_job.closed_date = Some(now);
    laundry_job.completed_by_id = Some(user_two.id);
    tx.insert_job(dishwasher_job.clone()).await.unwrap();
    tx.insert_job(laundry_job.clone()).await.unwrap();
    tx.insert_credit(Credit::new(dishwasher_job.id, user_one.id, 10, now))
        .await
        .unwrap();
    tx.insert_credit(Credit::new(laundry_job.id, user_two.id, 20, now))
        .await
        .unwrap();

    tx.commit().await.unwrap();

    Household {
        engine,
        store,
        clock,
        notifier,
        random,
        team,
        user_one,
        user_two,
        holiday,
        dishwasher,
        laundry,
        trigger,
        dishwasher_job,
    }
}

async fn set_urgent(h: &mut Household) {
    let mut tx = h.store.begin().await.unwrap();
    h.trigger.urgent = true;
    tx.update_trigger(&h.trigger).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_assignment_transcript_when_not_urgent() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let assignment = h
        .engine
        .select_assignee(&mut tx, &h.trigger, &h.dishwasher_job)
        .await
        .unwrap();

    assert_eq!(assignment.explanation, NON_URGENT_TRANSCRIPT);
    assert_eq!(assignment.membership_id, h.user_one.id);
    assert_eq!(assignment.available_date.to_string(), "2023-01-12");
    assert_eq!(h.random.draws(), 2);
}

#[tokio::test]
async fn test_assignment_transcript_when_urgent() {
    let mut h = household(TeamPolicy::default()).await;
    set_urgent(&mut h).await;
    let mut tx = h.store.begin().await.unwrap();

    let assignment = h
        .engine
        .select_assignee(&mut tx, &h.trigger, &h.dishwasher_job)
        .await
        .unwrap();

    assert_eq!(assignment.explanation, URGENT_TRANSCRIPT);
    assert_eq!(assignment.membership_id, h.user_two.id);
    assert_eq!(assignment.available_date.to_string(), "2023-01-05");
}

#[tokio::test]
async fn test_urgent_assignment_after_holiday_removed() {
    let mut h = household(TeamPolicy::default()).await;
    set_urgent(&mut h).await;
    let mut tx = h.store.begin().await.unwrap();
    tx.delete_holiday(h.holiday.id).await.unwrap();

    let assignment = h
        .engine
        .select_assignee(&mut tx, &h.trigger, &h.dishwasher_job)
        .await
        .unwrap();

    let expected = NON_URGENT_TRANSCRIPT.replace(
        "Available from: 2023-01-12",
        "Available from: 2023-01-05",
    );
    assert_eq!(assignment.explanation, expected);
    assert_eq!(assignment.membership_id, h.user_one.id);
}

#[tokio::test]
async fn test_find_other_policy_filters_like_urgent() {
    let policy = TeamPolicy {
        when_on_holiday: engine::models::HolidayPolicy::FindOther,
        ..TeamPolicy::default()
    };
    let h = household(policy).await;
    let mut tx = h.store.begin().await.unwrap();

    let assignment = h
        .engine
        .select_assignee(&mut tx, &h.trigger, &h.dishwasher_job)
        .await
        .unwrap();

    assert_eq!(assignment.explanation, URGENT_TRANSCRIPT);
}

#[tokio::test]
async fn test_completing_a_job_schedules_the_next_one() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let job = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.dishwasher, h.user_two.id))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Scheduled);

    let closed = h
        .engine
        .close_job(&mut tx, job.id, JobStatus::Complete, h.user_two.id, None, 0)
        .await
        .unwrap();
    assert_eq!(closed.status, JobStatus::Complete);
    assert_eq!(closed.completed_by_id, Some(h.user_two.id));
    assert_eq!(closed.closed_date, Some(h.clock.now()));

    let credits = tx.list_credits_for_job(job.id).await.unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, 10);

    let next = tx
        .list_open_jobs_for_config(h.dishwasher.id, None)
        .await
        .unwrap();
    assert_eq!(next.len(), 1);
    let next = &next[0];
    // Unset open window falls back to ten years, so the job opens at once
    assert_eq!(next.status, JobStatus::Open);
    assert_eq!(next.assignee_id, h.user_one.id);
    assert_eq!(next.due_date, Some(at("2023-01-12T23:30:00Z")));
    assert!(!next.is_priority);
    assert!(next.explanation.starts_with("# Scheduling Load the dishwasher\n"));
    assert!(next.explanation.ends_with("User One is selected.\n"));
}

#[tokio::test]
async fn test_skip_policy_reuses_unfinished_job() {
    let h = household(TeamPolicy::default()).await;
    assert_eq!(h.trigger.existing_job, ExistingJobPolicy::Skip);
    let mut tx = h.store.begin().await.unwrap();

    let first = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.dishwasher, h.user_two.id))
        .await
        .unwrap();
    let second = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.dishwasher, h.user_two.id))
        .await
        .unwrap();

    h.engine
        .close_job(&mut tx, first.id, JobStatus::Complete, h.user_two.id, None, 0)
        .await
        .unwrap();

    let unfinished = tx
        .list_open_jobs_for_config(h.dishwasher.id, None)
        .await
        .unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, second.id);
    // No candidates were scored
    assert_eq!(h.random.draws(), 0);
}

#[tokio::test]
async fn test_closed_job_cannot_reopen() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let changed = h
        .engine
        .set_status(&mut tx, h.dishwasher_job.id, JobStatus::Open, None, None)
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(
        tx.get_job(h.dishwasher_job.id).await.unwrap().status,
        JobStatus::Complete
    );

    let result = h
        .engine
        .close_job(
            &mut tx,
            h.dishwasher_job.id,
            JobStatus::Cancelled,
            h.user_one.id,
            None,
            0,
        )
        .await;
    assert!(matches!(result, Err(EngineError::TransitionRejected { .. })));
}

#[tokio::test]
async fn test_grabbing_an_overdue_job_pays_inflated_credit() {
    let policy = TeamPolicy {
        overdue_inflation: 0.5,
        ..TeamPolicy::default()
    };
    let h = household(policy).await;
    let mut tx = h.store.begin().await.unwrap();

    let mut request = NewJob::one_off(h.team.id, "Descale the kettle", 10, h.user_one.id);
    request.due_date = Some(at("2022-12-29T23:30:00Z"));
    let job = h.engine.create_job(&mut tx, request).await.unwrap();

    h.engine
        .close_job(&mut tx, job.id, JobStatus::Complete, h.user_two.id, None, 0)
        .await
        .unwrap();

    let credits = tx.list_credits_for_job(job.id).await.unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].membership_id, h.user_two.id);
    // Two whole days late at 50% a day
    assert_eq!(credits[0].amount, 20);
}

#[tokio::test]
async fn test_outsider_cannot_close_job() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let other = h
        .engine
        .create_team(&mut tx, Team::new("Next Door", TeamPolicy::default()))
        .await
        .unwrap();
    let neighbour = Person::new("user_3", "User", "Three");
    let outsider = Membership::new(neighbour.id, other.id, MembershipRole::Member);
    tx.insert_person(neighbour).await.unwrap();
    tx.insert_membership(outsider.clone()).await.unwrap();

    let job = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.laundry, h.user_one.id))
        .await
        .unwrap();
    let result = h
        .engine
        .close_job(&mut tx, job.id, JobStatus::Complete, outsider.id, None, 0)
        .await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
}

#[tokio::test]
async fn test_completion_notifies_every_member() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let job = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.laundry, h.user_one.id))
        .await
        .unwrap();
    h.notifier.clear().await;

    h.engine
        .close_job(&mut tx, job.id, JobStatus::Complete, h.user_two.id, None, 0)
        .await
        .unwrap();

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 2);
    for notification in &sent {
        assert_eq!(notification.event_type, EventType::JobComplete);
        assert_eq!(notification.title, "Load of laundry");
        assert_eq!(notification.url, format!("/jobs/{}", job.id));
    }
    let to_one = sent.iter().find(|n| n.recipient_id == h.user_one.id).unwrap();
    let to_two = sent.iter().find(|n| n.recipient_id == h.user_two.id).unwrap();
    assert!(to_one.subjects.contains(&Subject::Assignee));
    assert!(!to_one.subjects.contains(&Subject::CompletedBy));
    assert!(to_two.subjects.contains(&Subject::CompletedBy));
    assert!(to_two.subjects.contains(&Subject::Team));
}

#[tokio::test]
async fn test_dry_run_previews_without_writing() {
    let h = household(TeamPolicy::default()).await;
    let mut tx = h.store.begin().await.unwrap();

    let job = h
        .engine
        .create_job(&mut tx, NewJob::from_config(&h.dishwasher, h.user_one.id))
        .await
        .unwrap();
    let jobs_before = tx.list_jobs_by_status(&JobStatus::ALL).await.unwrap().len();

    let previews = h
        .engine
        .dry_run(&mut tx, job.id, 0, JobStatus::Complete)
        .await
        .unwrap();

    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].trigger.id, h.trigger.id);
    assert_eq!(previews[0].create_config.id, h.dishwasher.id);
    assert_eq!(previews[0].proposed_date.to_string(), "2023-01-05");
    assert_eq!(previews[0].earliest_member_id, h.user_two.id);
    assert_eq!(
        tx.list_jobs_by_status(&JobStatus::ALL).await.unwrap().len(),
        jobs_before
    );
}

#[tokio::test]
async fn test_housekeeping_marks_late_jobs_overdue() {
    let h = household(TeamPolicy::default()).await;
    {
        let mut tx = h.store.begin().await.unwrap();
        let job = h
            .engine
            .create_job(&mut tx, NewJob::from_config(&h.dishwasher, h.user_two.id))
            .await
            .unwrap();
        h.engine
            .close_job(&mut tx, job.id, JobStatus::Complete, h.user_two.id, None, 0)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }
    h.notifier.clear().await;
    h.clock.set(at("2023-01-13T00:00:00Z"));

    let housekeeper = Housekeeper::new(
        h.engine.clone(),
        h.store.clone(),
        HousekeepingConfig::default(),
    );
    let report = housekeeper.run_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.transitioned, 1);
    assert_eq!(report.failed, 0);

    let state = h.store.snapshot().await;
    let overdue: Vec<&Job> = state
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Overdue)
        .collect();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].assignee_id, h.user_one.id);

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.event_type == EventType::JobOverdue));

    // Nothing left to change on a second pass
    let report = housekeeper.run_once().await.unwrap();
    assert_eq!(report.transitioned, 0);
}

#[tokio::test]
async fn test_uncommitted_work_is_discarded() {
    let h = household(TeamPolicy::default()).await;
    let job_id = {
        let mut tx = h.store.begin().await.unwrap();
        let job = h
            .engine
            .create_job(&mut tx, NewJob::from_config(&h.laundry, h.user_one.id))
            .await
            .unwrap();
        job.id
    };

    let tx = h.store.begin().await.unwrap();
    assert!(tx.get_job(job_id).await.unwrap_err().is_not_found());
}
