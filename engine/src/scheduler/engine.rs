// Lifecycle orchestration
//
// Applies status transitions together with their side effects: credit,
// trigger firing and notifications. Every operation works inside the store
// transaction it is handed; notifications are held back until it succeeds.

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::errors::{ConfigurationError, EngineError, EngineResult, ValidationError};
use crate::lifecycle::{credit_amount, derive_status, is_permitted};
use crate::models::{
    Credit, Job, JobConfig, JobScheduleRule, JobStatus, JobVariant, SweepReport, Team,
};
use crate::notify::{job_notifications, Notification, Notifier};
use crate::random::RandomSource;
use crate::rules::{validate_rule, Rule, RuleValidation};
use crate::storage::{JobStore, StoreProvider, Transaction};
use crate::telemetry;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Side effects collected while an operation runs
#[derive(Debug, Default)]
pub(crate) struct Pass {
    pub(crate) notifications: Vec<Notification>,
    /// Jobs created or transitioned so far; never replaced by a trigger
    pub(crate) touched: HashSet<Uuid>,
}

/// Request to create a job by hand
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub team_id: Uuid,
    /// Config the job is an instance of; one-off jobs leave this unset
    pub job_config_id: Option<Uuid>,
    /// Required for one-off jobs, overrides the config name otherwise
    pub name: Option<String>,
    pub description: Option<String>,
    /// Required for one-off jobs, overrides the config credit otherwise
    pub default_credit: Option<u32>,
    pub assignee_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub is_priority: bool,
    /// Mark the job complete by its assignee straight after creating it
    pub complete_now: bool,
    pub variant_id: Option<Uuid>,
}

impl NewJob {
    pub fn one_off(team_id: Uuid, name: impl Into<String>, credit: u32, assignee_id: Uuid) -> Self {
        Self {
            team_id,
            job_config_id: None,
            name: Some(name.into()),
            description: None,
            default_credit: Some(credit),
            assignee_id,
            due_date: None,
            is_priority: false,
            complete_now: false,
            variant_id: None,
        }
    }

    pub fn from_config(config: &JobConfig, assignee_id: Uuid) -> Self {
        Self {
            team_id: config.team_id,
            job_config_id: Some(config.id),
            name: None,
            description: None,
            default_credit: None,
            assignee_id,
            due_date: None,
            is_priority: false,
            complete_now: false,
            variant_id: None,
        }
    }
}

/// Scheduling engine
pub struct Engine {
    pub(super) settings: SchedulingConfig,
    pub(super) due_time: NaiveTime,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) random: Arc<dyn RandomSource>,
    pub(super) notifier: Arc<dyn Notifier>,
}

impl Engine {
    /// Create a new engine; fails if the configured due time does not parse
    pub fn new(
        settings: SchedulingConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigurationError> {
        let due_time = settings.due_time()?;
        Ok(Self {
            settings,
            due_time,
            clock,
            random,
            notifier,
        })
    }

    pub fn settings(&self) -> &SchedulingConfig {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// UTC instant of the configured due time on a local date
    pub fn due_at(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.due_time);
        self.settings
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }

    /// Store a team once its policy is known to be usable
    #[instrument(skip(self, store, team), fields(team_id = %team.id))]
    pub async fn create_team<S: JobStore>(&self, store: &mut S, team: Team) -> EngineResult<Team> {
        team.policy.validate()?;
        store.insert_team(team.clone()).await?;
        info!(team_name = %team.name, "Team created");
        Ok(team)
    }

    /// Validate and append a rule to a trigger. Invalid rules are reported in
    /// the returned validation and not stored.
    #[instrument(skip(self, store, params))]
    pub async fn add_schedule_rule<S: JobStore>(
        &self,
        store: &mut S,
        trigger_id: Uuid,
        rule_type: &str,
        params: &serde_json::Value,
    ) -> EngineResult<RuleValidation> {
        store.get_trigger(trigger_id).await?;

        let validation = validate_rule(rule_type, params);
        if !validation.ok {
            debug!(message = %validation.message, "Rejected schedule rule");
            return Ok(validation);
        }

        let rule = Rule::from_parts(rule_type, params.clone())?;
        let position = store.list_rules(trigger_id).await?.len() as u32;
        store
            .insert_rule(JobScheduleRule::new(trigger_id, position, rule))
            .await?;
        Ok(validation)
    }

    /// Move a job to `desired`. Returns false without touching anything when
    /// the transition is not allowed.
    #[instrument(skip(self, store), fields(job_id = %job_id, status = %desired))]
    pub async fn set_status<S: JobStore>(
        &self,
        store: &mut S,
        job_id: Uuid,
        desired: JobStatus,
        completed_by: Option<Uuid>,
        variant_id: Option<Uuid>,
    ) -> EngineResult<bool> {
        let job = store.get_job(job_id).await?;
        let variant = match variant_id {
            Some(id) => Some(store.get_job_variant(id).await?),
            None => None,
        };

        let mut pass = Pass::default();
        let changed = self
            .apply_status(store, job, desired, completed_by, variant, 0, &mut pass)
            .await?;
        self.dispatch(pass).await;
        Ok(changed)
    }

    /// Close a job on behalf of a team member
    #[instrument(skip(self, store), fields(job_id = %job_id, status = %status))]
    pub async fn close_job<S: JobStore>(
        &self,
        store: &mut S,
        job_id: Uuid,
        status: JobStatus,
        membership_id: Uuid,
        variant_id: Option<Uuid>,
        delay: u32,
    ) -> EngineResult<Job> {
        if !status.is_terminal() {
            return Err(ValidationError::InvalidFieldValue {
                field: "status".to_string(),
                reason: format!("{} does not close a job", status),
            }
            .into());
        }

        let mut job = store.get_job(job_id).await?;
        let member = store.get_membership(membership_id).await?;
        if member.team_id != job.team_id {
            return Err(EngineError::Forbidden(format!(
                "membership {} is not part of team {}",
                member.id, job.team_id
            )));
        }

        let variant = match variant_id {
            Some(id) => {
                let variant = store.get_job_variant(id).await?;
                if job.job_config_id != Some(variant.job_config_id) {
                    return Err(ValidationError::InvalidFieldValue {
                        field: "variant".to_string(),
                        reason: format!("variant {} does not belong to this job", id),
                    }
                    .into());
                }
                Some(variant)
            }
            None => None,
        };

        if !is_permitted(job.status, status) {
            return Err(EngineError::TransitionRejected {
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }

        job.delay = delay;
        store.update_job(&job).await?;

        let completed_by = (status == JobStatus::Complete).then_some(member.id);
        let mut pass = Pass::default();
        self.apply_status(store, job, status, completed_by, variant, 0, &mut pass)
            .await?;
        self.dispatch(pass).await;

        Ok(store.get_job(job_id).await?)
    }

    /// Create a job by hand, then let the clock and triggers catch up with it
    #[instrument(skip(self, store, request), fields(team_id = %request.team_id))]
    pub async fn create_job<S: JobStore>(&self, store: &mut S, request: NewJob) -> EngineResult<Job> {
        let now = self.clock.now();
        let assignee = store.get_membership(request.assignee_id).await?;
        if assignee.team_id != request.team_id {
            return Err(EngineError::Forbidden(format!(
                "membership {} is not part of team {}",
                assignee.id, request.team_id
            )));
        }

        let mut job = match request.job_config_id {
            Some(config_id) => {
                let config = store.get_job_config(config_id).await?;
                if config.team_id != request.team_id {
                    return Err(EngineError::Forbidden(format!(
                        "job config {} belongs to another team",
                        config.id
                    )));
                }
                let mut job = Job::from_config(&config, assignee.id, now);
                if let Some(name) = request.name {
                    job.name = name;
                }
                if let Some(credit) = request.default_credit {
                    job.default_credit = credit;
                }
                job
            }
            None => {
                let name = request
                    .name
                    .ok_or_else(|| ValidationError::MissingField("name".to_string()))?;
                let credit = request
                    .default_credit
                    .ok_or_else(|| ValidationError::MissingField("default_credit".to_string()))?;
                Job::one_off(request.team_id, name, credit, assignee.id, now)
            }
        };
        if request.description.is_some() {
            job.description = request.description;
        }
        job.due_date = request.due_date;
        job.is_priority = request.is_priority;

        let variant = match request.variant_id {
            Some(id) => {
                let variant = store.get_job_variant(id).await?;
                if job.job_config_id != Some(variant.job_config_id) {
                    return Err(ValidationError::InvalidFieldValue {
                        field: "variant".to_string(),
                        reason: format!("variant {} does not belong to this job", id),
                    }
                    .into());
                }
                Some(variant)
            }
            None => None,
        };

        store.insert_job(job.clone()).await?;
        info!(job_id = %job.id, job_name = %job.name, "Job created");

        let mut pass = Pass::default();
        pass.touched.insert(job.id);
        self.fire_triggers(store, &job, 0, &mut pass).await?;
        if !self.reconcile(store, job.clone(), 0, &mut pass).await? {
            let members = store.list_memberships(job.team_id).await?;
            pass.notifications.extend(job_notifications(&job, &members));
        }

        if request.complete_now {
            let current = store.get_job(job.id).await?;
            self.apply_status(
                store,
                current,
                JobStatus::Complete,
                Some(assignee.id),
                variant,
                0,
                &mut pass,
            )
            .await?;
        }

        self.dispatch(pass).await;
        Ok(store.get_job(job.id).await?)
    }

    /// Bring one job's status in line with the clock
    #[instrument(skip(self, store), fields(job_id = %job_id))]
    pub async fn process_job<S: JobStore>(&self, store: &mut S, job_id: Uuid) -> EngineResult<bool> {
        let job = store.get_job(job_id).await?;
        let mut pass = Pass::default();
        let changed = self.reconcile(store, job, 0, &mut pass).await?;
        self.dispatch(pass).await;
        Ok(changed)
    }

    /// Re-derive the status of every active job, one transaction per job.
    ///
    /// A job that fails is logged and counted; the sweep carries on.
    #[instrument(skip(self, provider))]
    pub async fn process_all_open_jobs<P: StoreProvider>(&self, provider: &P) -> EngineResult<SweepReport> {
        let ids: Vec<Uuid> = {
            let tx = provider.begin().await?;
            tx.list_jobs_by_status(&JobStatus::ACTIVE)
                .await?
                .into_iter()
                .map(|job| job.id)
                .collect()
        };

        let mut report = SweepReport {
            examined: ids.len(),
            ..SweepReport::default()
        };

        for job_id in ids {
            match self.sweep_job(provider, job_id).await {
                Ok(true) => report.transitioned += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    let reason = match &e {
                        EngineError::Configuration(_) => "configuration",
                        EngineError::Storage(_) => "storage",
                        _ => "other",
                    };
                    telemetry::record_sweep_failure(reason);
                    error!(job_id = %job_id, error = %e, "Failed to process job");
                }
            }
        }

        if report.transitioned > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                transitioned = report.transitioned,
                failed = report.failed,
                "Sweep finished"
            );
        } else {
            debug!(examined = report.examined, "Sweep finished with no changes");
        }
        Ok(report)
    }

    async fn sweep_job<P: StoreProvider>(&self, provider: &P, job_id: Uuid) -> EngineResult<bool> {
        let mut tx = provider.begin().await?;
        let job = match tx.get_job(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                // Removed by an earlier job's trigger in this sweep
                debug!(job_id = %job_id, "Job vanished before it was swept");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let mut pass = Pass::default();
        let changed = self.reconcile(&mut tx, job, 0, &mut pass).await?;
        tx.commit().await?;
        self.dispatch(pass).await;
        Ok(changed)
    }

    /// Apply the clock-derived status if it differs from the stored one
    pub(super) fn reconcile<'a, S: JobStore + 'a>(
        &'a self,
        store: &'a mut S,
        job: Job,
        depth: u32,
        pass: &'a mut Pass,
    ) -> BoxFuture<'a, EngineResult<bool>> {
        Box::pin(async move {
            let config = match job.job_config_id {
                Some(id) => match store.get_job_config(id).await {
                    Ok(config) => Some(config),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };

            let desired = derive_status(
                &job,
                config.as_ref(),
                self.clock.now(),
                self.settings.default_window_days,
            );
            if desired == job.status {
                return Ok(false);
            }
            self.apply_status(store, job, desired, None, None, depth, pass)
                .await
        })
    }

    /// Transition with side effects. The job is saved before triggers fire so
    /// trigger queries see its new status.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn apply_status<'a, S: JobStore + 'a>(
        &'a self,
        store: &'a mut S,
        mut job: Job,
        desired: JobStatus,
        completed_by: Option<Uuid>,
        variant: Option<JobVariant>,
        depth: u32,
        pass: &'a mut Pass,
    ) -> BoxFuture<'a, EngineResult<bool>> {
        Box::pin(async move {
            let before = job.status;
            if !is_permitted(before, desired) {
                debug!(job_id = %job.id, from = %before, to = %desired, "Transition rejected");
                return Ok(false);
            }

            pass.touched.insert(job.id);
            let now = self.clock.now();

            if desired == JobStatus::Complete {
                let completer = completed_by.unwrap_or(job.assignee_id);
                let team = store.get_team(job.team_id).await?;
                // Priced before the status change; closed jobs have no grabbed rate
                let amount = credit_amount(&job, variant.as_ref(), completer, &team.policy, now);
                store
                    .insert_credit(Credit::new(job.id, completer, amount, now))
                    .await?;
                telemetry::record_credit_awarded(amount);
                job.completed_by_id = Some(completer);
            }

            job.status = desired;
            if desired.is_terminal() {
                job.closed_date = Some(now);
            }
            store.update_job(&job).await?;
            telemetry::record_transition(before, desired);
            info!(job_id = %job.id, from = %before, to = %desired, "Job status changed");

            self.fire_triggers(store, &job, depth, pass).await?;

            let members = store.list_memberships(job.team_id).await?;
            pass.notifications.extend(job_notifications(&job, &members));
            Ok(true)
        })
    }

    pub(super) async fn dispatch(&self, pass: Pass) {
        for notification in pass.notifications {
            let job_id = notification.job_id;
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(job_id = %job_id, error = %e, "Failed to deliver notification");
            }
        }
    }
}
