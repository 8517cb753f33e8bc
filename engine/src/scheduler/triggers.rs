// Trigger processing
//
// A status change of a job fires the triggers of its config. Each trigger
// spawns (or reuses) a job of its target config, assigned by the scorer.

use super::engine::{Engine, Pass};
use crate::assigner::{assign, Assignment, AssignmentRequest, CandidateInput};
use crate::availability::{AvailabilityCalculator, HolidayCalendar};
use crate::errors::{ConfigurationError, EngineResult};
use crate::models::{
    DryRunPreview, ExistingJobPolicy, Job, JobStatus, JobTrigger, Membership, Person,
};
use crate::notify::job_notifications;
use crate::rules::{Rule, RuleContext};
use crate::storage::JobStore;
use crate::telemetry;
use chrono::NaiveDate;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A team member with the first date they could take the job
struct MemberAvailability {
    membership: Membership,
    person: Person,
    available_date: NaiveDate,
}

impl Engine {
    /// Fire every trigger of the job's config that listens for its status
    pub(super) async fn fire_triggers<S: JobStore>(
        &self,
        store: &mut S,
        job: &Job,
        depth: u32,
        pass: &mut Pass,
    ) -> EngineResult<Vec<Job>> {
        let Some(config_id) = job.job_config_id else {
            return Ok(Vec::new());
        };

        let triggers: Vec<JobTrigger> = store
            .list_triggers_from(config_id)
            .await?
            .into_iter()
            .filter(|t| t.lifecycle.fires_on(job.status))
            .collect();
        if triggers.is_empty() {
            return Ok(Vec::new());
        }

        let max_depth = self.settings.max_trigger_depth;
        if depth >= max_depth {
            return Err(ConfigurationError::TriggerCascadeTooDeep {
                job_id: job.id,
                max_depth,
            }
            .into());
        }

        let mut created = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            created.push(self.create_from_trigger(store, job, &trigger, depth, pass).await?);
        }
        Ok(created)
    }

    #[instrument(skip(self, store, source, trigger, pass), fields(job_id = %source.id, trigger_id = %trigger.id))]
    async fn create_from_trigger<S: JobStore>(
        &self,
        store: &mut S,
        source: &Job,
        trigger: &JobTrigger,
        depth: u32,
        pass: &mut Pass,
    ) -> EngineResult<Job> {
        let existing = store
            .list_open_jobs_for_config(trigger.create_config_id, Some(source.id))
            .await?;

        if trigger.existing_job == ExistingJobPolicy::Skip {
            if let Some(job) = existing.first() {
                debug!(existing_job_id = %job.id, "Unfinished job exists, skipping");
                return Ok(job.clone());
            }
        }

        let assignment = self.select_assignee(store, trigger, source).await?;

        if trigger.existing_job == ExistingJobPolicy::Replace {
            // Jobs this pass already created or moved are still in use further up
            let stale: Vec<Uuid> = existing
                .iter()
                .map(|j| j.id)
                .filter(|id| !pass.touched.contains(id))
                .collect();
            for job_id in stale {
                store.delete_job(job_id).await?;
                pass.notifications.retain(|n| n.job_id != job_id);
                debug!(replaced_job_id = %job_id, "Replaced unfinished job");
            }
        }

        let create_config = store.get_job_config(trigger.create_config_id).await?;
        let mut job = Job::from_config(&create_config, assignment.membership_id, self.clock.now());
        job.due_date = Some(self.due_at(assignment.available_date));
        job.is_priority = trigger.urgent;
        job.explanation = assignment.explanation;

        store.insert_job(job.clone()).await?;
        pass.touched.insert(job.id);
        telemetry::record_job_created(&trigger.id);
        info!(
            new_job_id = %job.id,
            assignee_id = %job.assignee_id,
            due_date = ?job.due_date,
            "Job created from trigger"
        );

        // A job that moves straight on announces itself through that transition
        if !self.reconcile(store, job.clone(), depth + 1, pass).await? {
            let members = store.list_memberships(job.team_id).await?;
            pass.notifications.extend(job_notifications(&job, &members));
        }

        Ok(store.get_job(job.id).await?)
    }

    /// Score the source team's members for the trigger's next job
    pub async fn select_assignee<S: JobStore>(
        &self,
        store: &mut S,
        trigger: &JobTrigger,
        source: &Job,
    ) -> EngineResult<Assignment> {
        let from_config = store.get_job_config(trigger.from_config_id).await?;
        let create_config = store.get_job_config(trigger.create_config_id).await?;
        let team = store.get_team(from_config.team_id).await?;

        let available = self
            .member_availability(store, trigger, source, team.id, source.delay)
            .await?;

        let mut candidates = Vec::with_capacity(available.len());
        for entry in available {
            let team_balance = store.credit_balance(entry.membership.id, None).await?;
            let job_balance = store
                .credit_balance(entry.membership.id, Some(create_config.id))
                .await?;
            candidates.push(CandidateInput {
                membership_id: entry.membership.id,
                display_name: entry.person.display_name(),
                available_date: entry.available_date,
                team_balance,
                job_balance,
                random_value: self.random.next_value(),
            });
        }

        let request = AssignmentRequest {
            team: &team,
            job_name: &create_config.name,
            urgent: trigger.urgent,
        };
        Ok(assign(&request, candidates)?)
    }

    /// Preview the jobs the job's triggers would create for `action`,
    /// without writing anything
    #[instrument(skip(self, store), fields(job_id = %job_id))]
    pub async fn dry_run<S: JobStore>(
        &self,
        store: &mut S,
        job_id: Uuid,
        delay: u32,
        action: JobStatus,
    ) -> EngineResult<Vec<DryRunPreview>> {
        let job = store.get_job(job_id).await?;
        let Some(config_id) = job.job_config_id else {
            return Ok(Vec::new());
        };
        let from_config = store.get_job_config(config_id).await?;

        let triggers: Vec<JobTrigger> = store
            .list_triggers_from(config_id)
            .await?
            .into_iter()
            .filter(|t| t.lifecycle.fires_on(action))
            .collect();

        let mut previews = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let create_config = store.get_job_config(trigger.create_config_id).await?;
            let available = self
                .member_availability(store, &trigger, &job, from_config.team_id, delay)
                .await?;

            // First member wins when several share the earliest date
            let earliest = available
                .iter()
                .fold(None::<&MemberAvailability>, |best, entry| match best {
                    Some(b) if b.available_date <= entry.available_date => Some(b),
                    _ => Some(entry),
                })
                .ok_or(ConfigurationError::NoCandidates {
                    team_id: from_config.team_id,
                })?;

            previews.push(DryRunPreview {
                proposed_date: earliest.available_date,
                earliest_member_id: earliest.membership.id,
                trigger,
                create_config,
            });
        }
        Ok(previews)
    }

    /// Earliest date each team member could take the trigger's next job
    async fn member_availability<S: JobStore>(
        &self,
        store: &mut S,
        trigger: &JobTrigger,
        source: &Job,
        team_id: Uuid,
        delay: u32,
    ) -> EngineResult<Vec<MemberAvailability>> {
        let tz = self.settings.timezone;
        let now = self.clock.now();
        let today = now.with_timezone(&tz).date_naive();

        let rules: Vec<Rule> = store
            .list_rules(trigger.id)
            .await?
            .into_iter()
            .map(|r| r.rule)
            .collect();
        let calculator = AvailabilityCalculator::new(
            trigger.id,
            &rules,
            RuleContext::for_job(source, now, tz),
            today,
            self.settings.search_horizon_days,
        );

        let memberships = store.list_memberships(team_id).await?;
        if memberships.is_empty() {
            return Err(ConfigurationError::NoCandidates { team_id }.into());
        }

        let mut available = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let person = store.get_person(membership.person_id).await?;
            let holidays = store.list_holidays(person.id).await?;
            let calendar = HolidayCalendar::from_holidays(&holidays, tz);
            let available_date = calculator.earliest_date(&calendar, delay)?;
            available.push(MemberAvailability {
                membership,
                person,
                available_date,
            });
        }
        Ok(available)
    }
}
