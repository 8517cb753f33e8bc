// In-memory transactional store
//
// A transaction holds the store lock for its whole life and works on a copy
// of the tables, so transactions are serialised and uncommitted writes vanish.

use super::{JobStore, StoreProvider, Transaction};
use crate::errors::StorageError;
use crate::models::{
    Credit, Holiday, Job, JobConfig, JobScheduleRule, JobStatus, JobTrigger, JobVariant,
    Membership, Person, Team,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Every table of the store
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub teams: Vec<Team>,
    pub people: Vec<Person>,
    pub memberships: Vec<Membership>,
    pub holidays: Vec<Holiday>,
    pub job_configs: Vec<JobConfig>,
    pub job_variants: Vec<JobVariant>,
    pub jobs: Vec<Job>,
    pub triggers: Vec<JobTrigger>,
    pub rules: Vec<JobScheduleRule>,
    pub credits: Vec<Credit>,
}

fn find<'a, T>(
    rows: &'a [T],
    entity: &'static str,
    id: Uuid,
    key: impl Fn(&T) -> Uuid,
) -> Result<&'a T, StorageError> {
    rows.iter()
        .find(|row| key(row) == id)
        .ok_or(StorageError::not_found(entity, id))
}

fn insert<T>(
    rows: &mut Vec<T>,
    entity: &'static str,
    row: T,
    key: impl Fn(&T) -> Uuid,
) -> Result<(), StorageError> {
    let id = key(&row);
    if rows.iter().any(|existing| key(existing) == id) {
        return Err(StorageError::Conflict(format!(
            "{} {} already exists",
            entity, id
        )));
    }
    rows.push(row);
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed tables
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl StoreProvider for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction { guard, working })
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<(), StorageError> {
        let MemoryTransaction { mut guard, working } = self;
        *guard = working;
        debug!("Memory transaction committed");
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryTransaction {
    async fn get_team(&self, id: Uuid) -> Result<Team, StorageError> {
        find(&self.working.teams, "Team", id, |t| t.id).cloned()
    }

    async fn insert_team(&mut self, team: Team) -> Result<(), StorageError> {
        insert(&mut self.working.teams, "Team", team, |t| t.id)
    }

    async fn list_memberships(&self, team_id: Uuid) -> Result<Vec<Membership>, StorageError> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn get_membership(&self, id: Uuid) -> Result<Membership, StorageError> {
        find(&self.working.memberships, "Membership", id, |m| m.id).cloned()
    }

    async fn insert_membership(&mut self, membership: Membership) -> Result<(), StorageError> {
        find(&self.working.teams, "Team", membership.team_id, |t| t.id)?;
        find(&self.working.people, "Person", membership.person_id, |p| p.id)?;
        insert(
            &mut self.working.memberships,
            "Membership",
            membership,
            |m| m.id,
        )
    }

    async fn get_person(&self, id: Uuid) -> Result<Person, StorageError> {
        find(&self.working.people, "Person", id, |p| p.id).cloned()
    }

    async fn insert_person(&mut self, person: Person) -> Result<(), StorageError> {
        insert(&mut self.working.people, "Person", person, |p| p.id)
    }

    async fn list_holidays(&self, person_id: Uuid) -> Result<Vec<Holiday>, StorageError> {
        Ok(self
            .working
            .holidays
            .iter()
            .filter(|h| h.person_id == person_id)
            .cloned()
            .collect())
    }

    async fn insert_holiday(&mut self, holiday: Holiday) -> Result<(), StorageError> {
        insert(&mut self.working.holidays, "Holiday", holiday, |h| h.id)
    }

    async fn delete_holiday(&mut self, id: Uuid) -> Result<(), StorageError> {
        find(&self.working.holidays, "Holiday", id, |h| h.id)?;
        self.working.holidays.retain(|h| h.id != id);
        Ok(())
    }

    async fn get_job_config(&self, id: Uuid) -> Result<JobConfig, StorageError> {
        find(&self.working.job_configs, "JobConfig", id, |c| c.id).cloned()
    }

    async fn insert_job_config(&mut self, config: JobConfig) -> Result<(), StorageError> {
        insert(&mut self.working.job_configs, "JobConfig", config, |c| c.id)
    }

    async fn get_job_variant(&self, id: Uuid) -> Result<JobVariant, StorageError> {
        find(&self.working.job_variants, "JobVariant", id, |v| v.id).cloned()
    }

    async fn insert_job_variant(&mut self, variant: JobVariant) -> Result<(), StorageError> {
        insert(&mut self.working.job_variants, "JobVariant", variant, |v| v.id)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StorageError> {
        find(&self.working.jobs, "Job", id, |j| j.id).cloned()
    }

    async fn insert_job(&mut self, job: Job) -> Result<(), StorageError> {
        insert(&mut self.working.jobs, "Job", job, |j| j.id)
    }

    async fn update_job(&mut self, job: &Job) -> Result<(), StorageError> {
        let slot = self
            .working
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(StorageError::not_found("Job", job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn delete_job(&mut self, id: Uuid) -> Result<(), StorageError> {
        find(&self.working.jobs, "Job", id, |j| j.id)?;
        self.working.jobs.retain(|j| j.id != id);
        self.working.credits.retain(|c| c.job_id != id);
        Ok(())
    }

    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StorageError> {
        Ok(self
            .working
            .jobs
            .iter()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect())
    }

    async fn list_open_jobs_for_config(
        &self,
        config_id: Uuid,
        excluding: Option<Uuid>,
    ) -> Result<Vec<Job>, StorageError> {
        Ok(self
            .working
            .jobs
            .iter()
            .filter(|j| j.job_config_id == Some(config_id))
            .filter(|j| Some(j.id) != excluding)
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_triggers_from(&self, config_id: Uuid) -> Result<Vec<JobTrigger>, StorageError> {
        Ok(self
            .working
            .triggers
            .iter()
            .filter(|t| t.from_config_id == config_id)
            .cloned()
            .collect())
    }

    async fn get_trigger(&self, id: Uuid) -> Result<JobTrigger, StorageError> {
        find(&self.working.triggers, "JobTrigger", id, |t| t.id).cloned()
    }

    async fn insert_trigger(&mut self, trigger: JobTrigger) -> Result<(), StorageError> {
        find(&self.working.job_configs, "JobConfig", trigger.from_config_id, |c| c.id)?;
        find(&self.working.job_configs, "JobConfig", trigger.create_config_id, |c| c.id)?;
        insert(&mut self.working.triggers, "JobTrigger", trigger, |t| t.id)
    }

    async fn update_trigger(&mut self, trigger: &JobTrigger) -> Result<(), StorageError> {
        let slot = self
            .working
            .triggers
            .iter_mut()
            .find(|t| t.id == trigger.id)
            .ok_or(StorageError::not_found("JobTrigger", trigger.id))?;
        *slot = trigger.clone();
        Ok(())
    }

    async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<JobScheduleRule>, StorageError> {
        let mut rules: Vec<JobScheduleRule> = self
            .working
            .rules
            .iter()
            .filter(|r| r.trigger_id == trigger_id)
            .cloned()
            .collect();
        // Stable, so equal positions keep insertion order
        rules.sort_by_key(|r| r.position);
        Ok(rules)
    }

    async fn insert_rule(&mut self, rule: JobScheduleRule) -> Result<(), StorageError> {
        find(&self.working.triggers, "JobTrigger", rule.trigger_id, |t| t.id)?;
        insert(&mut self.working.rules, "JobScheduleRule", rule, |r| r.id)
    }

    async fn insert_credit(&mut self, credit: Credit) -> Result<(), StorageError> {
        insert(&mut self.working.credits, "Credit", credit, |c| c.id)
    }

    async fn list_credits_for_job(&self, job_id: Uuid) -> Result<Vec<Credit>, StorageError> {
        Ok(self
            .working
            .credits
            .iter()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn credit_balance(
        &self,
        membership_id: Uuid,
        config_id: Option<Uuid>,
    ) -> Result<i64, StorageError> {
        let jobs = &self.working.jobs;
        let on_config = |credit: &Credit| match config_id {
            None => true,
            Some(config_id) => jobs
                .iter()
                .any(|j| j.id == credit.job_id && j.job_config_id == Some(config_id)),
        };
        Ok(self
            .working
            .credits
            .iter()
            .filter(|c| c.membership_id == membership_id)
            .filter(|c| on_config(c))
            .map(|c| i64::from(c.amount))
            .sum())
    }
}
