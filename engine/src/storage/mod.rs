// Persistence collaborator contract
//
// The engine never talks to a database directly. Hosts implement `JobStore`
// over their own storage and hand the engine one transaction at a time.

pub mod memory;

pub use memory::{MemoryStore, MemoryTransaction, StoreState};

use crate::errors::StorageError;
use crate::models::{
    Credit, Holiday, Job, JobConfig, JobScheduleRule, JobStatus, JobTrigger, JobVariant,
    Membership, Person, Team,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository-style access to every entity the engine reads or writes.
///
/// Missing rows are reported as `StorageError::NotFound`. List methods return
/// rows in insertion order unless stated otherwise.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_team(&self, id: Uuid) -> Result<Team, StorageError>;

    async fn insert_team(&mut self, team: Team) -> Result<(), StorageError>;

    /// Every membership of the team, whatever its role
    async fn list_memberships(&self, team_id: Uuid) -> Result<Vec<Membership>, StorageError>;

    async fn get_membership(&self, id: Uuid) -> Result<Membership, StorageError>;

    async fn insert_membership(&mut self, membership: Membership) -> Result<(), StorageError>;

    async fn get_person(&self, id: Uuid) -> Result<Person, StorageError>;

    async fn insert_person(&mut self, person: Person) -> Result<(), StorageError>;

    /// Holidays registered for the person
    async fn list_holidays(&self, person_id: Uuid) -> Result<Vec<Holiday>, StorageError>;

    async fn insert_holiday(&mut self, holiday: Holiday) -> Result<(), StorageError>;

    async fn delete_holiday(&mut self, id: Uuid) -> Result<(), StorageError>;

    async fn get_job_config(&self, id: Uuid) -> Result<JobConfig, StorageError>;

    async fn insert_job_config(&mut self, config: JobConfig) -> Result<(), StorageError>;

    async fn get_job_variant(&self, id: Uuid) -> Result<JobVariant, StorageError>;

    async fn insert_job_variant(&mut self, variant: JobVariant) -> Result<(), StorageError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, StorageError>;

    async fn insert_job(&mut self, job: Job) -> Result<(), StorageError>;

    /// Replace the stored row with the same id
    async fn update_job(&mut self, job: &Job) -> Result<(), StorageError>;

    /// Remove the job together with its credit entries
    async fn delete_job(&mut self, id: Uuid) -> Result<(), StorageError>;

    /// Jobs whose status is any of `statuses`
    async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, StorageError>;

    /// Non-terminal jobs of the config, leaving out `excluding` when given
    async fn list_open_jobs_for_config(
        &self,
        config_id: Uuid,
        excluding: Option<Uuid>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Triggers whose source is the config
    async fn list_triggers_from(&self, config_id: Uuid) -> Result<Vec<JobTrigger>, StorageError>;

    async fn get_trigger(&self, id: Uuid) -> Result<JobTrigger, StorageError>;

    async fn insert_trigger(&mut self, trigger: JobTrigger) -> Result<(), StorageError>;

    async fn update_trigger(&mut self, trigger: &JobTrigger) -> Result<(), StorageError>;

    /// Rules of the trigger ordered by position
    async fn list_rules(&self, trigger_id: Uuid) -> Result<Vec<JobScheduleRule>, StorageError>;

    async fn insert_rule(&mut self, rule: JobScheduleRule) -> Result<(), StorageError>;

    async fn insert_credit(&mut self, credit: Credit) -> Result<(), StorageError>;

    async fn list_credits_for_job(&self, job_id: Uuid) -> Result<Vec<Credit>, StorageError>;

    /// Sum of the membership's credit, limited to jobs of `config_id` when given
    async fn credit_balance(
        &self,
        membership_id: Uuid,
        config_id: Option<Uuid>,
    ) -> Result<i64, StorageError>;
}

/// A unit of work; dropping it without `commit` discards every write
#[async_trait]
pub trait Transaction: JobStore {
    async fn commit(self) -> Result<(), StorageError>;
}

/// Opens transactions over a shared store
#[async_trait]
pub trait StoreProvider: Send + Sync {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx, StorageError>;
}
