use crate::errors::ValidationError;
use crate::rules::Rule;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Team Models
// ============================================================================

/// What the assigner does when a candidate is on holiday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HolidayPolicy {
    /// Try to find another assignee who is available earlier
    #[serde(rename = "FIND_OTHER")]
    FindOther,
    /// Give the job to the best candidate once they are back
    #[default]
    #[serde(rename = "WHEN_BACK")]
    WhenBack,
}

/// Scheduling policy parameters of a team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamPolicy {
    pub when_on_holiday: HolidayPolicy,
    /// Maximum relative credit in team considered by the assigner
    pub max_team_diff: u32,
    /// Maximum relative credit on a job considered by the assigner
    pub max_job_diff: u32,
    pub team_credit_weight: u32,
    pub job_credit_weight: u32,
    pub random_weight: u32,
    /// Fraction of the base credit added per day a grabbed job is overdue
    #[serde(default)]
    pub overdue_inflation: f64,
}

impl Default for TeamPolicy {
    fn default() -> Self {
        Self {
            when_on_holiday: HolidayPolicy::WhenBack,
            max_team_diff: 600,
            max_job_diff: 120,
            team_credit_weight: 10,
            job_credit_weight: 10,
            random_weight: 10,
            overdue_inflation: 0.0,
        }
    }
}

impl TeamPolicy {
    /// Reject policies the assigner cannot score with
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_team_diff == 0 {
            return Err(ValidationError::InvalidPolicy(
                "max_team_diff must be greater than 0".to_string(),
            ));
        }
        if self.max_job_diff == 0 {
            return Err(ValidationError::InvalidPolicy(
                "max_job_diff must be greater than 0".to_string(),
            ));
        }
        if !self.overdue_inflation.is_finite() || self.overdue_inflation < 0.0 {
            return Err(ValidationError::InvalidPolicy(
                "overdue_inflation must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub policy: TeamPolicy,
}

impl Team {
    pub fn new(name: impl Into<String>, policy: TeamPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            policy,
        }
    }
}

/// A person who can hold memberships in teams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl Person {
    pub fn new(
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Full name when a first name is known, otherwise the username
    pub fn display_name(&self) -> String {
        if self.first_name.is_empty() {
            self.username.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipRole {
    Member,
    Applicant,
    Admin,
}

/// Link between a person and a team; owns availability and accrues credit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub person_id: Uuid,
    pub team_id: Uuid,
    pub role: MembershipRole,
}

impl Membership {
    pub fn new(person_id: Uuid, team_id: Uuid, role: MembershipRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            team_id,
            role,
        }
    }
}

/// A period a person is away; both ends count as days away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub id: Uuid,
    pub person_id: Uuid,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
}

impl Holiday {
    pub fn new(person_id: Uuid, from_time: DateTime<Utc>, to_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            from_time,
            to_time,
        }
    }
}

// ============================================================================
// Job Models
// ============================================================================

/// Chore template owned by a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub description: String,
    pub default_credit: u32,
    pub active: bool,
    /// Days before the due date a job becomes open
    pub open_days: Option<u32>,
    /// Days after the due date a job is abandoned
    pub failed_days: Option<u32>,
}

impl JobConfig {
    pub fn new(team_id: Uuid, name: impl Into<String>, default_credit: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            name: name.into(),
            description: String::new(),
            default_credit,
            active: true,
            open_days: None,
            failed_days: None,
        }
    }
}

/// Named alternative credit amount under a job config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVariant {
    pub id: Uuid,
    pub job_config_id: Uuid,
    pub name: String,
    pub description: String,
    pub credit: u32,
}

impl JobVariant {
    pub fn new(job_config_id: Uuid, name: impl Into<String>, credit: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_config_id,
            name: name.into(),
            description: String::new(),
            credit,
        }
    }
}

/// JobStatus tracks where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Scheduled,
    Open,
    Overdue,
    Complete,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Scheduled,
        JobStatus::Open,
        JobStatus::Overdue,
        JobStatus::Complete,
        JobStatus::Cancelled,
    ];

    /// Statuses the periodic sweep revisits
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Open, JobStatus::Overdue, JobStatus::Scheduled];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Scheduled => "Scheduled",
            JobStatus::Open => "Open",
            JobStatus::Overdue => "Overdue",
            JobStatus::Complete => "Complete",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instantiated chore occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Absent for one-off jobs
    pub job_config_id: Option<Uuid>,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub default_credit: u32,
    pub is_priority: bool,
    pub created_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    /// Set exactly when the status is Complete or Cancelled
    pub closed_date: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub assignee_id: Uuid,
    pub completed_by_id: Option<Uuid>,
    /// Extra days to wait before the follow-up job is due
    pub delay: u32,
    /// Audit transcript written by the assigner
    pub explanation: String,
}

impl Job {
    /// A scheduled one-off job with no config behind it
    pub fn one_off(
        team_id: Uuid,
        name: impl Into<String>,
        default_credit: u32,
        assignee_id: Uuid,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_config_id: None,
            team_id,
            name: name.into(),
            description: None,
            default_credit,
            is_priority: false,
            created_date,
            due_date: None,
            closed_date: None,
            status: JobStatus::Scheduled,
            assignee_id,
            completed_by_id: None,
            delay: 0,
            explanation: String::new(),
        }
    }

    /// A scheduled job instantiated from a config
    pub fn from_config(config: &JobConfig, assignee_id: Uuid, created_date: DateTime<Utc>) -> Self {
        Self {
            job_config_id: Some(config.id),
            description: Some(config.description.clone()).filter(|d| !d.is_empty()),
            ..Self::one_off(
                config.team_id,
                config.name.clone(),
                config.default_credit,
                assignee_id,
                created_date,
            )
        }
    }
}

// ============================================================================
// Trigger Models
// ============================================================================

/// Which status transitions of the source job fire a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleFlags {
    pub scheduled: bool,
    pub open: bool,
    pub overdue: bool,
    pub complete: bool,
    pub cancelled: bool,
}

impl LifecycleFlags {
    pub fn on(status: JobStatus) -> Self {
        Self::default().with(status)
    }

    pub fn with(mut self, status: JobStatus) -> Self {
        match status {
            JobStatus::Scheduled => self.scheduled = true,
            JobStatus::Open => self.open = true,
            JobStatus::Overdue => self.overdue = true,
            JobStatus::Complete => self.complete = true,
            JobStatus::Cancelled => self.cancelled = true,
        }
        self
    }

    pub fn fires_on(&self, status: JobStatus) -> bool {
        match status {
            JobStatus::Scheduled => self.scheduled,
            JobStatus::Open => self.open,
            JobStatus::Overdue => self.overdue,
            JobStatus::Complete => self.complete,
            JobStatus::Cancelled => self.cancelled,
        }
    }
}

/// What to do with unfinished jobs of the config a trigger creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExistingJobPolicy {
    /// Delete them and create a fresh job
    Replace,
    /// Keep the existing job and create nothing
    #[default]
    Skip,
    /// Create another job alongside them
    Duplicate,
}

/// Recurrence rule: a lifecycle event of one config spawns a job of another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTrigger {
    pub id: Uuid,
    pub from_config_id: Uuid,
    pub create_config_id: Uuid,
    pub lifecycle: LifecycleFlags,
    pub urgent: bool,
    pub existing_job: ExistingJobPolicy,
}

impl JobTrigger {
    pub fn new(from_config_id: Uuid, create_config_id: Uuid, lifecycle: LifecycleFlags) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_config_id,
            create_config_id,
            lifecycle,
            urgent: false,
            existing_job: ExistingJobPolicy::default(),
        }
    }
}

/// One date filter of a trigger; rules apply in `position` order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScheduleRule {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub position: u32,
    pub rule: Rule,
}

impl JobScheduleRule {
    pub fn new(trigger_id: Uuid, position: u32, rule: Rule) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            position,
            rule,
        }
    }
}

/// Immutable ledger entry of credit earned for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub id: Uuid,
    pub job_id: Uuid,
    pub membership_id: Uuid,
    pub amount: u32,
    pub created_date: DateTime<Utc>,
}

impl Credit {
    pub fn new(job_id: Uuid, membership_id: Uuid, amount: u32, created_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            membership_id,
            amount,
            created_date,
        }
    }
}

/// Preview of the job a trigger would create, without creating it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunPreview {
    pub trigger: JobTrigger,
    pub create_config: JobConfig,
    pub proposed_date: NaiveDate,
    /// Member whose availability produced the proposed date
    pub earliest_member_id: Uuid,
}

/// Outcome of one housekeeping sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Active jobs looked at
    pub examined: usize,
    /// Jobs whose status changed
    pub transitioned: usize,
    /// Jobs that could not be processed
    pub failed: usize,
}
