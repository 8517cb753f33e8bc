// Job change notifications
//
// The engine only decides when and for whom a notification is due. Delivery
// belongs to whatever `Notifier` the host plugs in.

use crate::models::{Job, JobStatus, Membership};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    JobScheduled,
    JobOpen,
    JobOverdue,
    JobComplete,
    JobCancelled,
}

impl EventType {
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Scheduled => EventType::JobScheduled,
            JobStatus::Open => EventType::JobOpen,
            JobStatus::Overdue => EventType::JobOverdue,
            JobStatus::Complete => EventType::JobComplete,
            JobStatus::Cancelled => EventType::JobCancelled,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EventType::JobScheduled => "A job was scheduled but not open",
            EventType::JobOpen => "Job is ready to work on",
            EventType::JobOverdue => "Job is overdue",
            EventType::JobComplete => "Job is complete",
            EventType::JobCancelled => "Job is cancelled",
        }
    }
}

/// Why a recipient is being told about a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    Team,
    Assignee,
    CompletedBy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Membership the notification is addressed to
    pub recipient_id: Uuid,
    pub event_type: EventType,
    pub subjects: BTreeSet<Subject>,
    pub title: String,
    pub body: String,
    pub url: String,
    pub job_id: Uuid,
}

/// One notification per team member for the job's current status
pub fn job_notifications(job: &Job, members: &[Membership]) -> Vec<Notification> {
    let event_type = EventType::for_status(job.status);
    members
        .iter()
        .map(|member| {
            let mut subjects = BTreeSet::from([Subject::Team]);
            if job.assignee_id == member.id {
                subjects.insert(Subject::Assignee);
            }
            if job.completed_by_id == Some(member.id) {
                subjects.insert(Subject::CompletedBy);
            }
            Notification {
                recipient_id: member.id,
                event_type,
                subjects,
                title: job.name.clone(),
                body: event_type.description().to_string(),
                url: format!("/jobs/{}", job.id),
                job_id: job.id,
            }
        })
        .collect()
}

/// Delivery collaborator for job notifications
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    #[tracing::instrument(skip(self, notification), fields(job_id = %notification.job_id))]
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            recipient_id = %notification.recipient_id,
            event_type = ?notification.event_type,
            subjects = ?notification.subjects,
            title = %notification.title,
            url = %notification.url,
            "{}",
            notification.body
        );
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}
