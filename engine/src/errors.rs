// Error handling framework
//
// Validation problems are reported when configuration is written, configuration
// faults abort the operation that hit them, and storage errors carry the
// not-found signal through to the host API layer.

use thiserror::Error;
use uuid::Uuid;

/// Validation errors raised while building rules, teams or settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("Invalid rule parameters for {rule_type}: {reason}")]
    InvalidRuleParams { rule_type: String, reason: String },

    #[error("Invalid month-day '{value}': expected MM-DD")]
    InvalidMonthDay { value: String },

    #[error("Invalid team policy: {0}")]
    InvalidPolicy(String),
}

/// Configuration faults that make a scheduling run impossible
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Team {team_id} has no members to assign jobs to")]
    NoCandidates { team_id: Uuid },

    #[error("No available date within {horizon_days} days for trigger {trigger_id}")]
    SearchHorizonExceeded { trigger_id: Uuid, horizon_days: u32 },

    #[error("Team {team_id} policy is unusable: {reason}")]
    InvalidPolicy { team_id: Uuid, reason: String },

    #[error("Trigger cascade exceeded {max_depth} levels starting at job {job_id}")]
    TriggerCascadeTooDeep { job_id: Uuid, max_depth: u32 },

    #[error("Invalid due time '{0}': expected HH:MM")]
    InvalidDueTime(String),
}

/// Persistence collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StorageError::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Errors returned by engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Transition from {from} to {to} is not allowed")]
    TransitionRejected { from: String, to: String },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_not_found())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::new("VALIDATION_ERROR", err.to_string())
    }
}

impl From<ConfigurationError> for ApiError {
    fn from(err: ConfigurationError) -> Self {
        ApiError::new("CONFIGURATION_ERROR", err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let code = match err {
            StorageError::NotFound { .. } => "NOT_FOUND",
            StorageError::Conflict(_) => "CONFLICT",
            StorageError::Backend(_) => "STORAGE_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => e.into(),
            EngineError::Configuration(e) => e.into(),
            EngineError::Storage(e) => e.into(),
            EngineError::Forbidden(_) | EngineError::TransitionRejected { .. } => {
                ApiError::new("FORBIDDEN", err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidFieldValue {
            field: "params".to_string(),
            reason: err.to_string(),
        }
    }
}
