// Telemetry module for structured logging and scheduling metrics

use crate::models::JobStatus;
use anyhow::Result;
use metrics::{counter, describe_counter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` wins over `log_level` when it is set. Fails if a global
/// subscriber was already installed by the host.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Register descriptions for every counter the engine emits
pub fn describe_metrics() {
    describe_counter!(
        "housework_status_transitions_total",
        "Job status transitions applied by the lifecycle state machine"
    );
    describe_counter!(
        "housework_jobs_created_total",
        "Jobs materialised by recurrence triggers"
    );
    describe_counter!(
        "housework_credit_awarded_total",
        "Credit awarded to members for completed jobs"
    );
    describe_counter!(
        "housework_sweep_failures_total",
        "Jobs whose periodic status sweep failed"
    );
}

#[inline]
pub fn record_transition(from: JobStatus, to: JobStatus) {
    counter!(
        "housework_status_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

#[inline]
pub fn record_job_created(trigger_id: &Uuid) {
    counter!("housework_jobs_created_total", "trigger_id" => trigger_id.to_string()).increment(1);
}

#[inline]
pub fn record_credit_awarded(amount: u32) {
    counter!("housework_credit_awarded_total").increment(u64::from(amount));
}

#[inline]
pub fn record_sweep_failure(reason: &str) {
    counter!("housework_sweep_failures_total", "reason" => reason.to_string()).increment(1);
}
