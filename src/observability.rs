//! Logging and metrics for the orchestrator.

use crate::config::ObservabilityConfig;
use crate::error::{OrchestratorError, Result};
use metrics::counter;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Record a detached process launch.
pub fn record_launch(program: &str) {
    counter!("alba_demo_processes_launched_total", "program" => program.to_string()).increment(1);
}

/// Record one readiness probe.
pub fn record_poll_attempt(what: &str) {
    counter!("alba_demo_poll_attempts_total", "what" => what.to_string()).increment(1);
}

/// Record claimed storage daemons.
pub fn record_claims(count: usize) {
    counter!("alba_demo_osds_claimed_total").increment(count as u64);
}

/// Record a teardown step that did not succeed.
pub fn record_teardown_failure(step: &str) {
    counter!("alba_demo_teardown_failures_total", "step" => step.to_string()).increment(1);
}
