//! # Structured Logging Module
//!
//! Environment-aware structured logging for the asynchronous delivery workflow.
//! Console output is human readable by default and JSON when configured.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
///
/// `RUST_LOG` wins over the configured level when present.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping existing one");
        }

        tracing::info!(
            pid = std::process::id(),
            level = %config.level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for a message workflow step
pub fn log_message_operation(
    operation: &str,
    message_id: &str,
    command_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        message_id = %message_id,
        command_id = command_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 MESSAGE_OPERATION"
    );
}

/// Log structured data for a delivery batch outcome
pub fn log_batch_outcome(
    delivery_method: &str,
    message_id: &str,
    batch_size: usize,
    failed_targets: usize,
) {
    if failed_targets > 0 {
        tracing::warn!(
            delivery_method = %delivery_method,
            message_id = %message_id,
            batch_size = batch_size,
            failed_targets = failed_targets,
            "📦 BATCH_OUTCOME: partial failure"
        );
    } else {
        tracing::info!(
            delivery_method = %delivery_method,
            message_id = %message_id,
            batch_size = batch_size,
            "📦 BATCH_OUTCOME: delivered"
        );
    }
}
