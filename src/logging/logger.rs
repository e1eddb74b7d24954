// file: src/logging/logger.rs
// version: 2.0.0
// guid: j0k1l2m3-n4o5-6789-0123-456789jklmno

//! Logger initialization and configuration

use crate::Result;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Pick the filter directive for the requested verbosity
pub fn filter_directive(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Initialize the logging system
pub fn init_logger(verbose: bool, quiet: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directive(verbose, quiet)))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| {
            crate::error::ProvisionError::config(format!("Failed to initialize logger: {}", e))
        })?;

    Ok(())
}

/// Initialize logging to the console and an append-only file.
///
/// The file never receives the final report; that goes to stdout only.
pub fn init_logger_with_file(verbose: bool, quiet: bool, log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let directive = filter_directive(verbose, quiet);

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::new(directive));

    let file_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .with_filter(EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::error::ProvisionError::config(format!("Failed to initialize logger: {}", e))
        })?;

    tracing::info!("Logging initialized - writing to stdout and {}", log_file.display());
    Ok(())
}

/// Span grouping every log line of one provisioning stage
pub fn stage_span(stage: &str) -> tracing::Span {
    tracing::info_span!("stage", name = stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(false, false), "info");
        assert_eq!(filter_directive(true, false), "debug");
        // quiet wins over verbose
        assert_eq!(filter_directive(true, true), "error");
    }

    #[test]
    fn test_init_logger_default() {
        // Subscriber can only be set once per process, either outcome is fine
        let result = init_logger(false, false);
        assert!(result.is_ok() || result.is_err());
    }

    #[tokio::test]
    async fn test_stage_span_wraps_future() {
        use tracing::Instrument;

        // Arrange
        let span = stage_span("preflight");

        // Act
        let result = async { 2 + 2 }.instrument(span).await;

        // Assert
        assert_eq!(result, 4);
    }
}
