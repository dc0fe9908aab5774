//! Prometheus metrics for the Hyper-V provider
//!
//! Tracks volume operations served over REST and the commands they run in
//! the PowerShell backend.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Total volume operations by type and status
    pub const OPERATIONS_TOTAL: &str = "hyperv_provider_operations_total";
    /// Histogram: Duration of volume operations in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "hyperv_provider_operation_duration_seconds";
    /// Counter: PowerShell command pipelines by status
    pub const SHELL_COMMANDS_TOTAL: &str = "hyperv_provider_shell_commands_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a volume operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record one PowerShell pipeline
pub fn record_shell_command(status: &str) {
    counter!(names::SHELL_COMMANDS_TOTAL, "status" => status.to_string()).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer_without_recorder() {
        // No recorder installed: recording is a no-op
        OperationTimer::new("create_volume").success();
        OperationTimer::new("create_volume").failure("not_found");
        record_shell_command("success");
    }
}
