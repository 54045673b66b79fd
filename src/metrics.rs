//! Prometheus metrics for flowrun.
//!
//! ## Metrics
//!
//! ### Counters
//! - `flowrun_runs_total` - Total runs by status and trigger
//! - `flowrun_steps_total` - Total step executions by app and status
//! - `flowrun_step_retries_total` - Total step retries by app
//!
//! ### Histograms
//! - `flowrun_run_duration_seconds` - Run duration by workflow
//! - `flowrun_step_duration_seconds` - Step duration by app
//!
//! ### Gauges
//! - `flowrun_active_runs` - Currently executing runs

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup; subsequent calls return the existing handle.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Record a finished run.
pub fn record_run(status: &str, trigger: &str) {
    counter!(
        "flowrun_runs_total",
        "status" => status.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Record run duration.
pub fn record_run_duration(duration: Duration, workflow_name: &str) {
    histogram!(
        "flowrun_run_duration_seconds",
        "workflow" => workflow_name.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment the active runs gauge.
pub fn inc_active_runs() {
    gauge!("flowrun_active_runs").increment(1.0);
}

/// Decrement the active runs gauge.
pub fn dec_active_runs() {
    gauge!("flowrun_active_runs").decrement(1.0);
}

/// Record a settled step.
pub fn record_step(app: &str, status: &str) {
    counter!(
        "flowrun_steps_total",
        "app" => app.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record step duration.
pub fn record_step_duration(duration: Duration, app: &str) {
    histogram!(
        "flowrun_step_duration_seconds",
        "app" => app.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a step retry.
pub fn record_retry(app: &str) {
    counter!(
        "flowrun_step_retries_total",
        "app" => app.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_init_is_placeholder_or_data() {
        // Other tests may have initialized the recorder already; either way
        // render must produce something printable.
        assert!(!render_metrics().is_empty());
    }
}
