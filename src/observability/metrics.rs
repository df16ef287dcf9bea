//! Metric names and recording helpers for the enrichment pipeline.
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder the calls are no-ops; `install_recorder` opts a run into a
//! Prometheus text snapshot written when the run ends.

use crate::error::{EnrichError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// All metric names used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Sources
    SourcesRequestsSuccess,
    SourcesRequestsError,
    SourcesRequestDuration,
    SourcesRetries,
    SourcesRateLimitWait,

    // Pipeline
    PipelineCompanies,
    PipelineConflictsFlagged,
    PipelineDuplicateDecisions,

    // Validation
    ValidationOutcomes,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourcesRequestsSuccess => "enricher_sources_requests_success_total",
            MetricName::SourcesRequestsError => "enricher_sources_requests_error_total",
            MetricName::SourcesRequestDuration => "enricher_sources_request_duration_seconds",
            MetricName::SourcesRetries => "enricher_sources_retries_total",
            MetricName::SourcesRateLimitWait => "enricher_sources_rate_limit_wait_seconds",
            MetricName::PipelineCompanies => "enricher_pipeline_companies_total",
            MetricName::PipelineConflictsFlagged => "enricher_pipeline_conflicts_flagged_total",
            MetricName::PipelineDuplicateDecisions => "enricher_pipeline_duplicate_decisions_total",
            MetricName::ValidationOutcomes => "enricher_validation_outcomes_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide Prometheus recorder plus the file its snapshot goes to.
pub struct MetricsSnapshot {
    handle: PrometheusHandle,
    path: PathBuf,
}

/// Install the global recorder. Fails if one is already installed.
pub fn install_recorder(path: &Path) -> Result<MetricsSnapshot> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EnrichError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
    info!(path = %path.display(), "Metrics recorder installed");
    Ok(MetricsSnapshot {
        handle,
        path: path.to_path_buf(),
    })
}

impl MetricsSnapshot {
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the current values in the Prometheus text format.
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, self.render())?;
        info!(path = %self.path.display(), "📈 Metrics snapshot written");
        Ok(())
    }
}

pub mod sources {
    use super::MetricName;
    use crate::types::SourceTag;

    pub fn request_success(source: SourceTag) {
        metrics::counter!(MetricName::SourcesRequestsSuccess.as_str(), "source" => source.as_str())
            .increment(1);
    }

    pub fn request_error(source: SourceTag, kind: &'static str) {
        metrics::counter!(
            MetricName::SourcesRequestsError.as_str(),
            "source" => source.as_str(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn request_duration(source: SourceTag, secs: f64) {
        metrics::histogram!(MetricName::SourcesRequestDuration.as_str(), "source" => source.as_str())
            .record(secs);
    }

    pub fn retry(source: SourceTag, kind: &'static str) {
        metrics::counter!(
            MetricName::SourcesRetries.as_str(),
            "source" => source.as_str(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn rate_limit_wait(source: SourceTag, secs: f64) {
        metrics::histogram!(MetricName::SourcesRateLimitWait.as_str(), "source" => source.as_str())
            .record(secs);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn company_outcome(outcome: &'static str) {
        metrics::counter!(MetricName::PipelineCompanies.as_str(), "outcome" => outcome).increment(1);
    }

    pub fn conflicts_flagged(count: usize) {
        if count > 0 {
            metrics::counter!(MetricName::PipelineConflictsFlagged.as_str()).increment(count as u64);
        }
    }

    pub fn duplicate_decision(kept: bool) {
        let decision = if kept { "keep" } else { "drop" };
        metrics::counter!(MetricName::PipelineDuplicateDecisions.as_str(), "decision" => decision)
            .increment(1);
    }
}

pub mod validation {
    use super::MetricName;

    pub fn outcome(field: &str, outcome: &'static str) {
        metrics::counter!(
            MetricName::ValidationOutcomes.as_str(),
            "field" => field.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_prometheus_conventions() {
        assert!(MetricName::SourcesRetries.as_str().ends_with("_total"));
        assert!(MetricName::SourcesRequestDuration.to_string().ends_with("_seconds"));
    }

    #[test]
    fn recorded_values_show_up_in_the_snapshot() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            pipeline::company_outcome("persisted");
            pipeline::company_outcome("persisted");
            validation::outcome("revenue", "updated");
        });

        let text = handle.render();
        assert!(text.contains("enricher_pipeline_companies_total{outcome=\"persisted\"} 2"));
        assert!(text.contains("enricher_validation_outcomes_total"));
    }

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        sources::request_success(crate::types::SourceTag::Diffbot);
        pipeline::conflicts_flagged(3);
        validation::outcome("revenue", "updated");
    }
}
