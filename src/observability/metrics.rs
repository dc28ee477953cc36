use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::sync::{JobResult, JobStatus};

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Sync endpoint
	pub sync_requests_total: IntCounter,
	pub sync_jobs_ok_total: IntCounter,
	pub sync_jobs_error_total: IntCounter,
	pub sync_jobs_merged_total: IntCounter,
	pub sync_batch_failures_total: IntCounter,
	pub sync_batch_duration_seconds: Histogram,

	// Authentication
	pub auth_failures_total: IntCounter,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
	IntCounter::with_opts(Opts::new(name, help).namespace("herd"))
}

impl MetricsRegistry {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let sync_requests_total = counter("sync_requests_total", "Total sync requests received")?;
		let sync_jobs_ok_total = counter("sync_jobs_ok_total", "Sync jobs applied")?;
		let sync_jobs_error_total =
			counter("sync_jobs_error_total", "Sync jobs rejected with a per-job error")?;
		let sync_jobs_merged_total = counter(
			"sync_jobs_merged_total",
			"Sync jobs acknowledged against an unresolved temporary id",
		)?;
		let sync_batch_failures_total = counter(
			"sync_batch_failures_total",
			"Sync batches rolled back after a systemic failure",
		)?;
		let sync_batch_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"sync_batch_duration_seconds",
				"Time spent applying one sync batch in seconds",
			)
			.namespace("herd")
			.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
		)?;
		let auth_failures_total =
			counter("auth_failures_total", "Requests rejected for missing or bad credentials")?;

		registry.register(Box::new(sync_requests_total.clone()))?;
		registry.register(Box::new(sync_jobs_ok_total.clone()))?;
		registry.register(Box::new(sync_jobs_error_total.clone()))?;
		registry.register(Box::new(sync_jobs_merged_total.clone()))?;
		registry.register(Box::new(sync_batch_failures_total.clone()))?;
		registry.register(Box::new(sync_batch_duration_seconds.clone()))?;
		registry.register(Box::new(auth_failures_total.clone()))?;

		Ok(Self {
			registry,
			sync_requests_total,
			sync_jobs_ok_total,
			sync_jobs_error_total,
			sync_jobs_merged_total,
			sync_batch_failures_total,
			sync_batch_duration_seconds,
			auth_failures_total,
		})
	}

	/// Count each job result under its outcome.
	pub fn record_results(&self, results: &[JobResult]) {
		for r in results {
			match r.status {
				JobStatus::Ok => self.sync_jobs_ok_total.inc(),
				JobStatus::Error => self.sync_jobs_error_total.inc(),
				JobStatus::Merged => self.sync_jobs_merged_total.inc(),
			}
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Build the process-wide metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
