// self
use crate::{_prelude::*, obs::FlowOutcome};

/// One finished orchestrator invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMetric {
	/// Authorization provider label (issuer host, helper target host, or `unknown`).
	pub provider: String,
	/// Server transport label.
	pub server_type: &'static str,
	/// Wall-clock duration in milliseconds.
	pub duration_ms: u64,
	/// Invocation outcome.
	pub outcome: FlowOutcome,
}
impl FlowMetric {
	/// Returns true unless the invocation failed.
	pub fn success(&self) -> bool {
		self.outcome.is_success()
	}
}

/// Failure reported by a [`FlowMetricsSink`]; the orchestrator logs and drops it.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Metrics sink rejected the event: {message}.")]
pub struct SinkError {
	/// Sink-supplied detail.
	pub message: String,
}

/// Fire-and-forget destination for flow metrics.
pub trait FlowMetricsSink
where
	Self: Send + Sync,
{
	/// Records one finished invocation.
	fn record_flow(&self, metric: &FlowMetric) -> Result<(), SinkError>;
}

/// Sink that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;
impl FlowMetricsSink for NoopSink {
	fn record_flow(&self, _: &FlowMetric) -> Result<(), SinkError> {
		Ok(())
	}
}

/// Sink that forwards to the global `metrics` recorder.
#[cfg(feature = "metrics")]
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSink;
#[cfg(feature = "metrics")]
impl FlowMetricsSink for MetricsSink {
	fn record_flow(&self, metric: &FlowMetric) -> Result<(), SinkError> {
		metrics::counter!(
			"mcp_oauth_flow_total",
			"provider" => metric.provider.clone(),
			"server_type" => metric.server_type,
			"outcome" => metric.outcome.as_str()
		)
		.increment(1);
		metrics::histogram!(
			"mcp_oauth_flow_duration_ms",
			"server_type" => metric.server_type,
			"outcome" => metric.outcome.as_str()
		)
		.record(metric.duration_ms as f64);

		Ok(())
	}
}
