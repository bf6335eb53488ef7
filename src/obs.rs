//! Observability for authorization flows.
//!
//! Every flow runs inside a `mcp_oauth.flow` span carrying `flow` and `stage` fields, and every
//! invocation ends with a [`FlowMetric`] handed to a [`FlowMetricsSink`]. With the `metrics`
//! feature, [`MetricsSink`] forwards to the global recorder as the `mcp_oauth_flow_total`
//! counter and the `mcp_oauth_flow_duration_ms` histogram.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Authorization flow kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Discovery, registration, and PKCE against an HTTP server.
	DirectHttp,
	/// Authorization delegated to a helper process.
	ProcessDelegated,
	/// Callback half: state redemption and code exchange.
	Completion,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::DirectHttp => "direct_http",
			FlowKind::ProcessDelegated => "process_delegated",
			FlowKind::Completion => "completion",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// An authorization URL was handed out; the user must finish in a browser.
	Pending,
	/// Credentials were obtained (or the server needs none).
	Authorized,
	/// The invocation failed.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Pending => "pending",
			FlowOutcome::Authorized => "authorized",
			FlowOutcome::Failure => "failure",
		}
	}

	/// Returns true unless the invocation failed.
	pub const fn is_success(self) -> bool {
		!matches!(self, FlowOutcome::Failure)
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
