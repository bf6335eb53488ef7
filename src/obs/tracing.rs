// crates.io
use tracing::{Span, field, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::FlowKind};

/// Span handle used by orchestrator flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the flow kind and stage; `server` is recorded later.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		let span =
			tracing::info_span!("mcp_oauth.flow", flow = kind.as_str(), stage, server = field::Empty);

		Self { span }
	}

	/// Records the server identifier on the span.
	pub fn record_server(&self, server: &str) {
		self.span.record("server", server);
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> FlowSpanGuard {
		FlowSpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument as _;

		fut.instrument(self.span.clone())
	}
}

/// RAII guard returned by [`FlowSpan::entered`].
pub struct FlowSpanGuard {
	_guard: tracing::span::EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}
