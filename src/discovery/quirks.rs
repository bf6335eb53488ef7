//! Vendor servers that need a specific URL before authorization can work.

// self
use crate::_prelude::*;

/// Known vendor requirement on the configured resource URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerQuirk {
	/// Exact hostname the quirk applies to.
	pub host: &'static str,
	/// Path suffix the URL must end with.
	pub required_suffix: &'static str,
	/// Actionable hint returned to the operator.
	pub hint: &'static str,
}

/// Quirk table; entries are matched by exact hostname.
pub const KNOWN_QUIRKS: &[ServerQuirk] = &[
	ServerQuirk {
		host: "mcp.atlassian.com",
		required_suffix: "/v1/sse",
		hint: "Atlassian's MCP server must be configured as https://mcp.atlassian.com/v1/sse.",
	},
	ServerQuirk {
		host: "mcp.linear.app",
		required_suffix: "/sse",
		hint: "Linear's MCP server must be configured as https://mcp.linear.app/sse.",
	},
];

/// Returns the quirk the URL violates, if any.
pub fn violated_quirk(url: &Url) -> Option<&'static ServerQuirk> {
	let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
	let path = url.path().trim_end_matches('/');

	KNOWN_QUIRKS
		.iter()
		.find(|quirk| quirk.host == host && !path.ends_with(quirk.required_suffix))
}
