//! Routes a server record to the authorization strategy it needs.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	launcher::REMOTE_HELPER_MARKER,
	server::ServerRecord,
};

/// Strategy selected for a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerClass {
	/// OAuth is delegated to a helper process.
	ProcessDelegated {
		/// Helper program.
		program: String,
		/// Remote MCP endpoint named in the helper arguments.
		remote_url: Url,
	},
	/// OAuth is negotiated by the orchestrator over HTTP.
	DirectHttp {
		/// Protected resource URL.
		url: Url,
	},
	/// The server cannot take part in OAuth.
	Unsupported,
}
impl ServerClass {
	/// Classifies `record`; the helper marker wins over the transport.
	pub fn of(record: &ServerRecord) -> Result<Self> {
		if let Some(marker) = record.args.iter().position(|arg| is_helper_marker(arg)) {
			let Some(program) = record.command.clone() else { return Ok(Self::Unsupported) };
			let remote_url = record.args[marker + 1..]
				.iter()
				.filter_map(|arg| Url::parse(arg).ok())
				.find(|url| matches!(url.scheme(), "http" | "https"))
				.ok_or_else(|| ConfigError::MissingRemoteUrl { server: record.id.to_string() })?;

			return Ok(Self::ProcessDelegated { program, remote_url });
		}
		if record.transport.is_http() {
			let raw = record.url.as_deref().unwrap_or_default();
			let url = Url::parse(raw).map_err(|e| ConfigError::invalid_url(raw, e))?;

			return Ok(Self::DirectHttp { url });
		}

		Ok(Self::Unsupported)
	}
}

// Accepts version-pinned package specs such as `mcp-remote@0.1.18`.
fn is_helper_marker(arg: &str) -> bool {
	arg == REMOTE_HELPER_MARKER
		|| arg.strip_prefix(REMOTE_HELPER_MARKER).is_some_and(|rest| rest.starts_with('@'))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{helper_server, http_server, profile_id, server_id},
		server::ServerTransport,
	};

	#[test]
	fn helper_marker_routes_to_delegated_flow() {
		let class = ServerClass::of(&helper_server("srv-1", "https://mcp.example.com/sse"))
			.expect("Helper server should classify.");

		assert_eq!(class, ServerClass::ProcessDelegated {
			program: "npx".into(),
			remote_url: Url::parse("https://mcp.example.com/sse").expect("URL fixture should parse."),
		});

		let pinned = ServerRecord::stdio(server_id("srv-2"), profile_id("p"), "npx", [
			"mcp-remote@0.1.18",
			"https://mcp.example.com/sse",
		]);

		assert!(matches!(ServerClass::of(&pinned), Ok(ServerClass::ProcessDelegated { .. })));
	}

	#[test]
	fn helper_without_remote_url_is_a_configuration_error() {
		let record =
			ServerRecord::stdio(server_id("srv-1"), profile_id("p"), "npx", ["mcp-remote", "--debug"]);

		assert!(matches!(
			ServerClass::of(&record),
			Err(Error::Config(ConfigError::MissingRemoteUrl { .. }))
		));
	}

	#[test]
	fn transports_pick_direct_or_unsupported() {
		let http = http_server("srv-1", "https://mcp.example.com/mcp");
		let stdio = ServerRecord::stdio(server_id("srv-2"), profile_id("p"), "node", ["server.js"]);
		let mut broken = http_server("srv-3", "not a url");

		broken.transport = ServerTransport::Sse;

		assert!(matches!(ServerClass::of(&http), Ok(ServerClass::DirectHttp { .. })));
		assert_eq!(ServerClass::of(&stdio).expect("Stdio server should classify."), ServerClass::Unsupported);
		assert!(matches!(ServerClass::of(&broken), Err(Error::Config(ConfigError::InvalidUrl { .. }))));
	}
}
