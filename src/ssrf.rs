//! Outbound URL validation for every request whose target came from a remote server.
//!
//! Literal checks reject non-HTTP(S) schemes, loopback, private, link-local (including the
//! cloud metadata address), shared, unspecified, and unique-local ranges, plus well-known
//! internal hostnames. When DNS resolution is enabled, hostnames are resolved and every address
//! is subjected to the same checks.

// std
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
// crates.io
use url::Host;
// self
use crate::_prelude::*;

const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal", "metadata"];
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".localhost", ".internal", ".local"];

/// Why a URL was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SsrfRejection {
	/// Scheme is not `http` or `https`.
	UnsupportedScheme,
	/// URL has no host component.
	MissingHost,
	/// Hostname names a local or cloud-internal service.
	BlockedHostname,
	/// Loopback address.
	Loopback,
	/// RFC 1918, unique-local, or otherwise non-routable private address.
	PrivateNetwork,
	/// Link-local address, including cloud metadata endpoints.
	LinkLocal,
	/// Carrier-grade NAT shared address space.
	SharedAddressSpace,
	/// Unspecified, broadcast, or multicast address.
	NonUnicast,
}
impl Display for SsrfRejection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(match self {
			Self::UnsupportedScheme => "unsupported scheme",
			Self::MissingHost => "missing host",
			Self::BlockedHostname => "internal hostname",
			Self::Loopback => "loopback address",
			Self::PrivateNetwork => "private network address",
			Self::LinkLocal => "link-local address",
			Self::SharedAddressSpace => "shared address space",
			Self::NonUnicast => "non-unicast address",
		})
	}
}

/// Validates URLs before the orchestrator contacts them.
#[derive(Clone, Debug)]
pub struct SsrfGuard {
	allowed_hosts: Vec<String>,
	resolve_dns: bool,
}
impl SsrfGuard {
	/// Creates a guard with DNS resolution enabled and an empty allowlist.
	pub fn new() -> Self {
		Self { allowed_hosts: Vec::new(), resolve_dns: true }
	}

	/// Exempts exact hostnames (or IP literals) from every check.
	pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.allowed_hosts = hosts
			.into_iter()
			.map(|host| normalize_host(host.as_ref()))
			.filter(|host| !host.is_empty())
			.collect();

		self
	}

	/// Toggles resolution of hostnames before requests.
	pub fn with_dns_resolution(mut self, enabled: bool) -> Self {
		self.resolve_dns = enabled;

		self
	}

	/// Checks the URL without touching the network.
	pub fn check(&self, url: &Url) -> Result<(), SsrfRejection> {
		if !matches!(url.scheme(), "http" | "https") {
			return Err(SsrfRejection::UnsupportedScheme);
		}

		let host = url.host().ok_or(SsrfRejection::MissingHost)?;

		if self.is_allowed(url) {
			return Ok(());
		}

		match host {
			Host::Domain(domain) => check_hostname(domain),
			Host::Ipv4(ip) => check_ip(IpAddr::V4(ip)),
			Host::Ipv6(ip) => check_ip(IpAddr::V6(ip)),
		}
	}

	/// Checks the URL and, when enabled, every address its hostname resolves to.
	pub async fn validate(&self, url: &Url) -> Result<()> {
		let reject = |reason| Error::SsrfRejected { url: url.to_string(), reason };

		self.check(url).map_err(reject)?;

		let Some(Host::Domain(domain)) = url.host() else { return Ok(()) };

		if !self.resolve_dns || self.is_allowed(url) {
			return Ok(());
		}

		let port = url.port_or_known_default().unwrap_or(443);

		match tokio::net::lookup_host((domain, port)).await {
			Ok(addrs) =>
				for addr in addrs {
					check_ip(addr.ip()).map_err(reject)?;
				},
			// The request itself will fail; there is no address to reject.
			Err(e) => tracing::debug!(host = domain, error = %e, "DNS lookup failed during SSRF validation."),
		}

		Ok(())
	}

	fn is_allowed(&self, url: &Url) -> bool {
		url.host_str()
			.map(|host| {
				let host = normalize_host(host);

				self.allowed_hosts.iter().any(|allowed| *allowed == host)
			})
			.unwrap_or(false)
	}
}
impl Default for SsrfGuard {
	fn default() -> Self {
		Self::new()
	}
}

/// Classifies a single IP address.
pub fn check_ip(ip: IpAddr) -> Result<(), SsrfRejection> {
	match ip {
		IpAddr::V4(v4) => check_ipv4(v4),
		IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
			Some(v4) => check_ipv4(v4),
			None => check_ipv6(v6),
		},
	}
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), SsrfRejection> {
	let [a, b, c, _] = ip.octets();

	if ip.is_loopback() {
		Err(SsrfRejection::Loopback)
	} else if ip.is_link_local() {
		Err(SsrfRejection::LinkLocal)
	} else if ip.is_private() || (a == 192 && b == 0 && c == 0) {
		Err(SsrfRejection::PrivateNetwork)
	} else if a == 100 && (b & 0xc0) == 64 {
		Err(SsrfRejection::SharedAddressSpace)
	} else if a == 0 || ip.is_broadcast() || ip.is_multicast() {
		Err(SsrfRejection::NonUnicast)
	} else {
		Ok(())
	}
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), SsrfRejection> {
	let first = ip.segments()[0];

	if ip.is_loopback() {
		Err(SsrfRejection::Loopback)
	} else if (first & 0xffc0) == 0xfe80 {
		Err(SsrfRejection::LinkLocal)
	} else if (first & 0xfe00) == 0xfc00 {
		Err(SsrfRejection::PrivateNetwork)
	} else if ip.is_unspecified() || ip.is_multicast() {
		Err(SsrfRejection::NonUnicast)
	} else {
		Ok(())
	}
}

fn check_hostname(domain: &str) -> Result<(), SsrfRejection> {
	let host = normalize_host(domain);

	if BLOCKED_HOSTS.contains(&host.as_str())
		|| BLOCKED_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
	{
		return Err(SsrfRejection::BlockedHostname);
	}

	Ok(())
}

fn normalize_host(host: &str) -> String {
	host.trim().trim_start_matches('[').trim_end_matches(']').trim_end_matches('.').to_ascii_lowercase()
}
