#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::{SocketAddr, ToSocketAddrs};

	/// A `tcp://host:port` listen endpoint. `host` may be an IP literal
	/// or a DNS name; `resolve` turns it into a bindable address.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BindEndpoint {
		host: String,
		port: u16,
	}

	impl BindEndpoint {
		/// Parse `tcp://host:port`. IPv6 hosts must be bracketed, the
		/// port must be 1..=65535, and no path/query/fragment may follow.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			let rest = s
				.strip_prefix("tcp://")
				.filter(|rest| !rest.is_empty())
				.ok_or_else(|| format!("invalid endpoint (expected tcp://host:port): {s}"))?;
			if rest.contains(['/', '?', '#']) {
				return Err(format!(
					"invalid endpoint (expected tcp://host:port without path/query/fragment): {s}"
				));
			}

			let (host, port) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected tcp://host:port): {s}"))?;
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected tcp://host:port): {s}"));
			}
			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like tcp://[::1]:37100): {s}"
				));
			}
			let port = match port.parse::<u16>() {
				Ok(port) if port > 0 => port,
				_ => return Err(format!("invalid endpoint port (expected 1..=65535): {s}")),
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}

		/// Resolve to a concrete socket address. IP literals resolve
		/// without a lookup; DNS names take the first resolved address.
		pub fn resolve(&self) -> Result<SocketAddr, String> {
			let hostport = format!("{}:{}", self.host, self.port);
			if let Ok(addr) = hostport.parse::<SocketAddr>() {
				return Ok(addr);
			}
			(self.host.as_str(), self.port)
				.to_socket_addrs()
				.map_err(|err| format!("cannot resolve endpoint host {}: {err}", self.host))?
				.next()
				.ok_or_else(|| format!("endpoint host {} resolved to no addresses", self.host))
		}
	}

	impl core::fmt::Display for BindEndpoint {
		fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
			write!(f, "tcp://{}:{}", self.host, self.port)
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_and_resolves_ipv4_literal() {
			let endpoint = BindEndpoint::parse("tcp://127.0.0.1:37100").unwrap();
			assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:37100");
			assert_eq!(endpoint.resolve().unwrap().to_string(), "127.0.0.1:37100");
		}

		#[test]
		fn parses_and_resolves_bracketed_ipv6_literal() {
			let endpoint = BindEndpoint::parse("tcp://[::1]:37100").unwrap();
			assert_eq!(endpoint.resolve().unwrap().to_string(), "[::1]:37100");
		}

		#[test]
		fn resolves_a_dns_name() {
			let endpoint = BindEndpoint::parse("tcp://localhost:37100").unwrap();
			let addr = endpoint.resolve().unwrap();
			assert_eq!(addr.port(), 37100);
			assert!(addr.ip().is_loopback());
		}

		#[test]
		fn rejects_unbracketed_ipv6() {
			let err = BindEndpoint::parse("tcp://::1:37100").unwrap_err();
			assert!(err.to_lowercase().contains("ipv6"));
		}

		#[test]
		fn rejects_missing_scheme_and_empty_input() {
			assert!(BindEndpoint::parse("127.0.0.1:37100").is_err());
			assert!(BindEndpoint::parse("tcp://").is_err());
			assert!(BindEndpoint::parse("").is_err());
		}

		#[test]
		fn rejects_path_query_fragment() {
			assert!(BindEndpoint::parse("tcp://127.0.0.1:37100/").is_err());
			assert!(BindEndpoint::parse("tcp://127.0.0.1:37100?x=y").is_err());
			assert!(BindEndpoint::parse("tcp://127.0.0.1:37100#frag").is_err());
		}

		#[test]
		fn rejects_bad_ports() {
			assert!(BindEndpoint::parse("tcp://127.0.0.1:0").is_err());
			assert!(BindEndpoint::parse("tcp://127.0.0.1:70000").is_err());
			assert!(BindEndpoint::parse("tcp://127.0.0.1").is_err());
		}
	}
}
