#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Parsed `quic://host:port` bind endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BindEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl BindEndpoint {
		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Convert to `SocketAddr`; only IP literals can be bound.
		pub fn to_socket_addr(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("bind host must be an IP literal: {}", self.host))
		}

		/// Parse a bind endpoint of the form `quic://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected quic://host:port)".to_string());
			}

			let rest = s
				.strip_prefix("quic://")
				.ok_or_else(|| format!("invalid endpoint (expected quic://host:port): {s}"))?;

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected quic://host:port without path/query/fragment): {s}"
				));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host: {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("invalid endpoint host (IPv6 must be bracketed like quic://[::1]:4500): {s}"));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			if port == 0 {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_ipv4() {
			let e = BindEndpoint::parse("quic://127.0.0.1:4500").unwrap();
			assert_eq!(e.host, "127.0.0.1");
			assert_eq!(e.port, 4500);
			assert_eq!(e.to_socket_addr().unwrap().to_string(), "127.0.0.1:4500");
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = BindEndpoint::parse("quic://[::1]:4500").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.to_socket_addr().unwrap().to_string(), "[::1]:4500");
		}

		#[test]
		fn rejects_unbracketed_ipv6() {
			assert!(BindEndpoint::parse("quic://::1:4500").is_err());
		}

		#[test]
		fn rejects_junk() {
			assert!(BindEndpoint::parse("quic://127.0.0.1:4500/x").is_err());
			assert!(BindEndpoint::parse("quic://127.0.0.1:0").is_err());
			assert!(BindEndpoint::parse("quic://127.0.0.1").is_err());
			assert!(BindEndpoint::parse("tcp://127.0.0.1:4500").is_err());
		}

		#[test]
		fn dns_names_parse_but_do_not_bind() {
			let e = BindEndpoint::parse("quic://relay.example.com:443").unwrap();
			assert_eq!(e.hostport(), "relay.example.com:443");
			assert!(e.to_socket_addr().is_err());
		}
	}
}
