#![forbid(unsafe_code)]

use huddle_protocol::pb;
use thiserror::Error;

/// Typed operation failure crossing a component boundary. `kind` is the
/// wire taxonomy, `code` a stable machine-readable string, `detail` the
/// human-readable context.
#[derive(Debug, Error)]
#[error("{code}: {detail}")]
pub struct OpError {
	pub kind: pb::ErrorKind,
	pub code: &'static str,
	pub detail: String,
}

pub type OpResult<T> = Result<T, OpError>;

impl OpError {
	pub fn auth(code: &'static str, detail: impl Into<String>) -> Self {
		Self {
			kind: pb::ErrorKind::Auth,
			code,
			detail: detail.into(),
		}
	}

	pub fn validation(code: &'static str, detail: impl Into<String>) -> Self {
		Self {
			kind: pb::ErrorKind::Validation,
			code,
			detail: detail.into(),
		}
	}

	pub fn authorization(code: &'static str, detail: impl Into<String>) -> Self {
		Self {
			kind: pb::ErrorKind::Authorization,
			code,
			detail: detail.into(),
		}
	}

	pub fn conflict(code: &'static str, detail: impl Into<String>) -> Self {
		Self {
			kind: pb::ErrorKind::Conflict,
			code,
			detail: detail.into(),
		}
	}

	pub fn not_found(code: &'static str, detail: impl Into<String>) -> Self {
		Self {
			kind: pb::ErrorKind::NotFound,
			code,
			detail: detail.into(),
		}
	}

	/// Storage failure. Retryable by the caller; the relay never retries.
	pub fn transient(err: anyhow::Error) -> Self {
		Self {
			kind: pb::ErrorKind::Transient,
			code: "STORAGE_UNAVAILABLE",
			detail: format!("{err:#}"),
		}
	}

	pub fn is_transient(&self) -> bool {
		self.kind == pb::ErrorKind::Transient
	}

	pub fn to_pb(&self, request_id: &str) -> pb::Error {
		pb::Error {
			kind: self.kind as i32,
			code: self.code.to_string(),
			message: self.detail.clone(),
			request_id: request_id.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_onto_wire_error() {
		let err = OpError::conflict("USED", "invite already redeemed");
		let wire = err.to_pb("req-9");
		assert_eq!(wire.kind, pb::ErrorKind::Conflict as i32);
		assert_eq!(wire.code, "USED");
		assert_eq!(wire.request_id, "req-9");
	}

	#[test]
	fn transient_keeps_context_chain() {
		let err = OpError::transient(anyhow::anyhow!("pool timed out").context("insert message"));
		assert!(err.is_transient());
		assert!(err.detail.contains("insert message"));
		assert!(err.detail.contains("pool timed out"));
	}
}
