#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Claims carried by a verified bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
	/// Stable user id assigned by the identity collaborator.
	pub sub: String,
	/// Expiry, Unix seconds.
	pub exp: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthTokenError {
	#[error("invalid token format")]
	Format,
	#[error("invalid token signature")]
	Signature,
	#[error("malformed token claims")]
	Claims,
	#[error("token expired")]
	Expired,
}

/// Verify a `v1.<payload>.<sig>` HMAC-SHA256 bearer token and extract the
/// subject. Signature is checked before the claims are parsed.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthTokenError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthTokenError::Format);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthTokenError::Format)?;
	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthTokenError::Signature);
	}

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthTokenError::Format)?;
	let claims: Claims = serde_json::from_slice(&payload).map_err(|_| AuthTokenError::Claims)?;

	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(AuthTokenError::Expired);
	}

	Ok(claims)
}

/// Issue a token for `user_id` valid for `ttl_secs`. The identity service
/// is the production issuer; this exists for tests and local tooling.
pub fn issue_token(user_id: &str, secret: &str, ttl_secs: u64) -> String {
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	let claims = Claims {
		sub: user_id.to_string(),
		exp: now + ttl_secs,
	};

	let payload = serde_json::to_vec(&claims).unwrap_or_default();
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig_b64 = URL_SAFE_NO_PAD.encode(sign(payload_b64.as_bytes(), secret.as_bytes()));
	format!("v1.{payload_b64}.{sig_b64}")
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
