#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Secret wrapper that never reaches logs through `Debug`/`Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(***)")
	}
}

/// Default config path: `~/.huddle/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".huddle").join("config.toml"))
}

/// Load the server config from TOML plus `HUDDLE_*` env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg);
	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub invites: InviteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret bearer tokens are verified against. Required.
	pub auth_hmac_secret: Option<SecretString>,
	/// History page size when the client does not ask for one.
	pub history_page_size: u32,
	/// Request rate limiting; 0 disables a dimension.
	pub request_rate_limit_per_conn_burst: u32,
	pub request_rate_limit_per_conn_per_minute: u32,
	pub request_rate_limit_per_room_burst: u32,
	pub request_rate_limit_per_room_per_minute: u32,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			tls_cert_path: None,
			tls_key_path: None,
			metrics_bind: None,
			health_bind: None,
			auth_hmac_secret: None,
			history_page_size: 50,
			request_rate_limit_per_conn_burst: 20,
			request_rate_limit_per_conn_per_minute: 240,
			request_rate_limit_per_room_burst: 10,
			request_rate_limit_per_room_per_minute: 120,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Database URL (sqlite: or postgres:). Required.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InviteSettings {
	/// Base for shareable invite URLs, e.g. `https://app.example.com`.
	pub public_base_url: Option<String>,
	/// Default invite lifetime in days; 0 means invites never expire.
	pub default_ttl_days: u32,
}

impl Default for InviteSettings {
	fn default() -> Self {
		Self {
			public_base_url: None,
			default_ttl_days: 7,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	invites: FileInviteSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	history_page_size: Option<u32>,
	request_rate_limit_per_conn_burst: Option<u32>,
	request_rate_limit_per_conn_per_minute: Option<u32>,
	request_rate_limit_per_room_burst: Option<u32>,
	request_rate_limit_per_room_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileInviteSettings {
	public_base_url: Option<String>,
	default_ttl_days: Option<u32>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();
		let invite_defaults = InviteSettings::default();

		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				history_page_size: file.server.history_page_size.unwrap_or(defaults.history_page_size),
				request_rate_limit_per_conn_burst: file
					.server
					.request_rate_limit_per_conn_burst
					.unwrap_or(defaults.request_rate_limit_per_conn_burst),
				request_rate_limit_per_conn_per_minute: file
					.server
					.request_rate_limit_per_conn_per_minute
					.unwrap_or(defaults.request_rate_limit_per_conn_per_minute),
				request_rate_limit_per_room_burst: file
					.server
					.request_rate_limit_per_room_burst
					.unwrap_or(defaults.request_rate_limit_per_room_burst),
				request_rate_limit_per_room_per_minute: file
					.server
					.request_rate_limit_per_room_per_minute
					.unwrap_or(defaults.request_rate_limit_per_room_per_minute),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			invites: InviteSettings {
				public_base_url: file.invites.public_base_url.filter(|s| !s.trim().is_empty()),
				default_ttl_days: file.invites.default_ttl_days.unwrap_or(invite_defaults.default_ttl_days),
			},
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("HUDDLE_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_PUBLIC_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.invites.public_base_url = Some(v);
			info!("invites: public_base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_INVITE_TTL_DAYS")
		&& let Ok(days) = v.trim().parse::<u32>()
	{
		cfg.invites.default_ttl_days = days;
		info!(days, "invites: default_ttl_days overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_HISTORY_PAGE_SIZE")
		&& let Ok(size) = v.trim().parse::<u32>()
	{
		cfg.server.history_page_size = size;
		info!(size, "server config: history_page_size overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_RATE_LIMIT_PER_CONN_BURST")
		&& let Ok(burst) = v.trim().parse::<u32>()
	{
		cfg.server.request_rate_limit_per_conn_burst = burst;
		info!(burst, "server config: request_rate_limit_per_conn_burst overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_RATE_LIMIT_PER_CONN_PER_MINUTE")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.server.request_rate_limit_per_conn_per_minute = rate;
		info!(rate, "server config: request_rate_limit_per_conn_per_minute overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_RATE_LIMIT_PER_ROOM_BURST")
		&& let Ok(burst) = v.trim().parse::<u32>()
	{
		cfg.server.request_rate_limit_per_room_burst = burst;
		info!(burst, "server config: request_rate_limit_per_room_burst overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_RATE_LIMIT_PER_ROOM_PER_MINUTE")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.server.request_rate_limit_per_room_per_minute = rate;
		info!(rate, "server config: request_rate_limit_per_room_per_minute overridden by env");
	}
}
