#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::server::reactor::ReactorStrategy;

/// Default config path: `~/.cave/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".cave").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub breaker: BreakerSettings,
	pub dependencies: DependencySettings,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Accept-loop concurrency strategy.
	pub reactor: ReactorStrategy,
	/// Worker pool size; only the pooled reactor consults it.
	pub worker_count: usize,
	/// Keep connections open across request/reply pairs.
	pub persistent_connections: bool,
	/// Maximum wire frame payload size in bytes.
	pub max_frame_bytes: usize,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Upper bound on waiting for a player record lock.
	pub lock_wait: Duration,
}

/// Circuit breaker settings shared by the external-service breakers.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
	pub failure_threshold: u32,
	pub cooldown: Duration,
	pub call_timeout: Duration,
	/// Last-known-good cache lifetime for the weather breaker.
	pub cache_ttl: Duration,
}

/// Endpoints of the server's external collaborators.
#[derive(Debug, Clone)]
pub struct DependencySettings {
	pub storage_endpoint: String,
	pub credential_endpoint: String,
	pub weather_endpoint: String,
	/// Region assigned to players whose credential record has none.
	pub default_region: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	breaker: FileBreakerSettings,

	#[serde(default)]
	dependencies: FileDependencySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	reactor: Option<ReactorStrategy>,
	worker_count: Option<usize>,
	persistent_connections: Option<bool>,
	max_frame_bytes: Option<usize>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	lock_wait_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBreakerSettings {
	failure_threshold: Option<u32>,
	cooldown_secs: Option<u64>,
	call_timeout_millis: Option<u64>,
	cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDependencySettings {
	storage_endpoint: Option<String>,
	credential_endpoint: Option<String>,
	weather_endpoint: Option<String>,
	default_region: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				reactor: file.server.reactor.unwrap_or(ReactorStrategy::Forking),
				worker_count: file.server.worker_count.unwrap_or(32),
				persistent_connections: file.server.persistent_connections.unwrap_or(false),
				max_frame_bytes: file.server.max_frame_bytes.unwrap_or(cave_protocol::DEFAULT_MAX_FRAME_SIZE),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				lock_wait: Duration::from_secs(file.server.lock_wait_secs.unwrap_or(3)),
			},
			breaker: BreakerSettings {
				failure_threshold: file.breaker.failure_threshold.unwrap_or(3),
				cooldown: Duration::from_secs(file.breaker.cooldown_secs.unwrap_or(30)),
				call_timeout: Duration::from_millis(file.breaker.call_timeout_millis.unwrap_or(2000)),
				cache_ttl: Duration::from_secs(file.breaker.cache_ttl_secs.unwrap_or(10)),
			},
			dependencies: DependencySettings {
				storage_endpoint: file
					.dependencies
					.storage_endpoint
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| "memory://local".to_string()),
				credential_endpoint: file
					.dependencies
					.credential_endpoint
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| "demo://credentials".to_string()),
				weather_endpoint: file
					.dependencies
					.weather_endpoint
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| "demo://weather".to_string()),
				default_region: file
					.dependencies
					.default_region
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| "aarhus".to_string()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
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
	if let Ok(v) = std::env::var("CAVE_REACTOR") {
		match v.trim().to_ascii_lowercase().as_str() {
			"forking" => {
				cfg.server.reactor = ReactorStrategy::Forking;
				info!("server config: reactor overridden by env (forking)");
			},
			"pooled" => {
				cfg.server.reactor = ReactorStrategy::Pooled;
				info!("server config: reactor overridden by env (pooled)");
			},
			_ => {},
		}
	}

	if let Ok(v) = std::env::var("CAVE_WORKER_COUNT")
		&& let Ok(count) = v.trim().parse::<usize>()
	{
		cfg.server.worker_count = count;
		info!(count, "server config: worker_count overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_PERSISTENT_CONNECTIONS")
		&& let Some(persistent) = parse_env_bool(&v)
	{
		cfg.server.persistent_connections = persistent;
		info!(persistent, "server config: persistent_connections overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_MAX_FRAME_BYTES")
		&& let Ok(bytes) = v.trim().parse::<usize>()
	{
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CAVE_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CAVE_LOCK_WAIT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.server.lock_wait = Duration::from_secs(secs);
		info!(secs, "server config: lock_wait overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_BREAKER_FAILURE_THRESHOLD")
		&& let Ok(threshold) = v.trim().parse::<u32>()
	{
		cfg.breaker.failure_threshold = threshold;
		info!(threshold, "breaker config: failure_threshold overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_BREAKER_COOLDOWN_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.breaker.cooldown = Duration::from_secs(secs);
		info!(secs, "breaker config: cooldown overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_BREAKER_CALL_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.breaker.call_timeout = Duration::from_millis(ms);
		info!(ms, "breaker config: call_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_BREAKER_CACHE_TTL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.breaker.cache_ttl = Duration::from_secs(secs);
		info!(secs, "breaker config: cache_ttl overridden by env");
	}

	if let Ok(v) = std::env::var("CAVE_STORAGE_ENDPOINT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.dependencies.storage_endpoint = v;
			info!("dependency config: storage_endpoint overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CAVE_CREDENTIAL_ENDPOINT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.dependencies.credential_endpoint = v;
			info!("dependency config: credential_endpoint overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CAVE_WEATHER_ENDPOINT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.dependencies.weather_endpoint = v;
			info!("dependency config: weather_endpoint overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CAVE_DEFAULT_REGION") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.dependencies.default_region = v;
			info!("dependency config: default_region overridden by env");
		}
	}
}

/// One-line rendering of the effective configuration, served by
/// `cave-describe-configuration`.
pub fn describe(cfg: &ServerConfig) -> String {
	format!(
		"reactor={:?} workers={} persistent={} max-frame={} storage={} credentials={} weather={} breaker-threshold={} breaker-cooldown={}s",
		cfg.server.reactor,
		cfg.server.worker_count,
		cfg.server.persistent_connections,
		cfg.server.max_frame_bytes,
		cfg.dependencies.storage_endpoint,
		cfg.dependencies.credential_endpoint,
		cfg.dependencies.weather_endpoint,
		cfg.breaker.failure_threshold,
		cfg.breaker.cooldown.as_secs(),
	)
}
