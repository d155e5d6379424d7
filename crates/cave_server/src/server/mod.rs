#![forbid(unsafe_code)]

pub mod breaker;
pub mod commands;
pub mod connection;
pub mod health;
pub mod player;
pub mod reactor;
pub mod router;
pub mod services;
pub mod session;
pub mod storage;
pub mod world;



#[cfg(test)]
mod session_tests;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ServerConfig, describe};
use self::breaker::{BreakerConfig, CircuitBreaker};
use self::commands::CommandRegistry;
use self::connection::ConnectionSettings;
use self::player::PlayerHandler;
use self::router::Router;
use self::services::{AuthOutcome, CredentialService, DemoCredentialService, DemoWeatherService, WeatherService};
use self::session::SessionTable;
use self::storage::{CaveStorage, InMemoryStorage, LockTable};
use self::world::{CaveHandler, WorldContext};

/// Everything the accept loop needs, wired from one config.
pub struct ServerParts {
	pub router: Arc<Router>,
	pub sessions: Arc<SessionTable>,
	pub credential_breaker: Arc<CircuitBreaker<Option<AuthOutcome>>>,
	pub weather_breaker: Arc<CircuitBreaker<String>>,
	pub connection_settings: ConnectionSettings,
}

/// Compose the dispatch pipeline from a config, using the built-in
/// storage and demo services for the `memory://` and `demo://`
/// endpoints.
pub fn compose(cfg: &ServerConfig) -> ServerParts {
	let storage: Arc<dyn CaveStorage> = Arc::new(InMemoryStorage::seeded());
	let credentials: Arc<dyn CredentialService> = Arc::new(DemoCredentialService::new(cfg.dependencies.default_region.clone()));
	let weather: Arc<dyn WeatherService> = Arc::new(DemoWeatherService);
	compose_with(cfg, storage, credentials, weather)
}

/// Compose the pipeline around explicit collaborators. Tests use this
/// to substitute failing services.
pub fn compose_with(
	cfg: &ServerConfig,
	storage: Arc<dyn CaveStorage>,
	credentials: Arc<dyn CredentialService>,
	weather: Arc<dyn WeatherService>,
) -> ServerParts {
	// Credentials must never be answered from a cache; a ttl of zero
	// disables it.
	let credential_breaker = Arc::new(CircuitBreaker::new(
		"credential-service",
		BreakerConfig {
			failure_threshold: cfg.breaker.failure_threshold,
			cooldown: cfg.breaker.cooldown,
			call_timeout: cfg.breaker.call_timeout,
			cache_ttl: Duration::ZERO,
		},
	));
	let weather_breaker = Arc::new(CircuitBreaker::new(
		"weather-service",
		BreakerConfig {
			failure_threshold: cfg.breaker.failure_threshold,
			cooldown: cfg.breaker.cooldown,
			call_timeout: cfg.breaker.call_timeout,
			cache_ttl: cfg.breaker.cache_ttl,
		},
	));

	let sessions = Arc::new(SessionTable::new());
	let ctx = Arc::new(WorldContext {
		sessions: Arc::clone(&sessions),
		storage,
		locks: Arc::new(LockTable::new()),
		lock_wait: cfg.server.lock_wait,
		registry: Arc::new(CommandRegistry::with_builtins()),
		credentials,
		credential_breaker: Arc::clone(&credential_breaker),
		weather,
		weather_breaker: Arc::clone(&weather_breaker),
		config_description: describe(cfg),
	});

	let mut router = Router::new();
	router.register("cave-", Arc::new(CaveHandler::new(Arc::clone(&ctx))));
	router.register("player-", Arc::new(PlayerHandler::new(Arc::clone(&sessions))));

	ServerParts {
		router: Arc::new(router),
		sessions,
		credential_breaker,
		weather_breaker,
		connection_settings: ConnectionSettings {
			max_frame_bytes: cfg.server.max_frame_bytes,
			persistent: cfg.server.persistent_connections,
		},
	}
}
