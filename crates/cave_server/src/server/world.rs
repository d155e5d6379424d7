#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cave_domain::{PlayerRecord, Position};
use cave_protocol::{Reply, Request, methods};
use tracing::{info, warn};

use crate::server::breaker::CircuitBreaker;
use crate::server::commands::CommandRegistry;
use crate::server::player::Player;
use crate::server::router::Dispatcher;
use crate::server::services::{AuthOutcome, CredentialService, WeatherService};
use crate::server::session::{LogoutOutcome, SessionTable};
use crate::server::storage::{CaveStorage, LockTable};

/// Shared collaborators wired together at startup.
pub struct WorldContext {
	pub sessions: Arc<SessionTable>,
	pub storage: Arc<dyn CaveStorage>,
	pub locks: Arc<LockTable>,
	pub lock_wait: Duration,
	pub registry: Arc<CommandRegistry>,
	pub credentials: Arc<dyn CredentialService>,
	pub credential_breaker: Arc<CircuitBreaker<Option<AuthOutcome>>>,
	pub weather: Arc<dyn WeatherService>,
	pub weather_breaker: Arc<CircuitBreaker<String>>,
	pub config_description: String,
}

/// Handler for the `cave-` method family: login, logout, and the
/// configuration description.
pub struct CaveHandler {
	ctx: Arc<WorldContext>,
}

impl CaveHandler {
	pub fn new(ctx: Arc<WorldContext>) -> Self {
		Self { ctx }
	}

	async fn login(&self, request: &Request) -> anyhow::Result<Reply> {
		let login_name = request.parameter.clone();
		let password = request.parameter_tail.first().cloned().unwrap_or_default();

		let credentials = Arc::clone(&self.ctx.credentials);
		let checked = self
			.ctx
			.credential_breaker
			.guarded_call(&request.parameter, move || async move {
				credentials.authenticate(&login_name, &password).await
			})
			.await;

		let outcome = match checked {
			Ok(Some(outcome)) => outcome,
			Ok(None) => {
				info!(login = %request.parameter, "login rejected by the credential service");
				return Ok(Reply::ok("LOGIN_FAILED", vec![]));
			},
			Err(err) => {
				warn!(login = %request.parameter, %err, "credential service unavailable");
				return Ok(Reply::ok("LOGIN_FAILED_SERVER_ERROR", vec![]));
			},
		};

		// First login ever creates the player's record at the entry room.
		if self.ctx.storage.player_record(&outcome.player_id).await?.is_none() {
			self.ctx
				.storage
				.put_player_record(PlayerRecord {
					player_id: outcome.player_id.clone(),
					name: outcome.player_name.clone(),
					region: outcome.region.clone(),
					position: Position::ORIGIN,
				})
				.await?;
		}

		let player = Arc::new(Player::new(
			outcome.player_id.clone(),
			outcome.player_name,
			outcome.region,
			Arc::clone(&self.ctx.storage),
			Arc::clone(&self.ctx.weather),
			Arc::clone(&self.ctx.weather_breaker),
			Arc::clone(&self.ctx.locks),
			self.ctx.lock_wait,
			Arc::clone(&self.ctx.registry),
		));

		let (token, superseded) = self.ctx.sessions.login(player).await;
		info!(player_id = %outcome.player_id, superseded, "login succeeded");
		metrics::counter!("logins", "superseded" => superseded.to_string()).increment(1);

		let primary = if superseded { "LOGIN_ALREADY_ACTIVE" } else { "LOGIN_SUCCESS" };
		Ok(Reply::ok(primary, vec![outcome.player_id.to_string(), token.to_string()]))
	}

	async fn logout(&self, request: &Request) -> anyhow::Result<Reply> {
		let Ok(player_id) = request.parameter.parse() else {
			return Ok(Reply::ok("PLAYER_NOT_IN_CAVE", vec![]));
		};

		match self.ctx.sessions.logout(&player_id).await {
			LogoutOutcome::Success => {
				info!(player_id = %player_id, "logout");
				Ok(Reply::ok("SUCCESS", vec![]))
			},
			LogoutOutcome::NotPresent => Ok(Reply::ok("PLAYER_NOT_IN_CAVE", vec![])),
		}
	}
}

#[async_trait]
impl Dispatcher for CaveHandler {
	async fn dispatch(&self, request: &Request) -> anyhow::Result<Reply> {
		match request.method.as_str() {
			methods::CAVE_LOGIN => self.login(request).await,
			methods::CAVE_LOGOUT => self.logout(request).await,
			methods::CAVE_DESCRIBE_CONFIGURATION => Ok(Reply::ok(self.ctx.config_description.clone(), vec![])),
			_ => Ok(crate::server::router::unknown_method_reply(request)),
		}
	}
}
