#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cave_domain::{Direction, PlayerId, Position, Region, RoomRecord};
use cave_protocol::{Reply, Request, StatusCode, methods};
use thiserror::Error;
use tracing::error;

use crate::server::breaker::{BreakerError, CircuitBreaker};
use crate::server::commands::{CommandContext, CommandError, CommandRegistry};
use crate::server::router::Dispatcher;
use crate::server::services::WeatherService;
use crate::server::session::SessionTable;
use crate::server::storage::{CaveStorage, LockTable, StorageError};

#[derive(Debug, Error)]
pub enum PlayerError {
	/// The handle was superseded by a later login for the same player.
	#[error("player handle for {0} has been retired")]
	Retired(PlayerId),

	#[error(transparent)]
	Storage(#[from] StorageError),

	#[error(transparent)]
	Weather(#[from] BreakerError),
}

/// Server-side representation of one logged-in player. One handle is
/// created per login; a newer login for the same player retires the
/// older handle, which then refuses further use.
pub struct Player {
	player_id: PlayerId,
	name: String,
	region: Region,
	live: AtomicBool,
	storage: Arc<dyn CaveStorage>,
	weather_service: Arc<dyn WeatherService>,
	weather_breaker: Arc<CircuitBreaker<String>>,
	locks: Arc<LockTable>,
	lock_wait: Duration,
	registry: Arc<CommandRegistry>,
}

impl Player {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		player_id: PlayerId,
		name: String,
		region: Region,
		storage: Arc<dyn CaveStorage>,
		weather_service: Arc<dyn WeatherService>,
		weather_breaker: Arc<CircuitBreaker<String>>,
		locks: Arc<LockTable>,
		lock_wait: Duration,
		registry: Arc<CommandRegistry>,
	) -> Self {
		Self {
			player_id,
			name,
			region,
			live: AtomicBool::new(true),
			storage,
			weather_service,
			weather_breaker,
			locks,
			lock_wait,
			registry,
		}
	}

	pub fn player_id(&self) -> &PlayerId {
		&self.player_id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn region(&self) -> &Region {
		&self.region
	}

	pub fn is_live(&self) -> bool {
		self.live.load(Ordering::Acquire)
	}

	/// Mark the handle inert. Called when a later login supersedes it
	/// or when the player logs out.
	pub fn retire(&self) {
		self.live.store(false, Ordering::Release);
	}

	fn check_live(&self) -> Result<(), PlayerError> {
		if self.is_live() {
			Ok(())
		} else {
			Err(PlayerError::Retired(self.player_id.clone()))
		}
	}

	async fn stored_position(&self) -> Result<Position, PlayerError> {
		let record = self
			.storage
			.player_record(&self.player_id)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no record for player {}", self.player_id)))?;
		Ok(record.position)
	}

	pub async fn position(&self) -> Result<Position, PlayerError> {
		self.check_live()?;
		self.stored_position().await
	}

	pub async fn short_room_description(&self) -> Result<String, PlayerError> {
		self.check_live()?;
		let position = self.stored_position().await?;
		let room = self
			.storage
			.room(&position)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no room at {position}")))?;
		Ok(room.description)
	}

	/// Room description followed by the exits, one paragraph.
	pub async fn long_room_description(&self) -> Result<String, PlayerError> {
		self.check_live()?;
		let position = self.stored_position().await?;
		let room = self
			.storage
			.room(&position)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no room at {position}")))?;
		let exits = self.storage.exit_set(&position).await?;

		let exit_names: Vec<&str> = exits.iter().map(|dir| dir.as_str()).collect();
		let exit_line = if exit_names.is_empty() {
			"There are no exits.".to_string()
		} else {
			format!("There are exits in directions: {}.", exit_names.join(" "))
		};
		Ok(format!("{}\n{exit_line}", room.description))
	}

	pub async fn exit_set(&self) -> Result<Vec<Direction>, PlayerError> {
		self.check_live()?;
		let position = self.stored_position().await?;
		Ok(self.storage.exit_set(&position).await?)
	}

	/// Move one step in `direction`; returns whether a room was there
	/// to move into.
	pub async fn move_direction(&self, direction: Direction) -> Result<bool, PlayerError> {
		self.check_live()?;
		let _guard = self.locks.acquire(&self.player_id, self.lock_wait).await?;

		let mut record = self
			.storage
			.player_record(&self.player_id)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no record for player {}", self.player_id)))?;
		let target = record.position.step(direction);

		if self.storage.room(&target).await?.is_none() {
			return Ok(false);
		}
		record.position = target;
		self.storage.put_player_record(record).await?;
		Ok(true)
	}

	/// Dig a new room one step in `direction`; returns whether a room
	/// was created (false when one already exists there).
	pub async fn dig_room(&self, direction: Direction, description: &str) -> Result<bool, PlayerError> {
		self.check_live()?;
		let _guard = self.locks.acquire(&self.player_id, self.lock_wait).await?;

		let position = self.stored_position().await?;
		let target = position.step(direction);
		let room = RoomRecord::new(description, Some(self.player_id.clone()));
		Ok(self.storage.add_room(&target, room).await?)
	}

	/// Weather for the player's region, guarded by the weather breaker.
	pub async fn weather(&self) -> Result<String, PlayerError> {
		self.check_live()?;
		let cache_key = self.region.to_string();
		let region = self.region.clone();
		let service = Arc::clone(&self.weather_service);
		let report = self
			.weather_breaker
			.guarded_call(&cache_key, move || async move { service.weather(&region).await })
			.await?;
		Ok(report)
	}

	/// Run a named extension command.
	pub async fn execute(&self, name: &str, args: &[String]) -> Result<Reply, PlayerError> {
		self.check_live()?;

		let Some(command) = self.registry.instantiate(name) else {
			return Ok(Reply::error(
				StatusCode::CommandClassNotFound,
				format!("no command registered under '{name}'"),
			));
		};

		let ctx = CommandContext {
			player_id: self.player_id.clone(),
			storage: Arc::clone(&self.storage),
			locks: Arc::clone(&self.locks),
			lock_wait: self.lock_wait,
		};

		match command.execute(&ctx, args).await {
			Ok(output) => Ok(Reply::ok(output.reply, output.reply_tail)),
			Err(CommandError::InvalidArguments(cause)) => Ok(Reply::error(
				StatusCode::CommandInstantiationFailure,
				format!("command '{name}' rejected its arguments: {cause}"),
			)),
			Err(CommandError::Storage(err)) => Err(PlayerError::Storage(err)),
		}
	}
}

/// Handler for the `player-` method family. Resolves the subject
/// player through the session table, enforces the session token, then
/// delegates to the live `Player` handle.
pub struct PlayerHandler {
	sessions: Arc<SessionTable>,
}

impl PlayerHandler {
	pub fn new(sessions: Arc<SessionTable>) -> Self {
		Self { sessions }
	}

	fn failure_reply(&self, request: &Request, error: PlayerError) -> Reply {
		match error {
			PlayerError::Retired(player_id) => Reply::error(
				StatusCode::SessionExpired,
				format!("the login behind this call for player {player_id} has been superseded"),
			),
			PlayerError::Storage(err) => {
				error!(method = %request.method, player_id = %request.player_id, %err, "storage failure");
				Reply::error(StatusCode::StorageUnavailable, err.to_string())
			},
			PlayerError::Weather(err) => Reply::error(StatusCode::GeneralServerFailure, err.to_string()),
		}
	}
}

#[async_trait]
impl Dispatcher for PlayerHandler {
	async fn dispatch(&self, request: &Request) -> anyhow::Result<Reply> {
		let Ok(player_id) = PlayerId::new(request.player_id.as_str()) else {
			return Ok(Reply::error(
				StatusCode::SessionExpired,
				format!("player-level call without a player-id; request: {}", request.summary()),
			));
		};

		let Some(entry) = self.sessions.lookup(&player_id).await else {
			// A player-addressed call for a player with no session row
			// usually means the server lost state; surface it loudly.
			error!(player_id = %player_id, method = %request.method, "no session entry for player-level call");
			return Ok(Reply::error(
				StatusCode::StorageUnavailable,
				format!("no active session for player {player_id}"),
			));
		};

		if entry.token.to_string() != request.session_id {
			return Ok(Reply::error(
				StatusCode::SessionExpired,
				format!(
					"stale session for player {player_id}: presented token {} does not match the active token {}",
					request.session_id, entry.token
				),
			));
		}

		let player = entry.player;
		let outcome = match request.method.as_str() {
			methods::PLAYER_GET_SHORT_ROOM_DESCRIPTION => {
				player.short_room_description().await.map(|desc| Reply::ok(desc, vec![]))
			},
			methods::PLAYER_GET_LONG_ROOM_DESCRIPTION => {
				player.long_room_description().await.map(|desc| Reply::ok(desc, vec![]))
			},
			methods::PLAYER_GET_POSITION => player.position().await.map(|pos| Reply::ok(pos.to_string(), vec![])),
			methods::PLAYER_GET_REGION => Ok(Reply::ok(player.region().to_string(), vec![])),
			methods::PLAYER_GET_EXIT_SET => player.exit_set().await.map(|exits| {
				let names: Vec<String> = exits.iter().map(|dir| dir.to_string()).collect();
				Reply::ok(names.len().to_string(), names)
			}),
			methods::PLAYER_MOVE => match request.parameter.parse::<Direction>() {
				Ok(direction) => player.move_direction(direction).await.map(|moved| Reply::ok(moved.to_string(), vec![])),
				Err(err) => Ok(Reply::error(
					StatusCode::GeneralServerFailure,
					format!("bad direction '{}': {err}", request.parameter),
				)),
			},
			methods::PLAYER_DIG_ROOM => match request.parameter.parse::<Direction>() {
				Ok(direction) => {
					let description = request.parameter_tail.first().map(String::as_str).unwrap_or_default();
					player.dig_room(direction, description).await.map(|dug| Reply::ok(dug.to_string(), vec![]))
				},
				Err(err) => Ok(Reply::error(
					StatusCode::GeneralServerFailure,
					format!("bad direction '{}': {err}", request.parameter),
				)),
			},
			methods::PLAYER_GET_WEATHER => match player.weather().await {
				Ok(report) => Ok(Reply::ok(report, vec![])),
				Err(PlayerError::Weather(err)) => Ok(Reply::ok(
					format!("*** The weather service is unavailable ({}) ***", err.state()),
					vec![],
				)),
				Err(other) => Err(other),
			},
			methods::PLAYER_EXECUTE => {
				if request.parameter.trim().is_empty() {
					Ok(Reply::error(
						StatusCode::CommandClassNotFound,
						"player-execute needs a command name in the parameter field".to_string(),
					))
				} else {
					player.execute(&request.parameter, &request.parameter_tail).await
				}
			},
			_ => Ok(crate::server::router::unknown_method_reply(request)),
		};

		Ok(outcome.unwrap_or_else(|err| self.failure_reply(request, err)))
	}
}
