#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use cave_domain::{PlayerId, PlayerRecord, Position, Region};

use crate::server::breaker::{BreakerConfig, CircuitBreaker};
use crate::server::commands::CommandRegistry;
use crate::server::player::{Player, PlayerError};
use crate::server::services::DemoWeatherService;
use crate::server::session::{LogoutOutcome, SessionTable};
use crate::server::storage::{CaveStorage, InMemoryStorage, LockTable};

async fn make_player(storage: &Arc<InMemoryStorage>, id: &str) -> Arc<Player> {
	let player_id = PlayerId::new(id).unwrap();
	let region = Region::new("aarhus").unwrap();
	if storage.player_record(&player_id).await.unwrap().is_none() {
		storage
			.put_player_record(PlayerRecord {
				player_id: player_id.clone(),
				name: id.to_string(),
				region: region.clone(),
				position: Position::ORIGIN,
			})
			.await
			.unwrap();
	}

	let generic: Arc<dyn CaveStorage> = Arc::clone(storage) as Arc<dyn CaveStorage>;
	Arc::new(Player::new(
		player_id,
		id.to_string(),
		region,
		generic,
		Arc::new(DemoWeatherService),
		Arc::new(CircuitBreaker::new("weather-service", BreakerConfig::default())),
		Arc::new(LockTable::new()),
		Duration::from_millis(200),
		Arc::new(CommandRegistry::with_builtins()),
	))
}

#[tokio::test]
async fn login_mints_a_fresh_token_per_session() {
	let storage = Arc::new(InMemoryStorage::seeded());
	let sessions = SessionTable::new();

	let (first, superseded) = sessions.login(make_player(&storage, "p1").await).await;
	assert!(!superseded);

	sessions.logout(&PlayerId::new("p1").unwrap()).await;
	let (second, superseded) = sessions.login(make_player(&storage, "p1").await).await;
	assert!(!superseded);
	assert_ne!(first, second);
}

#[tokio::test]
async fn latest_login_wins_and_retires_the_earlier_handle() {
	let storage = Arc::new(InMemoryStorage::seeded());
	let sessions = SessionTable::new();
	let id = PlayerId::new("p1").unwrap();

	let first_player = make_player(&storage, "p1").await;
	let (first_token, _) = sessions.login(Arc::clone(&first_player)).await;

	let (second_token, superseded) = sessions.login(make_player(&storage, "p1").await).await;
	assert!(superseded);
	assert_ne!(first_token, second_token);
	assert_eq!(sessions.active_count().await, 1);

	// Only the latest token validates.
	assert!(!sessions.validate(&id, &first_token.to_string()).await);
	assert!(sessions.validate(&id, &second_token.to_string()).await);

	// The superseded handle is inert; the live one still works.
	assert!(matches!(first_player.position().await, Err(PlayerError::Retired(_))));
	let live = sessions.lookup(&id).await.unwrap().player;
	assert_eq!(live.position().await.unwrap(), Position::ORIGIN);
}

#[tokio::test]
async fn logout_removes_the_session_and_retires_the_handle() {
	let storage = Arc::new(InMemoryStorage::seeded());
	let sessions = SessionTable::new();
	let id = PlayerId::new("p1").unwrap();

	let player = make_player(&storage, "p1").await;
	sessions.login(Arc::clone(&player)).await;

	assert_eq!(sessions.logout(&id).await, LogoutOutcome::Success);
	assert_eq!(sessions.logout(&id).await, LogoutOutcome::NotPresent);
	assert!(sessions.lookup(&id).await.is_none());
	assert_eq!(sessions.active_count().await, 0);
	assert!(!player.is_live());
}

#[tokio::test]
async fn sessions_for_distinct_players_are_independent() {
	let storage = Arc::new(InMemoryStorage::seeded());
	let sessions = SessionTable::new();

	let (token_a, _) = sessions.login(make_player(&storage, "p1").await).await;
	let (token_b, _) = sessions.login(make_player(&storage, "p2").await).await;
	assert_eq!(sessions.active_count().await, 2);
	assert_ne!(token_a, token_b);

	sessions.logout(&PlayerId::new("p1").unwrap()).await;
	assert!(sessions.lookup(&PlayerId::new("p2").unwrap()).await.is_some());
}

#[tokio::test]
async fn retired_handle_refuses_mutating_operations() {
	let storage = Arc::new(InMemoryStorage::seeded());
	let player = make_player(&storage, "p1").await;
	player.retire();

	assert!(matches!(
		player.move_direction(cave_domain::Direction::North).await,
		Err(PlayerError::Retired(_))
	));
	assert!(matches!(
		player.dig_room(cave_domain::Direction::South, "hole").await,
		Err(PlayerError::Retired(_))
	));
	assert!(matches!(player.weather().await, Err(PlayerError::Retired(_))));
}
