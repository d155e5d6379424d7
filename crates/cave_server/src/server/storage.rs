#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use cave_domain::{Direction, PlayerId, PlayerRecord, Position, RoomRecord};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
	#[error("storage unavailable: {0}")]
	Unavailable(String),

	#[error("timed out waiting for the record lock of player {0}")]
	LockTimeout(PlayerId),
}

/// Record-oriented contract to the backing store. Persistence itself
/// is an external collaborator; the server only depends on this trait.
#[async_trait]
pub trait CaveStorage: Send + Sync {
	async fn room(&self, position: &Position) -> Result<Option<RoomRecord>, StorageError>;

	/// Create a room behind `position` if none exists; returns whether
	/// a room was created.
	async fn add_room(&self, position: &Position, room: RoomRecord) -> Result<bool, StorageError>;

	async fn player_record(&self, player_id: &PlayerId) -> Result<Option<PlayerRecord>, StorageError>;

	async fn put_player_record(&self, record: PlayerRecord) -> Result<(), StorageError>;

	/// Directions from `position` that lead to an existing room.
	async fn exit_set(&self, position: &Position) -> Result<Vec<Direction>, StorageError>;
}

/// In-memory storage used by tests and the default composition.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
	rooms: RwLock<HashMap<Position, RoomRecord>>,
	players: RwLock<HashMap<PlayerId, PlayerRecord>>,
}

impl InMemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Storage pre-populated with the entry room and its neighbours.
	pub fn seeded() -> Self {
		let mut rooms = HashMap::new();
		rooms.insert(
			Position::ORIGIN,
			RoomRecord::new("You are standing at the end of a road before a small brick building.", None),
		);
		rooms.insert(
			Position::new(0, 1, 0),
			RoomRecord::new("You are in open forest, with a deep valley to one side.", None),
		);
		rooms.insert(
			Position::new(1, 0, 0),
			RoomRecord::new("You are inside a building, a well house for a large spring.", None),
		);
		rooms.insert(
			Position::new(-1, 0, 0),
			RoomRecord::new("You have walked up a hill, still in the forest.", None),
		);
		rooms.insert(
			Position::new(0, 0, 1),
			RoomRecord::new("You are in the top of a tall tree, at the end of a road.", None),
		);
		Self {
			rooms: RwLock::new(rooms),
			players: RwLock::new(HashMap::new()),
		}
	}
}

#[async_trait]
impl CaveStorage for InMemoryStorage {
	async fn room(&self, position: &Position) -> Result<Option<RoomRecord>, StorageError> {
		Ok(self.rooms.read().await.get(position).cloned())
	}

	async fn add_room(&self, position: &Position, room: RoomRecord) -> Result<bool, StorageError> {
		let mut rooms = self.rooms.write().await;
		if rooms.contains_key(position) {
			return Ok(false);
		}
		rooms.insert(*position, room);
		Ok(true)
	}

	async fn player_record(&self, player_id: &PlayerId) -> Result<Option<PlayerRecord>, StorageError> {
		Ok(self.players.read().await.get(player_id).cloned())
	}

	async fn put_player_record(&self, record: PlayerRecord) -> Result<(), StorageError> {
		self.players.write().await.insert(record.player_id.clone(), record);
		Ok(())
	}

	async fn exit_set(&self, position: &Position) -> Result<Vec<Direction>, StorageError> {
		let rooms = self.rooms.read().await;
		Ok(Direction::ALL
			.into_iter()
			.filter(|dir| rooms.contains_key(&position.step(*dir)))
			.collect())
	}
}

/// Per-player advisory locks serializing read-modify-write sequences
/// on storage-backed records. Acquisition waits are bounded; a timeout
/// is reported as a recoverable storage failure.
#[derive(Debug, Default)]
pub struct LockTable {
	locks: StdMutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl LockTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn acquire(&self, player_id: &PlayerId, wait: Duration) -> Result<OwnedMutexGuard<()>, StorageError> {
		let lock = {
			let mut locks = self
				.locks
				.lock()
				.map_err(|_| StorageError::Unavailable("lock table poisoned".to_string()))?;
			Arc::clone(locks.entry(player_id.clone()).or_default())
		};

		match tokio::time::timeout(wait, lock.lock_owned()).await {
			Ok(guard) => Ok(guard),
			Err(_) => Err(StorageError::LockTimeout(player_id.clone())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn player_id(s: &str) -> PlayerId {
		PlayerId::new(s).unwrap()
	}

	#[tokio::test]
	async fn seeded_storage_has_entry_room_and_exits() {
		let storage = InMemoryStorage::seeded();
		let entry = storage.room(&Position::ORIGIN).await.unwrap().unwrap();
		assert!(entry.description.contains("brick building"));

		let exits = storage.exit_set(&Position::ORIGIN).await.unwrap();
		assert!(exits.contains(&Direction::North));
		assert!(exits.contains(&Direction::East));
		assert!(exits.contains(&Direction::West));
		assert!(exits.contains(&Direction::Up));
		assert!(!exits.contains(&Direction::South));
		assert!(!exits.contains(&Direction::Down));
	}

	#[tokio::test]
	async fn add_room_creates_only_once() {
		let storage = InMemoryStorage::seeded();
		let target = Position::new(0, -1, 0);
		let record = RoomRecord::new("A dark, newly dug room.", Some(player_id("p1")));

		assert!(storage.add_room(&target, record.clone()).await.unwrap());
		assert!(!storage.add_room(&target, record.clone()).await.unwrap());
		assert_eq!(storage.room(&target).await.unwrap(), Some(record));
	}

	#[tokio::test]
	async fn lock_table_times_out_when_held() {
		let locks = LockTable::new();
		let id = player_id("p1");

		let guard = locks.acquire(&id, Duration::from_millis(50)).await.unwrap();
		let err = locks.acquire(&id, Duration::from_millis(10)).await.unwrap_err();
		assert_eq!(err, StorageError::LockTimeout(id.clone()));

		drop(guard);
		assert!(locks.acquire(&id, Duration::from_millis(10)).await.is_ok());
	}

	#[tokio::test]
	async fn lock_table_isolates_players() {
		let locks = LockTable::new();
		let _guard = locks.acquire(&player_id("p1"), Duration::from_millis(10)).await.unwrap();
		assert!(locks.acquire(&player_id("p2"), Duration::from_millis(10)).await.is_ok());
	}
}
