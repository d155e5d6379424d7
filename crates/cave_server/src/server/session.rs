#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use cave_domain::{PlayerId, SessionToken};
use tokio::sync::RwLock;
use tracing::info;

use crate::server::player::Player;

/// One row of the session table: the live player handle and the token
/// minted by the login that created it.
#[derive(Clone)]
pub struct SessionEntry {
	pub player: Arc<Player>,
	pub token: SessionToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
	Success,
	NotPresent,
}

/// Active sessions keyed by player id. The latest login wins: a second
/// login for a player already present retires the earlier handle and
/// replaces the row, so exactly one session per player is live.
#[derive(Default)]
pub struct SessionTable {
	entries: RwLock<HashMap<PlayerId, SessionEntry>>,
}

impl SessionTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Install `player` as the active session, minting a fresh token.
	/// Returns the token and whether an earlier session was superseded.
	pub async fn login(&self, player: Arc<Player>) -> (SessionToken, bool) {
		let token = SessionToken::mint();
		let player_id = player.player_id().clone();
		let entry = SessionEntry {
			player,
			token,
		};

		let superseded = {
			let mut entries = self.entries.write().await;
			let prior = entries.insert(player_id.clone(), entry);
			if let Some(prior) = &prior {
				prior.player.retire();
			}
			prior.is_some()
		};

		if superseded {
			info!(player_id = %player_id, "login superseded an active session");
		}
		metrics::gauge!("active_sessions").set(self.active_count().await as f64);
		(token, superseded)
	}

	pub async fn lookup(&self, player_id: &PlayerId) -> Option<SessionEntry> {
		self.entries.read().await.get(player_id).cloned()
	}

	/// Whether `claimed` is the active token for `player_id`.
	pub async fn validate(&self, player_id: &PlayerId, claimed: &str) -> bool {
		match self.entries.read().await.get(player_id) {
			Some(entry) => entry.token.to_string() == claimed,
			None => false,
		}
	}

	/// Remove the session row, retiring its handle.
	pub async fn logout(&self, player_id: &PlayerId) -> LogoutOutcome {
		let removed = self.entries.write().await.remove(player_id);
		let outcome = match removed {
			Some(entry) => {
				entry.player.retire();
				LogoutOutcome::Success
			},
			None => LogoutOutcome::NotPresent,
		};
		metrics::gauge!("active_sessions").set(self.active_count().await as f64);
		outcome
	}

	pub async fn active_count(&self) -> usize {
		self.entries.read().await.len()
	}
}
