#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cave_domain::{PlayerId, Position};
use thiserror::Error;

use crate::server::storage::{CaveStorage, LockTable, StorageError};

/// Everything an extension command may touch while executing.
pub struct CommandContext {
	pub player_id: PlayerId,
	pub storage: Arc<dyn CaveStorage>,
	pub locks: Arc<LockTable>,
	pub lock_wait: Duration,
}

#[derive(Debug, Error)]
pub enum CommandError {
	#[error("invalid command arguments: {0}")]
	InvalidArguments(String),

	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Result of a successful command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
	pub reply: String,
	pub reply_tail: Vec<String>,
}

impl CommandOutput {
	pub fn new(reply: impl Into<String>, reply_tail: Vec<String>) -> Self {
		Self {
			reply: reply.into(),
			reply_tail,
		}
	}
}

/// A server-side command addressed by name rather than by a dedicated
/// wire method. New commands plug in without touching the dispatch
/// table.
#[async_trait]
pub trait ExtensionCommand: Send + Sync {
	async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<CommandOutput, CommandError>;
}

pub type CommandFactory = fn() -> Box<dyn ExtensionCommand>;

/// Name-to-factory table of extension commands. Each execution gets a
/// fresh command instance.
#[derive(Default)]
pub struct CommandRegistry {
	factories: HashMap<String, CommandFactory>,
}

impl CommandRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry with the commands the stock server ships.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		registry.register("jump", || Box::new(JumpCommand));
		registry.register("home", || Box::new(HomeCommand));
		registry
	}

	pub fn register(&mut self, name: impl Into<String>, factory: CommandFactory) {
		self.factories.insert(name.into(), factory);
	}

	/// `None` when no command is registered under `name`.
	pub fn instantiate(&self, name: &str) -> Option<Box<dyn ExtensionCommand>> {
		self.factories.get(name).map(|factory| factory())
	}
}

/// Teleport to an arbitrary existing room given as `(x,y,z)`.
pub struct JumpCommand;

#[async_trait]
impl ExtensionCommand for JumpCommand {
	async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<CommandOutput, CommandError> {
		let target = args
			.first()
			.ok_or_else(|| CommandError::InvalidArguments("jump needs a (x,y,z) argument".to_string()))?;
		let target = Position::parse(target).map_err(|err| CommandError::InvalidArguments(err.to_string()))?;

		let _guard = ctx.locks.acquire(&ctx.player_id, ctx.lock_wait).await?;

		if ctx.storage.room(&target).await?.is_none() {
			return Ok(CommandOutput::new("false", vec![format!("no room at {target}")]));
		}

		let mut record = ctx
			.storage
			.player_record(&ctx.player_id)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no record for player {}", ctx.player_id)))?;
		record.position = target;
		ctx.storage.put_player_record(record).await?;

		Ok(CommandOutput::new("true", vec![target.to_string()]))
	}
}

/// Teleport back to the entry room.
pub struct HomeCommand;

#[async_trait]
impl ExtensionCommand for HomeCommand {
	async fn execute(&self, ctx: &CommandContext, _args: &[String]) -> Result<CommandOutput, CommandError> {
		let _guard = ctx.locks.acquire(&ctx.player_id, ctx.lock_wait).await?;

		let mut record = ctx
			.storage
			.player_record(&ctx.player_id)
			.await?
			.ok_or_else(|| StorageError::Unavailable(format!("no record for player {}", ctx.player_id)))?;
		record.position = Position::ORIGIN;
		ctx.storage.put_player_record(record).await?;

		Ok(CommandOutput::new("true", vec![Position::ORIGIN.to_string()]))
	}
}
