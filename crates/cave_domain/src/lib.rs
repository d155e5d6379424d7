#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing domain values from wire strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("unknown direction: {0}")]
	UnknownDirection(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Identity of a player, as issued by the credential service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
	/// Create a non-empty `PlayerId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for PlayerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for PlayerId {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		PlayerId::new(s.to_string())
	}
}

/// Per-login session token; a fresh one is minted on every login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub uuid::Uuid);

impl SessionToken {
	/// Mint a new random token (128-bit, collision-free in practice).
	pub fn mint() -> Self {
		Self(uuid::Uuid::new_v4())
	}

	/// Parse a token from its wire string.
	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}
		uuid::Uuid::parse_str(s)
			.map(Self)
			.map_err(|_| ParseError::InvalidFormat(format!("expected uuid session token: {s}")))
	}
}

impl fmt::Display for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// The six exit directions of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
	North,
	South,
	East,
	West,
	Up,
	Down,
}

impl Direction {
	pub const ALL: [Direction; 6] = [
		Direction::North,
		Direction::South,
		Direction::East,
		Direction::West,
		Direction::Up,
		Direction::Down,
	];

	/// Stable wire identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Direction::North => "NORTH",
			Direction::South => "SOUTH",
			Direction::East => "EAST",
			Direction::West => "WEST",
			Direction::Up => "UP",
			Direction::Down => "DOWN",
		}
	}

	/// The direction leading back.
	pub const fn opposite(self) -> Direction {
		match self {
			Direction::North => Direction::South,
			Direction::South => Direction::North,
			Direction::East => Direction::West,
			Direction::West => Direction::East,
			Direction::Up => Direction::Down,
			Direction::Down => Direction::Up,
		}
	}
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Direction {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		match s.to_ascii_uppercase().as_str() {
			"NORTH" => Ok(Direction::North),
			"SOUTH" => Ok(Direction::South),
			"EAST" => Ok(Direction::East),
			"WEST" => Ok(Direction::West),
			"UP" => Ok(Direction::Up),
			"DOWN" => Ok(Direction::Down),
			other => Err(ParseError::UnknownDirection(other.to_string())),
		}
	}
}

/// Discrete room position in the cave grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
	pub x: i32,
	pub y: i32,
	pub z: i32,
}

impl Position {
	pub const ORIGIN: Position = Position { x: 0, y: 0, z: 0 };

	pub const fn new(x: i32, y: i32, z: i32) -> Self {
		Self { x, y, z }
	}

	/// The neighbouring position one step in `dir`.
	pub const fn step(self, dir: Direction) -> Position {
		match dir {
			Direction::North => Position::new(self.x, self.y + 1, self.z),
			Direction::South => Position::new(self.x, self.y - 1, self.z),
			Direction::East => Position::new(self.x + 1, self.y, self.z),
			Direction::West => Position::new(self.x - 1, self.y, self.z),
			Direction::Up => Position::new(self.x, self.y, self.z + 1),
			Direction::Down => Position::new(self.x, self.y, self.z - 1),
		}
	}

	/// Parse a `(x,y,z)` string.
	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		let inner = s
			.strip_prefix('(')
			.and_then(|rest| rest.strip_suffix(')'))
			.ok_or_else(|| ParseError::InvalidFormat(format!("expected (x,y,z): {s}")))?;

		let mut parts = inner.split(',').map(str::trim);
		let mut next = || {
			parts
				.next()
				.ok_or_else(|| ParseError::InvalidFormat(format!("expected (x,y,z): {s}")))?
				.parse::<i32>()
				.map_err(|_| ParseError::InvalidFormat(format!("expected integer coordinates: {s}")))
		};

		let pos = Position::new(next()?, next()?, next()?);
		if parts.next().is_some() {
			return Err(ParseError::InvalidFormat(format!("expected exactly three coordinates: {s}")));
		}
		Ok(pos)
	}
}

impl fmt::Display for Position {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "({},{},{})", self.x, self.y, self.z)
	}
}

impl FromStr for Position {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Position::parse(s)
	}
}

/// Geographic region a player belongs to; drives the weather lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
	/// Create a non-empty `Region`.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseError::Empty);
		}
		Ok(Self(name))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Region {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Stored room state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
	pub description: String,
	/// Player that dug the room; `None` for the seeded rooms.
	pub creator: Option<PlayerId>,
}

impl RoomRecord {
	pub fn new(description: impl Into<String>, creator: Option<PlayerId>) -> Self {
		Self {
			description: description.into(),
			creator,
		}
	}
}

/// Stored player state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
	pub player_id: PlayerId,
	pub name: String,
	pub region: Region,
	pub position: Position,
}
