#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::framing::{self, FramingError};
use crate::version::PROTOCOL_VERSION_U32;

/// Well-known method keys. Every key starts with the owning-type tag
/// (`cave-` or `player-`) that the router dispatches on.
pub mod methods {
	pub const CAVE_LOGIN: &str = "cave-login";
	pub const CAVE_LOGOUT: &str = "cave-logout";
	pub const CAVE_DESCRIBE_CONFIGURATION: &str = "cave-describe-configuration";

	pub const PLAYER_GET_SHORT_ROOM_DESCRIPTION: &str = "player-get-short-room-description";
	pub const PLAYER_GET_LONG_ROOM_DESCRIPTION: &str = "player-get-long-room-description";
	pub const PLAYER_GET_POSITION: &str = "player-get-position";
	pub const PLAYER_GET_REGION: &str = "player-get-region";
	pub const PLAYER_GET_EXIT_SET: &str = "player-get-exit-set";
	pub const PLAYER_MOVE: &str = "player-move";
	pub const PLAYER_DIG_ROOM: &str = "player-dig-room";
	pub const PLAYER_GET_WEATHER: &str = "player-get-weather";
	pub const PLAYER_EXECUTE: &str = "player-execute";
}

/// The routing prefix of a method key: everything up to and including
/// the first `-`. `None` when the key carries no separator at all.
pub fn method_prefix(method: &str) -> Option<&str> {
	method.find('-').map(|idx| &method[..=idx])
}

/// Reply status codes, transmitted in the `error-code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
	#[serde(rename = "OK")]
	Ok,
	#[serde(rename = "GENERAL_SERVER_FAILURE")]
	GeneralServerFailure,
	#[serde(rename = "COMMAND_CLASS_NOT_FOUND")]
	CommandClassNotFound,
	#[serde(rename = "COMMAND_INSTANTIATION_FAILURE")]
	CommandInstantiationFailure,
	#[serde(rename = "UNKNOWN_METHOD")]
	UnknownMethod,
	#[serde(rename = "SESSION_EXPIRED")]
	SessionExpired,
	#[serde(rename = "STORAGE_UNAVAILABLE")]
	StorageUnavailable,
}

impl StatusCode {
	/// Stable wire identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			StatusCode::Ok => "OK",
			StatusCode::GeneralServerFailure => "GENERAL_SERVER_FAILURE",
			StatusCode::CommandClassNotFound => "COMMAND_CLASS_NOT_FOUND",
			StatusCode::CommandInstantiationFailure => "COMMAND_INSTANTIATION_FAILURE",
			StatusCode::UnknownMethod => "UNKNOWN_METHOD",
			StatusCode::SessionExpired => "SESSION_EXPIRED",
			StatusCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
		}
	}
}

impl fmt::Display for StatusCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One request record. All values travel as strings; type conversion
/// is the callers' job on both sides, validated defensively on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
	pub method: String,

	/// Subject of the call; empty for world-level (`cave-`) methods.
	#[serde(rename = "player-id", default)]
	pub player_id: String,

	/// Token minted by the latest login for `player-id`; empty for
	/// world-level methods.
	#[serde(rename = "player-session-id", default)]
	pub session_id: String,

	#[serde(rename = "parameter", default)]
	pub parameter: String,

	#[serde(rename = "parameter-tail", default)]
	pub parameter_tail: Vec<String>,

	pub version: u32,
}

impl Request {
	pub fn new(
		method: impl Into<String>,
		player_id: impl Into<String>,
		session_id: impl Into<String>,
		parameter: impl Into<String>,
		parameter_tail: Vec<String>,
	) -> Self {
		Self {
			method: method.into(),
			player_id: player_id.into(),
			session_id: session_id.into(),
			parameter: parameter.into(),
			parameter_tail,
			version: PROTOCOL_VERSION_U32,
		}
	}

	/// One-line rendering used in error replies and logs.
	pub fn summary(&self) -> String {
		format!(
			"method={} player-id={} parameter={} parameter-tail={:?}",
			self.method, self.player_id, self.parameter, self.parameter_tail
		)
	}
}

/// One reply record. Invariant: `reply` is present exactly when
/// `code == StatusCode::Ok` (possibly as the empty string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
	#[serde(rename = "error-code")]
	pub code: StatusCode,

	#[serde(rename = "error-message", default)]
	pub message: String,

	#[serde(rename = "reply", skip_serializing_if = "Option::is_none", default)]
	pub reply: Option<String>,

	#[serde(rename = "reply-tail", default)]
	pub reply_tail: Vec<String>,

	pub version: u32,
}

impl Reply {
	/// Successful reply carrying a primary result and optional tail.
	pub fn ok(reply: impl Into<String>, reply_tail: Vec<String>) -> Self {
		Self {
			code: StatusCode::Ok,
			message: String::new(),
			reply: Some(reply.into()),
			reply_tail,
			version: PROTOCOL_VERSION_U32,
		}
	}

	/// Failure reply; the primary result is absent by construction.
	pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
		debug_assert!(code != StatusCode::Ok, "error replies must not carry StatusCode::Ok");
		Self {
			code,
			message: message.into(),
			reply: None,
			reply_tail: Vec::new(),
			version: PROTOCOL_VERSION_U32,
		}
	}

	pub fn is_ok(&self) -> bool {
		self.code == StatusCode::Ok
	}

	fn check_invariant(&self) -> Result<(), FramingError> {
		match (self.code, self.reply.as_ref()) {
			(StatusCode::Ok, None) => Err(FramingError::Malformed(
				"reply record with error-code OK is missing the reply field".to_string(),
			)),
			(code, Some(_)) if code != StatusCode::Ok => Err(FramingError::Malformed(format!(
				"reply record with error-code {code} must not carry a reply field"
			))),
			_ => Ok(()),
		}
	}
}

/// Encode a request into a wire frame.
pub fn encode_request(request: &Request, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	framing::encode_frame(request, max_frame_size)
}

/// Decode a request from wire bytes; fails with a malformed-input
/// error on bad framing, bad JSON, or a missing required field.
pub fn decode_request(src: &[u8], max_frame_size: usize) -> Result<(Request, usize), FramingError> {
	let (request, used): (Request, usize) = framing::decode_frame(src, max_frame_size)?;
	if request.method.trim().is_empty() {
		return Err(FramingError::Malformed("request record has an empty method key".to_string()));
	}
	Ok((request, used))
}

/// Encode a reply into a wire frame.
pub fn encode_reply(reply: &Reply, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	reply.check_invariant()?;
	framing::encode_frame(reply, max_frame_size)
}

/// Decode a reply from wire bytes, enforcing the reply/status invariant.
pub fn decode_reply(src: &[u8], max_frame_size: usize) -> Result<(Reply, usize), FramingError> {
	let (reply, used): (Reply, usize) = framing::decode_frame(src, max_frame_size)?;
	reply.check_invariant()?;
	Ok((reply, used))
}

#[cfg(test)]
mod tests {
	use crate::framing::DEFAULT_MAX_FRAME_SIZE;

	use super::*;

	#[test]
	fn method_prefix_up_to_first_separator() {
		assert_eq!(method_prefix("cave-login"), Some("cave-"));
		assert_eq!(method_prefix("player-get-long-room-description"), Some("player-"));
		assert_eq!(method_prefix("noseparator"), None);
	}

	#[test]
	fn request_roundtrip() {
		let request = Request::new(
			methods::PLAYER_MOVE,
			"player-7",
			"11111111-2222-3333-4444-555555555555",
			"NORTH",
			vec!["extra".to_string()],
		);

		let frame = encode_request(&request, DEFAULT_MAX_FRAME_SIZE).unwrap();
		let (decoded, used) = decode_request(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
		assert_eq!(used, frame.len());
		assert_eq!(decoded, request);
	}

	#[test]
	fn request_wire_keys_are_stable() {
		let request = Request::new(methods::CAVE_LOGIN, "", "", "mikkel", vec!["secret".to_string()]);
		let frame = encode_request(&request, DEFAULT_MAX_FRAME_SIZE).unwrap();
		let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();

		for key in ["method", "player-id", "player-session-id", "parameter", "parameter-tail", "version"] {
			assert!(json.get(key).is_some(), "missing wire key {key}");
		}
	}

	#[test]
	fn request_decode_rejects_missing_method() {
		let frame = crate::framing::encode_frame_default(&serde_json::json!({
			"player-id": "p",
			"version": 1,
		}))
		.unwrap();
		assert!(decode_request(&frame, DEFAULT_MAX_FRAME_SIZE).is_err());
	}

	#[test]
	fn reply_roundtrip_ok_and_error() {
		let ok = Reply::ok("", vec!["a".to_string(), "b".to_string()]);
		let frame = encode_reply(&ok, DEFAULT_MAX_FRAME_SIZE).unwrap();
		let (decoded, _) = decode_reply(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
		assert_eq!(decoded, ok);
		assert_eq!(decoded.reply.as_deref(), Some(""));

		let err = Reply::error(StatusCode::SessionExpired, "token mismatch");
		let frame = encode_reply(&err, DEFAULT_MAX_FRAME_SIZE).unwrap();
		let (decoded, _) = decode_reply(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
		assert_eq!(decoded, err);
		assert!(decoded.reply.is_none());
	}

	#[test]
	fn reply_wire_keys_and_codes_are_stable() {
		let reply = Reply::error(StatusCode::StorageUnavailable, "down");
		let frame = encode_reply(&reply, DEFAULT_MAX_FRAME_SIZE).unwrap();
		let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();

		assert_eq!(json["error-code"], "STORAGE_UNAVAILABLE");
		assert_eq!(json["error-message"], "down");
		assert!(json.get("reply").is_none());
		assert!(json.get("reply-tail").is_some());
	}

	#[test]
	fn reply_decode_enforces_status_invariant() {
		// OK without a primary result.
		let frame = crate::framing::encode_frame_default(&serde_json::json!({
			"error-code": "OK",
			"error-message": "",
			"reply-tail": [],
			"version": 1,
		}))
		.unwrap();
		assert!(decode_reply(&frame, DEFAULT_MAX_FRAME_SIZE).is_err());

		// Failure carrying a primary result.
		let frame = crate::framing::encode_frame_default(&serde_json::json!({
			"error-code": "SESSION_EXPIRED",
			"error-message": "stale",
			"reply": "oops",
			"reply-tail": [],
			"version": 1,
		}))
		.unwrap();
		assert!(decode_reply(&frame, DEFAULT_MAX_FRAME_SIZE).is_err());
	}
}
