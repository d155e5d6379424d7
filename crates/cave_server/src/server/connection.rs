#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::BytesMut;
use cave_protocol::{FramingError, Reply, Request, StatusCode, encode_reply, try_decode_frame_from_buffer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::server::router::Router;

/// Per-connection behaviour knobs.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,
	/// When false the connection closes after one request/reply pair.
	pub persistent: bool,
}

struct ConnectionGauge;

impl ConnectionGauge {
	fn open() -> Self {
		metrics::gauge!("open_connections").increment(1.0);
		Self
	}
}

impl Drop for ConnectionGauge {
	fn drop(&mut self) {
		metrics::gauge!("open_connections").decrement(1.0);
	}
}

/// Serve one client connection: read frames, dispatch, write replies.
///
/// Malformed input gets a failure reply and closes the connection; a
/// handler error is logged and answered with a server-failure reply so
/// the client always sees a record for every frame it sent. The
/// shutdown channel closes connections that are idle waiting for the
/// next frame, so a draining reactor is never held up by them.
pub async fn handle_connection(
	conn_id: u64,
	mut stream: TcpStream,
	router: Arc<Router>,
	settings: ConnectionSettings,
	mut shutdown: watch::Receiver<bool>,
) {
	let _gauge = ConnectionGauge::open();
	let mut buffer = BytesMut::with_capacity(4096);
	debug!(conn_id, "connection open");

	loop {
		let request = match try_decode_frame_from_buffer::<Request>(&mut buffer, settings.max_frame_bytes) {
			Ok(Some(request)) if request.method.trim().is_empty() => {
				let reply = Reply::error(StatusCode::GeneralServerFailure, "malformed input: empty method key");
				let _ = write_reply(&mut stream, &reply, settings.max_frame_bytes).await;
				warn!(conn_id, "closing connection after request with empty method key");
				break;
			},
			Ok(Some(request)) => request,
			Ok(None) => {
				tokio::select! {
					changed = shutdown.changed() => {
						if changed.is_err() || *shutdown.borrow() {
							debug!(conn_id, "closing idle connection on shutdown");
							break;
						}
						continue;
					},
					read = stream.read_buf(&mut buffer) => match read {
						Ok(0) => {
							debug!(conn_id, "peer closed the connection");
							break;
						},
						Ok(_) => continue,
						Err(err) => {
							debug!(conn_id, %err, "read failed");
							break;
						},
					},
				}
			},
			Err(err) => {
				let reply = Reply::error(StatusCode::GeneralServerFailure, format!("malformed input: {err}"));
				let _ = write_reply(&mut stream, &reply, settings.max_frame_bytes).await;
				warn!(conn_id, %err, "closing connection after malformed frame");
				break;
			},
		};

		debug!(conn_id, method = %request.method, "request");
		let reply = match router.dispatch(&request).await {
			Ok(reply) => reply,
			Err(err) => {
				error!(conn_id, method = %request.method, error = %format!("{err:#}"), "handler failed");
				Reply::error(StatusCode::GeneralServerFailure, "internal server error")
			},
		};

		if let Err(err) = write_reply(&mut stream, &reply, settings.max_frame_bytes).await {
			debug!(conn_id, %err, "write failed");
			break;
		}

		if !settings.persistent {
			break;
		}
	}

	debug!(conn_id, "connection closed");
}

async fn write_reply(stream: &mut TcpStream, reply: &Reply, max_frame_bytes: usize) -> anyhow::Result<()> {
	let frame = match encode_reply(reply, max_frame_bytes) {
		Ok(frame) => frame,
		Err(FramingError::FrameTooLarge { len, max }) => {
			// An oversized reply still owes the client an answer.
			warn!(len, max, "reply exceeded the frame limit, substituting a failure reply");
			encode_reply(
				&Reply::error(StatusCode::GeneralServerFailure, "reply exceeded the frame size limit"),
				max_frame_bytes,
			)?
		},
		Err(err) => return Err(err.into()),
	};
	stream.write_all(&frame).await?;
	stream.flush().await?;
	Ok(())
}
