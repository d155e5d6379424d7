use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cave_protocol::{DEFAULT_MAX_FRAME_SIZE, Reply, Request, StatusCode, decode_reply, encode_request, methods};
use cave_server::config::ServerConfig;
use cave_server::server::compose;
use cave_server::server::reactor::{Reactor, build_reactor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

struct TestServer {
	addr: SocketAddr,
	shutdown: watch::Sender<bool>,
	serve: tokio::task::JoinHandle<()>,
}

impl TestServer {
	async fn start(cfg: ServerConfig) -> Self {
		let parts = compose(&cfg);
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
		let addr = listener.local_addr().expect("local addr");

		let reactor: Box<dyn Reactor> = build_reactor(
			cfg.server.reactor,
			cfg.server.worker_count,
			parts.router,
			parts.connection_settings,
		);
		let (shutdown, shutdown_rx) = watch::channel(false);
		let serve = tokio::spawn(async move {
			reactor.serve(listener, shutdown_rx).await.expect("serve");
		});

		Self { addr, shutdown, serve }
	}

	async fn stop(self) {
		let _ = self.shutdown.send(true);
		let _ = self.serve.await;
	}

	/// One request over a fresh connection, the way single-shot clients
	/// talk to the server.
	async fn call(&self, request: &Request) -> Reply {
		let mut stream = TcpStream::connect(self.addr).await.expect("connect");
		let frame = encode_request(request, DEFAULT_MAX_FRAME_SIZE).expect("encode");
		stream.write_all(&frame).await.expect("write");
		read_reply(&mut stream).await
	}
}

async fn read_reply(stream: &mut TcpStream) -> Reply {
	let mut prefix = [0u8; 4];
	stream.read_exact(&mut prefix).await.expect("read prefix");
	let len = u32::from_be_bytes(prefix) as usize;
	let mut payload = vec![0u8; len];
	stream.read_exact(&mut payload).await.expect("read payload");

	let mut frame = Vec::with_capacity(4 + len);
	frame.extend_from_slice(&prefix);
	frame.extend_from_slice(&payload);
	let (reply, _) = decode_reply(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	reply
}

fn request(method: &str, player_id: &str, session_id: &str, parameter: &str, tail: Vec<&str>) -> Request {
	Request::new(
		method,
		player_id,
		session_id,
		parameter,
		tail.into_iter().map(str::to_string).collect(),
	)
}

async fn login(server: &TestServer, name: &str) -> (String, String) {
	let reply = server.call(&request(methods::CAVE_LOGIN, "", "", name, vec!["secret"])).await;
	assert_eq!(reply.code, StatusCode::Ok);
	(reply.reply_tail[0].clone(), reply.reply_tail[1].clone())
}

#[tokio::test]
async fn full_pipeline_over_tcp() {
	let server = TestServer::start(ServerConfig::default()).await;

	let (player_id, token) = login(&server, "mathilde").await;

	let reply = server
		.call(&request(methods::PLAYER_GET_POSITION, &player_id, &token, "", vec![]))
		.await;
	assert_eq!(reply.reply.as_deref(), Some("(0,0,0)"));

	let reply = server
		.call(&request(methods::PLAYER_MOVE, &player_id, &token, "NORTH", vec![]))
		.await;
	assert_eq!(reply.reply.as_deref(), Some("true"));

	let reply = server
		.call(&request(methods::PLAYER_GET_SHORT_ROOM_DESCRIPTION, &player_id, &token, "", vec![]))
		.await;
	assert!(reply.reply.unwrap().contains("forest"));

	let reply = server.call(&request(methods::CAVE_LOGOUT, "", "", &player_id, vec![])).await;
	assert_eq!(reply.reply.as_deref(), Some("SUCCESS"));

	server.stop().await;
}

#[tokio::test]
async fn malformed_frames_get_a_failure_reply_before_close() {
	let server = TestServer::start(ServerConfig::default()).await;

	let mut stream = TcpStream::connect(server.addr).await.expect("connect");
	let garbage = b"not json at all";
	let mut frame = Vec::new();
	frame.extend_from_slice(&(garbage.len() as u32).to_be_bytes());
	frame.extend_from_slice(garbage);
	stream.write_all(&frame).await.expect("write");

	let reply = read_reply(&mut stream).await;
	assert_eq!(reply.code, StatusCode::GeneralServerFailure);
	assert!(reply.message.contains("malformed input"));

	// The server closes the connection after malformed input.
	let mut rest = Vec::new();
	stream.read_to_end(&mut rest).await.expect("read to end");
	assert!(rest.is_empty());

	server.stop().await;
}

#[tokio::test]
async fn unknown_method_travels_back_over_the_wire() {
	let server = TestServer::start(ServerConfig::default()).await;

	let reply = server.call(&request("wizard-cast", "p", "s", "fireball", vec![])).await;
	assert_eq!(reply.code, StatusCode::UnknownMethod);
	assert!(reply.message.contains("'wizard-cast'"));

	server.stop().await;
}

#[tokio::test]
async fn persistent_connections_serve_multiple_requests() {
	let mut cfg = ServerConfig::default();
	cfg.server.persistent_connections = true;
	let server = TestServer::start(cfg).await;

	let mut stream = TcpStream::connect(server.addr).await.expect("connect");

	let frame = encode_request(
		&request(methods::CAVE_LOGIN, "", "", "mathilde", vec!["secret"]),
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("encode");
	stream.write_all(&frame).await.expect("write");
	let reply = read_reply(&mut stream).await;
	assert_eq!(reply.code, StatusCode::Ok);
	let (player_id, token) = (reply.reply_tail[0].clone(), reply.reply_tail[1].clone());

	// Same connection, second request.
	let frame = encode_request(
		&request(methods::PLAYER_GET_REGION, &player_id, &token, "", vec![]),
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("encode");
	stream.write_all(&frame).await.expect("write");
	let reply = read_reply(&mut stream).await;
	assert_eq!(reply.reply.as_deref(), Some("aarhus"));

	server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_idle_persistent_connections() {
	let mut cfg = ServerConfig::default();
	cfg.server.persistent_connections = true;
	let server = TestServer::start(cfg).await;

	let mut stream = TcpStream::connect(server.addr).await.expect("connect");
	let frame = encode_request(
		&request(methods::CAVE_LOGIN, "", "", "mathilde", vec!["secret"]),
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("encode");
	stream.write_all(&frame).await.expect("write");
	let reply = read_reply(&mut stream).await;
	assert_eq!(reply.code, StatusCode::Ok);

	// The connection stays open waiting for the next frame; draining
	// must still finish promptly.
	tokio::time::timeout(Duration::from_secs(5), server.stop())
		.await
		.expect("drain finished");

	let mut rest = Vec::new();
	stream.read_to_end(&mut rest).await.expect("read to end");
	assert!(rest.is_empty());
}

#[tokio::test]
async fn pooled_reactor_serves_concurrent_clients() {
	let mut cfg = ServerConfig::default();
	cfg.server.reactor = cave_server::server::reactor::ReactorStrategy::Pooled;
	cfg.server.worker_count = 4;
	let server = Arc::new(TestServer::start(cfg).await);

	let (player_id, token) = login(&server, "mathilde").await;

	let mut tasks = Vec::new();
	for _ in 0..16 {
		let server = Arc::clone(&server);
		let player_id = player_id.clone();
		let token = token.clone();
		tasks.push(tokio::spawn(async move {
			server
				.call(&request(methods::PLAYER_GET_POSITION, &player_id, &token, "", vec![]))
				.await
		}));
	}
	for task in tasks {
		let reply = task.await.expect("join");
		assert_eq!(reply.reply.as_deref(), Some("(0,0,0)"));
	}

	match Arc::try_unwrap(server) {
		Ok(server) => server.stop().await,
		Err(_) => panic!("server still referenced"),
	}
}
