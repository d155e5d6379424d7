#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::router::Router;

/// Concurrency strategies the accept loop can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactorStrategy {
	/// One task per connection, unbounded.
	Forking,
	/// A bounded pool: accepts only while a worker permit is free.
	Pooled,
}

/// Accept loop. One listener, one strategy, cooperative shutdown via
/// the watch channel.
#[async_trait]
pub trait Reactor: Send + Sync {
	async fn serve(&self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;
}

pub fn build_reactor(strategy: ReactorStrategy, worker_count: usize, router: Arc<Router>, settings: ConnectionSettings) -> Box<dyn Reactor> {
	match strategy {
		ReactorStrategy::Forking => Box::new(ForkingReactor::new(router, settings)),
		ReactorStrategy::Pooled => Box::new(PooledReactor::new(worker_count, router, settings)),
	}
}

/// Spawns a fresh task per accepted connection.
pub struct ForkingReactor {
	router: Arc<Router>,
	settings: ConnectionSettings,
	next_conn_id: AtomicU64,
}

impl ForkingReactor {
	pub fn new(router: Arc<Router>, settings: ConnectionSettings) -> Self {
		Self {
			router,
			settings,
			next_conn_id: AtomicU64::new(1),
		}
	}
}

#[async_trait]
impl Reactor for ForkingReactor {
	async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
		info!("forking reactor accepting connections");
		let mut connections = JoinSet::new();

		loop {
			tokio::select! {
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				},
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
							debug!(conn_id, %peer, "accepted");
							let router = Arc::clone(&self.router);
							let settings = self.settings.clone();
							let conn_shutdown = shutdown.clone();
							connections.spawn(async move {
								handle_connection(conn_id, stream, router, settings, conn_shutdown).await;
							});
						},
						Err(err) => {
							warn!(%err, "accept failed");
						},
					}
				},
				// Reap finished connection tasks so the set stays small.
				Some(_) = connections.join_next(), if !connections.is_empty() => {},
			}
		}

		info!(draining = connections.len(), "forking reactor shutting down");
		while connections.join_next().await.is_some() {}
		Ok(())
	}
}

/// Bounded pool reactor. A semaphore permit is taken before accepting,
/// so at most `worker_count` connections are in flight and the backlog
/// queues in the listener.
pub struct PooledReactor {
	workers: Arc<Semaphore>,
	router: Arc<Router>,
	settings: ConnectionSettings,
	next_conn_id: AtomicU64,
}

impl PooledReactor {
	pub fn new(worker_count: usize, router: Arc<Router>, settings: ConnectionSettings) -> Self {
		Self {
			workers: Arc::new(Semaphore::new(worker_count.max(1))),
			router,
			settings,
			next_conn_id: AtomicU64::new(1),
		}
	}
}

#[async_trait]
impl Reactor for PooledReactor {
	async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
		info!(workers = self.workers.available_permits(), "pooled reactor accepting connections");
		let mut connections = JoinSet::new();

		loop {
			let permit = tokio::select! {
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
					continue;
				},
				permit = Arc::clone(&self.workers).acquire_owned() => {
					permit.expect("worker semaphore closed")
				},
			};

			tokio::select! {
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				},
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
							debug!(conn_id, %peer, "accepted");
							let router = Arc::clone(&self.router);
							let settings = self.settings.clone();
							let conn_shutdown = shutdown.clone();
							connections.spawn(async move {
								let _permit = permit;
								handle_connection(conn_id, stream, router, settings, conn_shutdown).await;
							});
						},
						Err(err) => {
							warn!(%err, "accept failed");
						},
					}
				},
			}
		}

		info!(draining = connections.len(), "pooled reactor shutting down");
		while connections.join_next().await.is_some() {}
		Ok(())
	}
}
