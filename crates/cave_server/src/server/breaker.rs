#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Breaker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl core::fmt::Display for BreakerState {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str(match self {
			BreakerState::Closed => "CLOSED",
			BreakerState::Open => "OPEN",
			BreakerState::HalfOpen => "HALF_OPEN",
		})
	}
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
	/// Consecutive failures that trip the breaker open.
	pub failure_threshold: u32,
	/// How long the breaker stays open before admitting a trial call.
	pub cooldown: Duration,
	/// Upper bound on a single guarded call; overruns count as failures.
	pub call_timeout: Duration,
	/// Lifetime of cached last-known-good results. Zero disables the cache.
	pub cache_ttl: Duration,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 3,
			cooldown: Duration::from_secs(30),
			call_timeout: Duration::from_secs(2),
			cache_ttl: Duration::from_secs(10),
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakerError {
	#[error("{name} is unavailable (breaker {state})")]
	Unavailable { name: String, state: BreakerState },
}

impl BreakerError {
	pub fn state(&self) -> BreakerState {
		match self {
			BreakerError::Unavailable { state, .. } => *state,
		}
	}
}

#[derive(Debug)]
struct Inner<T> {
	state: BreakerState,
	consecutive_failures: u32,
	opened_at: Option<Instant>,
	trial_in_flight: bool,
	/// Bumped on every state transition. Calls remember the generation
	/// they were admitted under; an outcome arriving after a transition
	/// is stale and must not move the state machine again.
	generation: u64,
	cache: HashMap<String, (T, Instant)>,
}

enum Phase {
	/// Normal call; a failure counts toward the threshold.
	Invoke,
	/// Single probe after the cooldown; its outcome decides the state.
	Trial,
}

/// Three-state circuit breaker guarding calls to one external
/// collaborator. Successful results are cached per request identity so
/// an open breaker can serve a recent answer instead of failing.
#[derive(Debug)]
pub struct CircuitBreaker<T: Clone> {
	name: String,
	config: BreakerConfig,
	inner: Mutex<Inner<T>>,
}

impl<T: Clone> CircuitBreaker<T> {
	pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
		Self {
			name: name.into(),
			config,
			inner: Mutex::new(Inner {
				state: BreakerState::Closed,
				consecutive_failures: 0,
				opened_at: None,
				trial_in_flight: false,
				generation: 0,
				cache: HashMap::new(),
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn state(&self) -> BreakerState {
		self.inner.lock().await.state
	}

	/// Run `op` under breaker supervision. `cache_key` identifies the
	/// request so a recent successful answer can stand in while the
	/// breaker is open.
	pub async fn guarded_call<F, Fut>(&self, cache_key: &str, op: F) -> Result<T, BreakerError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = anyhow::Result<T>>,
	{
		let (phase, admitted_gen) = {
			let mut inner = self.inner.lock().await;
			match inner.state {
				BreakerState::Closed => (Phase::Invoke, inner.generation),
				BreakerState::Open => {
					let elapsed = inner.opened_at.map(|at| at.elapsed() >= self.config.cooldown).unwrap_or(true);
					if elapsed {
						inner.state = BreakerState::HalfOpen;
						inner.trial_in_flight = true;
						inner.generation += 1;
						tracing::info!(breaker = %self.name, "cooldown elapsed, admitting trial call");
						(Phase::Trial, inner.generation)
					} else {
						if let Some(cached) = self.fresh_cached(&inner, cache_key) {
							metrics::counter!("breaker_cache_hits", "breaker" => self.name.clone()).increment(1);
							return Ok(cached);
						}
						metrics::counter!("breaker_rejections", "breaker" => self.name.clone()).increment(1);
						return Err(self.unavailable(BreakerState::Open));
					}
				},
				BreakerState::HalfOpen => {
					if inner.trial_in_flight {
						if let Some(cached) = self.fresh_cached(&inner, cache_key) {
							metrics::counter!("breaker_cache_hits", "breaker" => self.name.clone()).increment(1);
							return Ok(cached);
						}
						metrics::counter!("breaker_rejections", "breaker" => self.name.clone()).increment(1);
						return Err(self.unavailable(BreakerState::HalfOpen));
					}
					inner.trial_in_flight = true;
					(Phase::Trial, inner.generation)
				},
			}
		};

		// The guarded call runs without holding the breaker lock.
		let outcome = tokio::time::timeout(self.config.call_timeout, op()).await;

		let mut inner = self.inner.lock().await;
		let stale = inner.generation != admitted_gen;
		match outcome {
			Ok(Ok(value)) => {
				if !self.config.cache_ttl.is_zero() {
					inner.cache.insert(cache_key.to_string(), (value.clone(), Instant::now()));
				}
				if stale {
					// The state machine moved on while this call was in
					// flight; keep the answer, leave the state alone.
					tracing::debug!(breaker = %self.name, "stale success, state unchanged");
					return Ok(value);
				}
				match phase {
					Phase::Trial => {
						tracing::info!(breaker = %self.name, "trial call succeeded, closing breaker");
						inner.state = BreakerState::Closed;
						inner.consecutive_failures = 0;
						inner.opened_at = None;
						inner.trial_in_flight = false;
						inner.generation += 1;
					},
					Phase::Invoke => {
						inner.consecutive_failures = 0;
					},
				}
				Ok(value)
			},
			Ok(Err(error)) => self.record_failure(&mut inner, phase, stale, format!("{error:#}")),
			Err(_) => self.record_failure(&mut inner, phase, stale, format!("call exceeded {:?}", self.config.call_timeout)),
		}
	}

	fn record_failure(&self, inner: &mut Inner<T>, phase: Phase, stale: bool, cause: String) -> Result<T, BreakerError> {
		metrics::counter!("breaker_failures", "breaker" => self.name.clone()).increment(1);
		match phase {
			Phase::Invoke => {
				if stale {
					tracing::debug!(breaker = %self.name, %cause, "stale failure, state unchanged");
					return Err(self.unavailable(BreakerState::Closed));
				}
				inner.consecutive_failures += 1;
				tracing::warn!(
					breaker = %self.name,
					failures = inner.consecutive_failures,
					%cause,
					"guarded call failed"
				);
				let reported = inner.state;
				if inner.consecutive_failures >= self.config.failure_threshold {
					inner.state = BreakerState::Open;
					inner.opened_at = Some(Instant::now());
					inner.generation += 1;
					tracing::warn!(breaker = %self.name, "failure threshold reached, opening breaker");
				}
				Err(self.unavailable(reported))
			},
			Phase::Trial => {
				inner.state = BreakerState::Open;
				inner.opened_at = Some(Instant::now());
				inner.trial_in_flight = false;
				inner.generation += 1;
				tracing::warn!(breaker = %self.name, %cause, "trial call failed, reopening breaker");
				Err(self.unavailable(BreakerState::Open))
			},
		}
	}

	fn fresh_cached(&self, inner: &Inner<T>, cache_key: &str) -> Option<T> {
		if self.config.cache_ttl.is_zero() {
			return None;
		}
		inner
			.cache
			.get(cache_key)
			.filter(|(_, stored_at)| stored_at.elapsed() < self.config.cache_ttl)
			.map(|(value, _)| value.clone())
	}

	fn unavailable(&self, state: BreakerState) -> BreakerError {
		BreakerError::Unavailable {
			name: self.name.clone(),
			state,
		}
	}
}
