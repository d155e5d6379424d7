#![forbid(unsafe_code)]

use async_trait::async_trait;
use cave_domain::{PlayerId, Region};

/// Identity established by a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
	pub player_id: PlayerId,
	pub player_name: String,
	pub region: Region,
}

/// External credential verification.
///
/// `Ok(None)` means the credentials were checked and rejected;
/// `Err` means the service itself could not be reached, which is the
/// signal the circuit breaker watches for.
#[async_trait]
pub trait CredentialService: Send + Sync {
	async fn authenticate(&self, login: &str, password: &str) -> anyhow::Result<Option<AuthOutcome>>;
}

/// External weather lookup, keyed by the player's region.
#[async_trait]
pub trait WeatherService: Send + Sync {
	async fn weather(&self, region: &Region) -> anyhow::Result<String>;
}

/// Credential service for demos and tests. Accepts any login with a
/// non-empty password and derives a stable player id from the login.
#[derive(Debug, Default)]
pub struct DemoCredentialService {
	default_region: String,
}

impl DemoCredentialService {
	pub fn new(default_region: impl Into<String>) -> Self {
		Self {
			default_region: default_region.into(),
		}
	}
}

#[async_trait]
impl CredentialService for DemoCredentialService {
	async fn authenticate(&self, login: &str, password: &str) -> anyhow::Result<Option<AuthOutcome>> {
		if login.trim().is_empty() || password.is_empty() {
			return Ok(None);
		}

		let region = if self.default_region.trim().is_empty() {
			"aarhus"
		} else {
			self.default_region.as_str()
		};

		Ok(Some(AuthOutcome {
			player_id: PlayerId::new(format!("id-{login}"))?,
			player_name: login.to_string(),
			region: Region::new(region)?,
		}))
	}
}

/// Weather service for demos and tests.
#[derive(Debug, Default)]
pub struct DemoWeatherService;

#[async_trait]
impl WeatherService for DemoWeatherService {
	async fn weather(&self, region: &Region) -> anyhow::Result<String> {
		Ok(format!("The weather in {region} is a mild drizzle, 12 degrees."))
	}
}
