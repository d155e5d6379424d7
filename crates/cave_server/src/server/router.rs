#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cave_protocol::{Reply, Request, StatusCode, method_prefix};

/// A family of wire methods sharing a prefix, handled as one unit.
#[async_trait]
pub trait Dispatcher: Send + Sync {
	async fn dispatch(&self, request: &Request) -> anyhow::Result<Reply>;
}

/// Prefix-keyed dispatch table. The method key up to and including the
/// first `-` selects the handler; everything else is the handler's
/// business.
#[derive(Default)]
pub struct Router {
	handlers: HashMap<String, Arc<dyn Dispatcher>>,
}

impl Router {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, prefix: impl Into<String>, handler: Arc<dyn Dispatcher>) {
		let prefix = prefix.into();
		debug_assert!(prefix.ends_with('-'), "handler prefixes include the separator");
		self.handlers.insert(prefix, handler);
	}

	pub fn route(&self, method: &str) -> Option<&Arc<dyn Dispatcher>> {
		method_prefix(method).and_then(|prefix| self.handlers.get(prefix))
	}

	pub async fn dispatch(&self, request: &Request) -> anyhow::Result<Reply> {
		match self.route(&request.method) {
			Some(handler) => {
				metrics::counter!("requests_dispatched", "method" => request.method.clone()).increment(1);
				handler.dispatch(request).await
			},
			None => {
				metrics::counter!("requests_unroutable").increment(1);
				Ok(unknown_method_reply(request))
			},
		}
	}
}

/// The reply for a method key no handler claims. It carries the
/// offending key verbatim plus a summary of the rejected request.
pub fn unknown_method_reply(request: &Request) -> Reply {
	Reply::error(
		StatusCode::UnknownMethod,
		format!("no handler for method key '{}'; request: {}", request.method, request.summary()),
	)
}
