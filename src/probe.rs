//! Concurrent mirror reachability probing
//!
//! Every endpoint is probed in parallel with the same time budget. The call
//! settles only after all probes have finished; no partial results escape.

use crate::endpoint::Endpoint;
use futures::future::join_all;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome class of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStatus {
	/// Success status code received within the budget
	Ok,

	/// Timeout, transport error or non-success status
	Timeout,

	/// Endpoint has no probe template and was not contacted
	NotApplicable,
}

impl fmt::Display for ProbeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProbeStatus::Ok => write!(f, "ok"),
			ProbeStatus::Timeout => write!(f, "timeout"),
			ProbeStatus::NotApplicable => write!(f, "n/a"),
		}
	}
}

/// Result of probing one endpoint. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
	pub endpoint: Endpoint,

	/// Measured latency, `None` meaning infinite
	pub latency: Option<Duration>,

	pub status: ProbeStatus,
}

impl ProbeResult {
	pub fn ok(endpoint: Endpoint, latency: Duration) -> Self {
		ProbeResult { endpoint, latency: Some(latency), status: ProbeStatus::Ok }
	}

	pub fn timeout(endpoint: Endpoint) -> Self {
		ProbeResult { endpoint, latency: None, status: ProbeStatus::Timeout }
	}

	pub fn not_applicable(endpoint: Endpoint) -> Self {
		ProbeResult { endpoint, latency: None, status: ProbeStatus::NotApplicable }
	}

	pub fn latency_millis(&self) -> Option<u128> {
		self.latency.map(|d| d.as_millis())
	}

	/// Short human readable label, e.g. `Ghfast(P:10, 120ms)`
	pub fn label(&self) -> String {
		let speed = match (self.status, self.latency_millis()) {
			(ProbeStatus::Ok, Some(ms)) => format!("{}ms", ms),
			(ProbeStatus::NotApplicable, _) => "N/A".to_string(),
			_ => "Timeout".to_string(),
		};
		format!("{}(P:{}, {})", self.endpoint.name, self.endpoint.priority, speed)
	}
}

/// HTTP latency prober
pub struct MirrorProbe {
	client: reqwest::Client,
	timeout: Duration,
}

impl MirrorProbe {
	/// Create a prober with the given per-endpoint time budget
	pub fn new(timeout: Duration) -> Self {
		// Builder only fails when the TLS backend cannot initialize
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.unwrap_or_else(|_| reqwest::Client::new());
		MirrorProbe { client, timeout }
	}

	/// Create a prober reusing an existing client
	pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
		MirrorProbe { client, timeout }
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Probe every endpoint concurrently against `base` + `resource`
	///
	/// Results are returned in registry order.
	pub async fn probe_all(
		&self,
		endpoints: &[Endpoint],
		base: &str,
		resource: &str,
	) -> Vec<ProbeResult> {
		let probes: Vec<_> =
			endpoints.iter().map(|endpoint| self.probe_one(endpoint, base, resource)).collect();
		let results = join_all(probes).await;

		let ok = results.iter().filter(|r| r.status == ProbeStatus::Ok).count();
		debug!("Probed {} endpoints, {} reachable", results.len(), ok);
		results
	}

	/// Probe a single endpoint
	pub async fn probe_one(&self, endpoint: &Endpoint, base: &str, resource: &str) -> ProbeResult {
		let url = match endpoint.probe_url(base, resource) {
			Some(url) => url,
			None => return ProbeResult::not_applicable(endpoint.clone()),
		};

		let started = Instant::now();
		let response = tokio::time::timeout(self.timeout, self.client.get(&url).send()).await;
		let elapsed = started.elapsed();

		match response {
			Ok(Ok(resp)) if resp.status().is_success() => {
				debug!("Probe {} ({}) ok in {}ms", endpoint.name, url, elapsed.as_millis());
				ProbeResult::ok(endpoint.clone(), elapsed)
			}
			Ok(Ok(resp)) => {
				warn!("Probe {} ({}) returned status {}", endpoint.name, url, resp.status());
				ProbeResult::timeout(endpoint.clone())
			}
			Ok(Err(e)) => {
				if e.is_timeout() {
					warn!("Probe {} ({}) timed out (>{}ms)", endpoint.name, url, self.timeout.as_millis());
				} else {
					warn!("Probe {} ({}) failed: {}", endpoint.name, url, e);
				}
				ProbeResult::timeout(endpoint.clone())
			}
			Err(_) => {
				warn!("Probe {} ({}) timed out (>{}ms)", endpoint.name, url, self.timeout.as_millis());
				ProbeResult::timeout(endpoint.clone())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_labels() {
		let endpoint = Endpoint::new("Ghfast", 10, Some("{base}"), "{url}");
		assert_eq!(
			ProbeResult::ok(endpoint.clone(), Duration::from_millis(120)).label(),
			"Ghfast(P:10, 120ms)"
		);
		assert_eq!(ProbeResult::timeout(endpoint.clone()).label(), "Ghfast(P:10, Timeout)");
		assert_eq!(ProbeResult::not_applicable(endpoint).label(), "Ghfast(P:10, N/A)");
	}

	#[tokio::test]
	async fn test_not_applicable_skips_network() {
		let probe = MirrorProbe::new(Duration::from_millis(200));
		let endpoint = Endpoint::new("GitClone", 70, None, "https://gitclone.com/{path}");
		let result = probe.probe_one(&endpoint, "http://127.0.0.1:9", "/README.md").await;
		assert_eq!(result.status, ProbeStatus::NotApplicable);
		assert_eq!(result.latency, None);
	}

	#[tokio::test]
	async fn test_refused_connection_is_timeout() {
		// Bind then drop to obtain a port with nothing listening
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let probe = MirrorProbe::new(Duration::from_millis(500));
		let endpoint = Endpoint::new("Dead", 1, Some("{base}"), "{url}");
		let base = format!("http://127.0.0.1:{}", port);
		let result = probe.probe_one(&endpoint, &base, "/README.md").await;
		assert_eq!(result.status, ProbeStatus::Timeout);
		assert_eq!(result.latency, None);
	}
}

// vim: ts=4
