//! Source ranking: merge probe results with static priority tiers
//!
//! Sort key, ascending: priority tier, then probe class (`ok` before
//! not-applicable), then measured latency. Timed-out endpoints are never
//! eligible. An optional second stage promotes endpoints whose transfer
//! protocol answered a lightweight `ls-remote`.

use crate::endpoint::Endpoint;
use crate::git::{GitCommand, TransferTool};
use crate::probe::{ProbeResult, ProbeStatus};
use futures::future::join_all;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probe result ordering and eligibility
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRanker {
	/// Admit endpoints that could not be probed by design
	pub include_not_applicable: bool,
}

impl SourceRanker {
	pub fn new(include_not_applicable: bool) -> Self {
		SourceRanker { include_not_applicable }
	}

	/// Whether a probe result may be used as a transfer source
	pub fn is_eligible(&self, result: &ProbeResult) -> bool {
		if !result.endpoint.has_usable_transfer() {
			return false;
		}
		match result.status {
			ProbeStatus::Ok => true,
			ProbeStatus::NotApplicable => self.include_not_applicable,
			ProbeStatus::Timeout => false,
		}
	}

	/// Produce the total order of eligible endpoints
	pub fn rank(&self, results: &[ProbeResult]) -> Vec<ProbeResult> {
		let mut available: Vec<ProbeResult> =
			results.iter().filter(|r| self.is_eligible(r)).cloned().collect();

		if available.is_empty() {
			warn!("No usable source found among {} probed endpoints", results.len());
			return available;
		}

		// Stable sort keeps registry order for full ties
		available.sort_by_key(sort_key);

		let labels: Vec<String> = available.iter().map(ProbeResult::label).collect();
		info!("Source order: {}", labels.join(" > "));
		available
	}

	/// Rank, then promote endpoints that pass a transfer-protocol probe
	pub async fn rank_verified(
		&self,
		results: &[ProbeResult],
		tool: &dyn TransferTool,
		repo_url: &str,
		cwd: &Path,
		timeout: Duration,
	) -> Vec<ProbeResult> {
		let ranked = self.rank(results);

		let checks: Vec<_> = ranked
			.iter()
			.filter(|r| r.status == ProbeStatus::Ok)
			.map(|r| {
				let cmd = GitCommand::ls_remote(&r.endpoint.transfer_url(repo_url), cwd, timeout);
				let name = r.endpoint.name.clone();
				async move {
					match tool.execute(&cmd, None).await {
						Ok(_) => Some(name),
						Err(e) => {
							debug!("ls-remote via {} failed: {}", name, e);
							None
						}
					}
				}
			})
			.collect();
		let passed: HashSet<String> = join_all(checks).await.into_iter().flatten().collect();

		promote_verified(ranked, &passed)
	}
}

fn sort_key(result: &ProbeResult) -> (i32, u8, u128) {
	let class = match result.status {
		ProbeStatus::Ok => 0,
		ProbeStatus::NotApplicable => 1,
		ProbeStatus::Timeout => 2,
	};
	(result.endpoint.priority, class, result.latency_millis().unwrap_or(u128::MAX))
}

/// Move endpoints named in `passed` ahead of the rest, keeping relative order
///
/// With no passing endpoint the HTTP order is returned unchanged.
pub fn promote_verified(ranked: Vec<ProbeResult>, passed: &HashSet<String>) -> Vec<ProbeResult> {
	if !ranked.iter().any(|r| passed.contains(&r.endpoint.name)) {
		if !ranked.is_empty() {
			warn!("No endpoint passed the ls-remote check, falling back to HTTP latency order");
		}
		return ranked;
	}

	let (mut verified, rest): (Vec<ProbeResult>, Vec<ProbeResult>) =
		ranked.into_iter().partition(|r| passed.contains(&r.endpoint.name));
	verified.extend(rest);

	let labels: Vec<&str> = verified.iter().map(|r| r.endpoint.name.as_str()).collect();
	info!("Source order after ls-remote check: {}", labels.join(" > "));
	verified
}

/// Extract the endpoints from a ranked result list
pub fn endpoints_of(ranked: &[ProbeResult]) -> Vec<Endpoint> {
	ranked.iter().map(|r| r.endpoint.clone()).collect()
}


// vim: ts=4
