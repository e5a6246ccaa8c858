//! Process-root context: repositories, catalog, policy and reconciliation
//!
//! [`Engine`] owns every long-lived piece of state. The catalog and the
//! exclusion policy live behind one async mutex so that every mutation and
//! every reconciliation pass observes a consistent pair. Transfers are
//! single-flight per repository. Reconciliation after a policy change runs
//! on a background worker; callers get a [`ReconcileTicket`] they may await.

use crate::callbacks::ProgressSink;
use crate::catalog::{Catalog, CatalogLoader, CatalogOrigin, ScanRoot};
use crate::config::{Config, RepoConfig};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::{FailedAttempt, SyncError};
use crate::git::TransferTool;
use crate::policy::{
	AddOutcome, ContentSwitches, FilterPolicyEngine, RemovalOutcome, StrictnessLevel,
};
use crate::probe::{MirrorProbe, ProbeResult, ProbeStatus};
use crate::rank::{endpoints_of, SourceRanker};
use crate::reconcile::{AliasTable, DirectoryReconciler, ReconcileStats};
use crate::store::ExclusionStore;
use crate::transfer::{FallbackTransferExecutor, TransferOutcome, TransferRequest};
use crate::update::{RepoUpdater, UpdateOutcome};
use crate::util::is_downloaded;
use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Catalog and policy, always observed together
struct PolicyState {
	catalog: Arc<Catalog>,
	policy: FilterPolicyEngine,
}

/// RAII single-flight marker for one repository
struct BusyGuard<'a> {
	busy: &'a StdMutex<HashSet<String>>,
	repo: String,
}

impl<'a> BusyGuard<'a> {
	fn acquire(busy: &'a StdMutex<HashSet<String>>, repo: &str) -> Result<Self, SyncError> {
		let mut set = busy.lock().unwrap_or_else(|e| e.into_inner());
		if !set.insert(repo.to_string()) {
			warn!("{}: transfer already in progress", repo);
			return Err(SyncError::Busy { repo: repo.to_string() });
		}
		Ok(BusyGuard { busy, repo: repo.to_string() })
	}
}

impl Drop for BusyGuard<'_> {
	fn drop(&mut self) {
		let mut set = self.busy.lock().unwrap_or_else(|e| e.into_inner());
		set.remove(&self.repo);
	}
}

/// How a repository was brought up to date
#[derive(Debug, Clone, PartialEq)]
pub enum RepoSync {
	Cloned(TransferOutcome),
	Updated(UpdateOutcome),
}

impl RepoSync {
	pub fn has_changes(&self) -> bool {
		match self {
			RepoSync::Cloned(_) => true,
			RepoSync::Updated(outcome) => outcome.has_changes,
		}
	}
}

impl fmt::Display for RepoSync {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RepoSync::Cloned(outcome) => {
				write!(f, "downloaded via {}", outcome.endpoint)?;
				if !outcome.failed.is_empty() {
					let names: Vec<&str> = outcome.failed.iter().map(|a| a.endpoint.as_str()).collect();
					write!(f, " (failed first: {})", names.join(", "))?;
				}
				Ok(())
			}
			RepoSync::Updated(outcome) => write!(
				f,
				"{}, {}",
				outcome.state,
				if outcome.has_changes { "changes pulled" } else { "no changes" }
			),
		}
	}
}

/// User and derived exclusions, listed separately
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionListing {
	pub user: Vec<String>,
	pub derived: Vec<String>,
}

/// Per-repository status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
	pub name: String,
	pub path: PathBuf,
	pub primary: bool,
	pub downloaded: bool,
	pub tip: Option<String>,
	pub busy: bool,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
	pub repos: Vec<RepoStatus>,
	pub catalog_assets: usize,
	pub catalog_origin: CatalogOrigin,
	pub level: StrictnessLevel,
	pub switches: ContentSwitches,
	pub user_exclusions: usize,
	pub derived_exclusions: usize,
	pub active_exclusions: usize,
}

impl fmt::Display for StatusReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for repo in &self.repos {
			let state = if repo.busy {
				"busy"
			} else if repo.downloaded {
				"downloaded"
			} else {
				"not downloaded"
			};
			write!(f, "{}{}: {}", repo.name, if repo.primary { " (primary)" } else { "" }, state)?;
			if let Some(tip) = &repo.tip {
				write!(f, " @ {}", &tip[..tip.len().min(12)])?;
			}
			writeln!(f, " [{}]", repo.path.display())?;
		}
		let origin = match &self.catalog_origin {
			CatalogOrigin::Manifest(path) => format!("manifest {}", path.display()),
			CatalogOrigin::Scan => "scan".to_string(),
			CatalogOrigin::Empty => "empty".to_string(),
		};
		writeln!(f, "Catalog: {} assets ({})", self.catalog_assets, origin)?;
		writeln!(
			f,
			"Policy: level {}, ai {}, easter egg {}, layout {}",
			self.level, self.switches.ai, self.switches.easter_egg, self.switches.layout
		)?;
		write!(
			f,
			"Exclusions: user {}, derived {}, active {}",
			self.user_exclusions, self.derived_exclusions, self.active_exclusions
		)
	}
}

struct ReconcileJob {
	reason: String,
	done: Option<oneshot::Sender<ReconcileStats>>,
}

/// Completion handle of a queued reconciliation
pub struct ReconcileTicket {
	rx: oneshot::Receiver<ReconcileStats>,
}

impl ReconcileTicket {
	/// Wait for the pass that covers this request
	pub async fn wait(self) -> Result<ReconcileStats, SyncError> {
		self.rx
			.await
			.map_err(|_| SyncError::Other { message: "reconcile worker stopped".to_string() })
	}
}

/// Synchronization engine
pub struct Engine {
	config: Config,
	registry: EndpointRegistry,
	tool: Arc<dyn TransferTool>,
	prober: MirrorProbe,
	reconciler: DirectoryReconciler,
	state: Mutex<PolicyState>,
	busy: StdMutex<HashSet<String>>,
	jobs: mpsc::UnboundedSender<ReconcileJob>,
}

impl Engine {
	/// Build the engine, load the policy and catalog, start the reconcile worker
	///
	/// Must be called inside a tokio runtime.
	pub async fn open(config: Config, tool: Arc<dyn TransferTool>) -> Result<Arc<Self>, SyncError> {
		let prober = MirrorProbe::new(config.probe.timeout());
		Self::open_with_prober(config, tool, prober).await
	}

	/// Like [`Engine::open`], probing through a caller-supplied HTTP client
	pub async fn open_with_prober(
		config: Config,
		tool: Arc<dyn TransferTool>,
		prober: MirrorProbe,
	) -> Result<Arc<Self>, SyncError> {
		config.validate()?;

		let registry = match &config.endpoints {
			Some(endpoints) => EndpointRegistry::new(endpoints.clone()),
			None => EndpointRegistry::builtin(),
		};
		let aliases = AliasTable::new(&config.aliases);
		if aliases.conflicts() > 0 {
			warn!("{} alias conflicts in configuration", aliases.conflicts());
		}
		let reconciler = DirectoryReconciler::new(
			config.target_roots(),
			config.source_repos(),
			aliases,
			config.copy_fan_out,
		)?;

		let store = ExclusionStore::new(config.ban_list_path());
		let policy = FilterPolicyEngine::open(store, config.filter.level(), config.filter.switches()).await?;
		let catalog = Arc::new(Self::loader(&config).load().await);

		let (jobs, rx) = mpsc::unbounded_channel();
		let engine = Arc::new(Engine {
			prober,
			config,
			registry,
			tool,
			reconciler,
			state: Mutex::new(PolicyState { catalog, policy }),
			busy: StdMutex::new(HashSet::new()),
			jobs,
		});
		tokio::spawn(reconcile_worker(Arc::downgrade(&engine), rx));
		Ok(engine)
	}

	fn loader(config: &Config) -> CatalogLoader {
		let roots = config
			.source_repos()
			.into_iter()
			.map(|r| ScanRoot { name: r.name, path: r.path })
			.collect();
		CatalogLoader::new(config.manifest_candidates(), roots)
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn registry(&self) -> &EndpointRegistry {
		&self.registry
	}

	fn is_repo_downloaded(&self, repo: &RepoConfig) -> bool {
		is_downloaded(&self.config.repo_path(repo))
	}

	fn repo_config(&self, name: &str) -> Result<&RepoConfig, SyncError> {
		self.config
			.repo(name)
			.ok_or_else(|| SyncError::InvalidConfig { message: format!("unknown repository '{}'", name) })
	}

	// ========================================================================
	// PROBING & SELECTION
	// ========================================================================

	/// Probe every registry endpoint
	pub async fn probe(&self) -> Vec<ProbeResult> {
		let probe = &self.config.probe;
		self.prober.probe_all(self.registry.endpoints(), &probe.base_url, &probe.resource).await
	}

	/// The canonical endpoint, when its probe beat the direct-first threshold
	pub fn direct_candidate(&self, results: &[ProbeResult]) -> Option<Endpoint> {
		let threshold = self.config.probe.direct_threshold();
		results
			.iter()
			.find(|r| {
				r.endpoint.is_canonical()
					&& r.status == ProbeStatus::Ok
					&& r.latency.map_or(false, |l| l <= threshold)
			})
			.map(|r| r.endpoint.clone())
	}

	/// Ordered sources for `repo`
	pub async fn ranked_sources(
		&self,
		repo: &RepoConfig,
		results: &[ProbeResult],
		cwd: &Path,
	) -> Vec<Endpoint> {
		let ranker = SourceRanker::new(self.config.probe.include_not_applicable);
		let ranked = if self.config.is_primary(repo) && self.config.probe.verify_primary {
			ranker
				.rank_verified(
					results,
					self.tool.as_ref(),
					&repo.url,
					cwd,
					self.config.probe.ls_remote_timeout(),
				)
				.await
		} else {
			ranker.rank(results)
		};
		endpoints_of(&ranked)
	}

	// ========================================================================
	// TRANSFER & UPDATE
	// ========================================================================

	/// Clone a repository that is not downloaded yet
	pub async fn download(
		&self,
		name: &str,
		sink: Option<&dyn ProgressSink>,
	) -> Result<TransferOutcome, SyncError> {
		let repo = self.repo_config(name)?;
		let _guard = BusyGuard::acquire(&self.busy, &repo.name)?;
		let results = self.probe().await;
		self.download_with(repo, &results, sink).await
	}

	async fn download_with(
		&self,
		repo: &RepoConfig,
		results: &[ProbeResult],
		sink: Option<&dyn ProgressSink>,
	) -> Result<TransferOutcome, SyncError> {
		let target = self.config.repo_path(repo);
		let cwd = target.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
		tokio::fs::create_dir_all(&cwd)
			.await
			.map_err(|e| SyncError::FilesystemIo { path: cwd.display().to_string(), source: e })?;

		let primary = self.config.is_primary(repo);
		let sink = if primary { sink } else { None };
		let status = |line: String| {
			if let Some(sink) = sink {
				sink.on_status(&line);
			}
		};

		let executor =
			FallbackTransferExecutor::new(self.tool.as_ref(), self.config.transfer.transfer_options());
		let request = TransferRequest {
			repo_name: repo.name.clone(),
			repo_url: repo.url.clone(),
			target: target.clone(),
		};

		let mut prior: Vec<FailedAttempt> = Vec::new();
		let direct = self.direct_candidate(results);
		if let Some(endpoint) = &direct {
			status(format!("{}: direct connection is fast, trying {} first", repo.name, endpoint.name));
			match executor.transfer(std::slice::from_ref(endpoint), &request, sink).await {
				Ok(outcome) => return Ok(outcome),
				Err(SyncError::TransferFatal { attempts, .. }) => prior = attempts,
				Err(e) => return Err(e),
			}
		}

		let ranked: Vec<Endpoint> = self
			.ranked_sources(repo, results, &cwd)
			.await
			.into_iter()
			.filter(|e| !(direct.is_some() && e.is_canonical()))
			.collect();
		let unreachable =
			!results.is_empty() && results.iter().all(|r| r.status == ProbeStatus::Timeout);
		if ranked.is_empty() && unreachable {
			let probed: Vec<&str> = results.iter().map(|r| r.endpoint.name.as_str()).collect();
			error!("{}: no endpoint answered the probe ({})", repo.name, probed.join(", "));
			return Err(SyncError::NetworkUnreachable {
				endpoint: probed.join(", "),
				message: "no endpoint answered the probe".to_string(),
			});
		}
		let names: Vec<&str> = ranked.iter().map(|e| e.name.as_str()).collect();
		status(format!("{}: source order {}", repo.name, names.join(" > ")));

		match executor.transfer(&ranked, &request, sink).await {
			Ok(mut outcome) => {
				prior.append(&mut outcome.failed);
				outcome.failed = prior;
				Ok(outcome)
			}
			Err(SyncError::TransferFatal { attempts, last_error }) => {
				let last_error = if attempts.is_empty() {
					prior.last().map(|a| a.reason.clone()).unwrap_or(last_error)
				} else {
					last_error
				};
				prior.extend(attempts);
				error!("{}: download failed after {} attempts", repo.name, prior.len());
				Err(SyncError::TransferFatal { attempts: prior, last_error })
			}
			Err(e) => Err(e),
		}
	}

	/// Incrementally update a downloaded repository
	pub async fn update(&self, name: &str) -> Result<UpdateOutcome, SyncError> {
		let repo = self.repo_config(name)?;
		let _guard = BusyGuard::acquire(&self.busy, &repo.name)?;
		self.update_inner(repo).await
	}

	async fn update_inner(&self, repo: &RepoConfig) -> Result<UpdateOutcome, SyncError> {
		let path = self.config.repo_path(repo);
		if !is_downloaded(&path) {
			return Err(SyncError::FilesystemIo {
				path: path.display().to_string(),
				source: io::Error::new(io::ErrorKind::NotFound, "repository is not downloaded"),
			});
		}
		let updater = RepoUpdater::new(self.tool.as_ref(), self.config.transfer.update_options());
		updater.update(&repo.name, &path, &repo.branch).await
	}

	/// Clone or update one repository, depending on whether it exists locally
	pub async fn sync_repo(
		&self,
		repo: &RepoConfig,
		results: &[ProbeResult],
		sink: Option<&dyn ProgressSink>,
	) -> Result<RepoSync, SyncError> {
		let _guard = BusyGuard::acquire(&self.busy, &repo.name)?;
		if self.is_repo_downloaded(repo) {
			self.update_inner(repo).await.map(RepoSync::Updated)
		} else {
			self.download_with(repo, results, sink).await.map(RepoSync::Cloned)
		}
	}

	/// Bring every repository up to date, then reload and reconcile on change
	///
	/// The primary repository goes first; the others run concurrently after it.
	/// Per-repository failures are reported, not propagated.
	pub async fn sync_all(
		&self,
		sink: Option<&dyn ProgressSink>,
	) -> Vec<(String, Result<RepoSync, SyncError>)> {
		let needs_probe = self.config.repos.iter().any(|r| !self.is_repo_downloaded(r));
		let results = if needs_probe { self.probe().await } else { Vec::new() };

		let mut report = Vec::with_capacity(self.config.repos.len());
		let primary = self.config.primary_repo().map(|r| r.name.clone());
		if let Some(repo) = self.config.primary_repo() {
			let result = self.sync_repo(repo, &results, sink).await;
			report.push((repo.name.clone(), result));
		}

		let results = &results;
		let rest: Vec<_> = self
			.config
			.repos
			.iter()
			.filter(|r| Some(&r.name) != primary.as_ref())
			.map(|repo| async move { (repo.name.clone(), self.sync_repo(repo, results, None).await) })
			.collect();
		let outcomes = join_all(rest).await;
		report.extend(outcomes);

		for (name, result) in &report {
			match result {
				Ok(sync) => info!("{}: {}", name, sync),
				Err(e) => error!("{}: {}", name, e),
			}
		}

		if report.iter().any(|(_, r)| r.as_ref().map_or(false, RepoSync::has_changes)) {
			self.reload_catalog().await;
			self.reconcile_now().await;
		}
		report
	}

	/// Current tip of a downloaded repository
	pub async fn tip(&self, repo: &RepoConfig) -> Option<String> {
		if !self.is_repo_downloaded(repo) {
			return None;
		}
		let updater = RepoUpdater::new(self.tool.as_ref(), self.config.transfer.update_options());
		updater.tip(&self.config.repo_path(repo)).await
	}

	// ========================================================================
	// CATALOG, POLICY & RECONCILIATION
	// ========================================================================

	/// Replace the catalog with a fresh load; returns the asset count
	pub async fn reload_catalog(&self) -> usize {
		let catalog = Arc::new(Self::loader(&self.config).load().await);
		let count = catalog.len();
		self.state.lock().await.catalog = catalog;
		count
	}

	pub async fn catalog(&self) -> Arc<Catalog> {
		self.state.lock().await.catalog.clone()
	}

	/// Run a reconciliation pass immediately
	pub async fn reconcile_now(&self) -> ReconcileStats {
		let state = self.state.lock().await;
		let active = state.policy.active_exclusions(&state.catalog);
		self.reconciler.reconcile(&state.catalog, &active).await
	}

	/// Queue a reconciliation pass on the background worker
	pub fn request_reconcile(&self, reason: &str) -> ReconcileTicket {
		let (done, rx) = oneshot::channel();
		let job = ReconcileJob { reason: reason.to_string(), done: Some(done) };
		if self.jobs.send(job).is_err() {
			warn!("Reconcile worker is gone, request '{}' dropped", reason);
		}
		ReconcileTicket { rx }
	}

	/// Exclude an asset (path or identifier); queues reconciliation when it changed
	pub async fn add_exclusion(
		&self,
		input: &str,
	) -> Result<(AddOutcome, Option<ReconcileTicket>), SyncError> {
		let mut state = self.state.lock().await;
		let path = resolve_input(&state.catalog, input)?;
		let outcome = state.policy.add_user_exclusion(&path).await?;
		drop(state);

		let ticket = match outcome {
			AddOutcome::Added => Some(self.request_reconcile(&format!("exclude {}", path))),
			AddOutcome::AlreadyPresent => None,
		};
		Ok((outcome, ticket))
	}

	/// Lift a user exclusion; queues reconciliation when it changed
	pub async fn remove_exclusion(
		&self,
		input: &str,
	) -> Result<(RemovalOutcome, Option<ReconcileTicket>), SyncError> {
		let mut state = self.state.lock().await;
		let path = match resolve_input(&state.catalog, input) {
			Ok(path) => path,
			// Stale entries for assets gone from the catalog may still be lifted
			Err(_) if state.policy.user_exclusions().contains(input.trim()) => input.trim().to_string(),
			Err(e) => return Err(e),
		};
		let state = &mut *state;
		let outcome = state.policy.remove_user_exclusion(&state.catalog, &path).await?;

		let ticket = match outcome {
			RemovalOutcome::NotInUserSet => None,
			_ => Some(self.request_reconcile(&format!("include {}", path))),
		};
		Ok((outcome, ticket))
	}

	/// Change the strictness level for this process
	pub async fn set_strictness(&self, level: StrictnessLevel) -> Option<ReconcileTicket> {
		let mut state = self.state.lock().await;
		if state.policy.level() == level {
			return None;
		}
		state.policy.set_level(level);
		drop(state);
		Some(self.request_reconcile(&format!("strictness {}", level)))
	}

	/// Change the content switches for this process
	pub async fn set_switches(&self, switches: ContentSwitches) -> Option<ReconcileTicket> {
		let mut state = self.state.lock().await;
		if state.policy.switches() == switches {
			return None;
		}
		state.policy.set_switches(switches);
		drop(state);
		Some(self.request_reconcile("content switches"))
	}

	/// The active exclusion set
	pub async fn active_exclusions(&self) -> Vec<String> {
		let state = self.state.lock().await;
		state.policy.active_exclusions(&state.catalog).into_iter().collect()
	}

	pub async fn exclusions(&self) -> ExclusionListing {
		let state = self.state.lock().await;
		let derived = state.policy.derived_exclusions(&state.catalog);
		ExclusionListing {
			user: state.policy.user_exclusions().iter().cloned().collect(),
			derived: derived.into_iter().collect(),
		}
	}

	pub async fn status(&self) -> StatusReport {
		let tips: Vec<_> = self.config.repos.iter().map(|r| self.tip(r)).collect();
		let tips = join_all(tips).await;
		let busy: HashSet<String> = self.busy.lock().unwrap_or_else(|e| e.into_inner()).clone();

		let repos = self
			.config
			.repos
			.iter()
			.zip(tips)
			.map(|(repo, tip)| {
				let path = self.config.repo_path(repo);
				RepoStatus {
					name: repo.name.clone(),
					downloaded: is_downloaded(&path),
					path,
					primary: self.config.is_primary(repo),
					tip,
					busy: busy.contains(&repo.name),
				}
			})
			.collect();

		let state = self.state.lock().await;
		let derived = state.policy.derived_exclusions(&state.catalog);
		let active = state.policy.active_exclusions(&state.catalog);
		StatusReport {
			repos,
			catalog_assets: state.catalog.len(),
			catalog_origin: state.catalog.origin().clone(),
			level: state.policy.level(),
			switches: state.policy.switches(),
			user_exclusions: state.policy.user_exclusions().len(),
			derived_exclusions: derived.len(),
			active_exclusions: active.len(),
		}
	}
}

fn resolve_input(catalog: &Catalog, input: &str) -> Result<String, SyncError> {
	catalog
		.resolve(input)
		.map(|a| a.relative_path.clone())
		.ok_or_else(|| SyncError::Other { message: format!("no asset matches '{}'", input.trim()) })
}

/// Drains queued requests; one pass answers every request queued before it started
async fn reconcile_worker(engine: Weak<Engine>, mut rx: mpsc::UnboundedReceiver<ReconcileJob>) {
	while let Some(job) = rx.recv().await {
		let mut reasons = vec![job.reason];
		let mut waiters: Vec<oneshot::Sender<ReconcileStats>> = job.done.into_iter().collect();
		while let Ok(more) = rx.try_recv() {
			reasons.push(more.reason);
			waiters.extend(more.done);
		}

		let engine = match engine.upgrade() {
			Some(engine) => engine,
			None => break,
		};
		debug!("Reconciling after: {}", reasons.join(", "));
		let stats = engine.reconcile_now().await;
		drop(engine);

		for waiter in waiters {
			let _ = waiter.send(stats);
		}
	}
	debug!("Reconcile worker stopped");
}

// vim: ts=4
