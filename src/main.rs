use clap::{Arg, ArgAction, ArgMatches, Command};
use gallery_sync::logging::init_tracing;
use gallery_sync::probe::ProbeStatus;
use gallery_sync::rank::SourceRanker;
use gallery_sync::{
	AddOutcome, CallbackBuilder, Config, Engine, GitCli, ProgressSink, RemovalOutcome,
	StrictnessLevel,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

///////////////////////
// Utility functions //
///////////////////////

fn console_sink() -> Box<dyn ProgressSink> {
	CallbackBuilder::new()
		.on_transfer_progress(|p| println!("{} ({}): {}%...", p.repo, p.endpoint, p.percent))
		.on_status(|line| println!("{}", line))
		.build()
}

fn repo_arg(matches: &ArgMatches) -> Result<&str, Box<dyn Error>> {
	Ok(matches.get_one::<String>("repo").ok_or("repository argument required")?.as_str())
}

fn asset_arg(matches: &ArgMatches) -> Result<&str, Box<dyn Error>> {
	Ok(matches.get_one::<String>("asset").ok_or("asset argument required")?.as_str())
}

async fn probe(engine: &Engine) {
	let results = engine.probe().await;
	for result in &results {
		println!("{:<12} {}", result.endpoint.name, result.label());
	}
	let ranker = SourceRanker::new(engine.config().probe.include_not_applicable);
	let ranked = ranker.rank(&results);
	let order: Vec<&str> = ranked.iter().map(|r| r.endpoint.name.as_str()).collect();
	println!("Order: {}", order.join(" > "));
	if let Some(direct) = engine.direct_candidate(&results) {
		println!("Direct connection via {} is fast enough to try first", direct.name);
	}
	if results.iter().all(|r| r.status != ProbeStatus::Ok) {
		println!("No endpoint answered the probe");
	}
}

async fn ban(engine: &Engine, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	match matches.subcommand() {
		Some(("add", sub)) => {
			let (outcome, ticket) = engine.add_exclusion(asset_arg(sub)?).await?;
			match outcome {
				AddOutcome::Added => println!("Excluded"),
				AddOutcome::AlreadyPresent => println!("Already excluded"),
			}
			if let Some(ticket) = ticket {
				let stats = ticket.wait().await?;
				println!("Removed {} file(s) from targets", stats.removed);
			}
		}
		Some(("remove", sub)) => {
			let (outcome, ticket) = engine.remove_exclusion(asset_arg(sub)?).await?;
			match outcome {
				RemovalOutcome::Visible => println!("Removed from ban list"),
				RemovalOutcome::StillHidden => {
					println!("Removed from ban list, but still hidden by the content policy")
				}
				RemovalOutcome::NotInUserSet => println!("Not in the ban list"),
			}
			if let Some(ticket) = ticket {
				let stats = ticket.wait().await?;
				println!("Copied {} file(s) to targets", stats.copied);
			}
		}
		_ => {
			let listing = engine.exclusions().await;
			println!("User exclusions ({}):", listing.user.len());
			for path in &listing.user {
				println!("  {}", path);
			}
			println!("Policy exclusions ({}):", listing.derived.len());
			for path in &listing.derived {
				println!("  {}", path);
			}
		}
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("gallery-sync")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Mirror-aware gallery repository synchronizer")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Configuration file"),
		)
		.subcommand(Command::new("probe").about("Probe mirrors and show the source order"))
		.subcommand(
			Command::new("download")
				.about("Download a repository")
				.arg(Arg::new("repo").required(true)),
		)
		.subcommand(
			Command::new("update")
				.about("Update a downloaded repository")
				.arg(Arg::new("repo").required(true)),
		)
		.subcommand(Command::new("sync").about("Download or update every repository, then reconcile"))
		.subcommand(
			Command::new("reconcile").about("Mirror allowed images into the targets").arg(
				Arg::new("strictness")
					.short('s')
					.long("strictness")
					.value_name("LEVEL")
					.value_parser(clap::value_parser!(i64))
					.help("Strictness level override (0, 1, 2)"),
			),
		)
		.subcommand(
			Command::new("ban")
				.about("Manage the ban list")
				.subcommand(
					Command::new("add").about("Exclude an image").arg(Arg::new("asset").required(true)),
				)
				.subcommand(
					Command::new("remove")
						.about("Lift an exclusion")
						.arg(Arg::new("asset").required(true)),
				)
				.subcommand(Command::new("list").about("List exclusions")),
		)
		.subcommand(
			Command::new("status")
				.about("Show repository and policy status")
				.arg(Arg::new("quiet").short('q').long("quiet").action(ArgAction::SetTrue)),
		)
		.get_matches();

	let log_level = init_tracing("info");
	let config_path =
		matches.get_one::<String>("config").map(PathBuf::from).unwrap_or_else(Config::default_path);
	let config = Config::load(&config_path).await?;
	if let Some(log_level) = &log_level {
		log_level.apply(&config.log_level);
	}

	let tool = Arc::new(GitCli::with_program(config.transfer.git_program.clone()));
	let engine = Engine::open(config, tool).await?;

	match matches.subcommand() {
		Some(("probe", _)) => probe(&engine).await,
		Some(("download", sub)) => {
			let sink = console_sink();
			let outcome = engine.download(repo_arg(sub)?, Some(sink.as_ref())).await?;
			println!("Downloaded via {}", outcome.endpoint);
			let stats = engine.reconcile_now().await;
			println!("{}", stats);
		}
		Some(("update", sub)) => {
			let outcome = engine.update(repo_arg(sub)?).await?;
			println!("{} ({})", outcome.state, if outcome.has_changes { "changed" } else { "unchanged" });
			if outcome.has_changes {
				engine.reload_catalog().await;
				println!("{}", engine.reconcile_now().await);
			}
		}
		Some(("sync", _)) => {
			let sink = console_sink();
			let mut failed = 0;
			for (repo, result) in engine.sync_all(Some(sink.as_ref())).await {
				match result {
					Ok(sync) => println!("{}: {}", repo, sync),
					Err(e) => {
						failed += 1;
						eprintln!("{}: {}", repo, e);
					}
				}
			}
			if failed > 0 {
				return Err(format!("{} repository(s) failed", failed).into());
			}
		}
		Some(("reconcile", sub)) => {
			if let Some(raw) = sub.get_one::<i64>("strictness") {
				let level = StrictnessLevel::from_raw(*raw)?;
				if let Some(ticket) = engine.set_strictness(level).await {
					println!("{}", ticket.wait().await?);
					return Ok(());
				}
			}
			println!("{}", engine.reconcile_now().await);
		}
		Some(("ban", sub)) => ban(&engine, sub).await?,
		Some(("status", sub)) => {
			let report = engine.status().await;
			if sub.get_flag("quiet") {
				println!("{} assets, {} excluded", report.catalog_assets, report.active_exclusions);
			} else {
				println!("{}", report);
			}
		}
		_ => {}
	}

	Ok(())
}

// vim: ts=4
