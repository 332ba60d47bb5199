use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use kdex::analysis::{concordance, report, staleness, usage};
use kdex::backlink::{self, Backlink, ResolutionKind, Resolved};
use kdex::error::IndexError;
use kdex::index::{build, stats, IndexReader, SectionKey, TypeFilter};
use kdex::output;
use kdex::query::{SearchEngine, SearchHit, SearchOptions};
use kdex::utils::{find_store_root, get_events_path, AppConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kdex")]
#[command(about = "Retrieval, concordance and decay analysis for a markdown knowledge store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log more (-v info, -vv debug); KDEX_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from scratch
    Index {
        /// Store root
        root: PathBuf,

        /// Delete the index file before rebuilding
        #[arg(short, long)]
        force: bool,
    },
    /// Reindex only changed, added and removed entries
    IncrementalIndex {
        /// Store root
        root: PathBuf,

        /// Repository root for commit-history queries (remembered)
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// Ranked search over sections
    Search {
        /// Store root
        root: PathBuf,

        /// Query text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Restrict to one source type (knowledge, work, thread, all)
        #[arg(short = 't', long = "type", default_value = "all")]
        type_filter: TypeFilter,

        /// Emit JSON
        #[arg(long)]
        json: bool,

        /// Append a retrieval event per returned hit
        #[arg(long)]
        record: bool,
    },
    /// Resolve a [[type:path#heading]] backlink
    Resolve {
        /// Store root
        root: PathBuf,

        /// Backlink, with or without brackets
        backlink: String,

        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats {
        /// Store root
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Batch analyses; each writes a report under .kdex/reports
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Start directory; the store root is found by walking up
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: AnalyzeCommand,
}

#[derive(Subcommand)]
enum AnalyzeCommand {
    /// Score entries for drift against commit history and broken links
    Staleness {
        /// Repository root for commit-history queries
        #[arg(long)]
        repo_root: Option<PathBuf>,

        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// Tier sections by decayed retrieval frequency
    Usage {
        /// Event log (defaults to .kdex/events.jsonl)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Emit JSON
        #[arg(long)]
        json: bool,

        /// Write usage.json
        #[arg(long)]
        write: bool,
    },
    /// Recompute the similarity table
    Concordance {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
    /// List near-duplicate section pairs
    MergeCandidates {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("KDEX_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let contention = err
                .downcast_ref::<IndexError>()
                .is_some_and(IndexError::is_contention);
            if contention {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let color = !cli.no_color;

    match cli.command {
        Commands::Index { root, force } => {
            let root = build::resolve_root(&root)?;
            let config = AppConfig::load(&root)?;
            let summary = build::build_index(&root, &config.index, force, false)?;
            output::print_scan_summary(&summary);
        }
        Commands::IncrementalIndex { root, repo_root } => {
            let root = build::resolve_root(&root)?;
            let config = AppConfig::load(&root)?;
            let summary = build::incremental_scan(&root, &config.index)?;
            if let Some(repo_root) = repo_root {
                build::record_repo_root(&root, &config.index, &repo_root)?;
            }
            output::print_scan_summary(&summary);
        }
        Commands::Search {
            root,
            query,
            limit,
            type_filter,
            json,
            record,
        } => {
            let root = build::resolve_root(&root)?;
            let config = AppConfig::load(&root)?;
            let reader = IndexReader::open_or_build(&root, &config)?;
            let options = SearchOptions {
                limit: limit.unwrap_or(config.search.default_limit),
                type_filter,
            };
            let hits = SearchEngine::new(&reader, config.search.clone()).search(&query.join(" "), &options)?;

            if record {
                record_hits(&root, &hits)?;
            }
            if json {
                output::print_json(&hits)?;
            } else {
                output::print_search_hits(&hits, color)?;
            }
        }
        Commands::Resolve { root, backlink, json } => {
            let root = build::resolve_root(&root)?;
            let config = AppConfig::load(&root)?;
            let link = Backlink::parse(&backlink)?;
            let reader = IndexReader::open_or_build(&root, &config)?;
            let resolved = backlink::resolve(&reader, &link)?;

            if json {
                output::print_json(&resolved)?;
            } else {
                // Neighbors are only shown while the stored table matches the index
                let current = reader.similarity_current()?;
                let similar = match &resolved {
                    Resolved::Found(r) if current && r.kind == ResolutionKind::Exact => {
                        let key = SectionKey::new(r.path.clone(), link.heading.clone().unwrap_or_default());
                        concordance::neighbors_of_key(&reader, &key)?
                    }
                    _ => Vec::new(),
                };
                output::print_resolution(&resolved, &similar, color)?;
            }
        }
        Commands::Stats { root } => {
            let root = build::resolve_root(&root)?;
            let config = AppConfig::load(&root)?;
            stats::show_stats(&root, &config)?;
        }
        Commands::Analyze(args) => {
            let root = find_store_root(&args.root)?;
            let config = AppConfig::load(&root)?;
            run_analysis(&root, &config, args.command, color)?;
        }
    }

    Ok(())
}

fn run_analysis(root: &Path, config: &AppConfig, command: AnalyzeCommand, color: bool) -> Result<()> {
    match command {
        AnalyzeCommand::Staleness { repo_root, json } => {
            let report = staleness::run_staleness(root, config, repo_root.as_deref())?;
            report::write_report(root, report::STALENESS_REPORT, &report)?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_staleness(&report, color)?;
            }
        }
        AnalyzeCommand::Usage { log, json, write } => {
            let log_path = log.unwrap_or_else(|| get_events_path(root));
            let events = usage::read_events(&log_path)?;
            let reader = IndexReader::open_or_build(root, config)?;
            let report = usage::analyze_usage(&reader, &events, &config.usage, Utc::now())?;
            if write {
                report::write_report(root, report::USAGE_REPORT, &report)?;
            }
            if json {
                output::print_json(&report)?;
            } else {
                output::print_usage(&report, color)?;
            }
        }
        AnalyzeCommand::Concordance { json } => {
            let outcome = concordance::run_concordance(root, config)?;
            outcome.write_reports(root, &config.concordance)?;
            if json {
                let (see_also, merge) = outcome.reports(&config.concordance);
                output::print_json(&serde_json::json!({
                    "see_also": see_also,
                    "merge_candidates": merge,
                }))?;
            } else {
                println!("{} similarity edges stored (generation {})", outcome.edges, outcome.generation);
                output::print_pairs("See also", &outcome.see_also, color)?;
                output::print_pairs("Merge candidates", &outcome.merge, color)?;
            }
        }
        AnalyzeCommand::MergeCandidates { json } => {
            let outcome = concordance::current_bands(root, config)?;
            outcome.write_reports(root, &config.concordance)?;
            if json {
                let (_, merge) = outcome.reports(&config.concordance);
                output::print_json(&merge)?;
            } else {
                output::print_pairs("Merge candidates", &outcome.merge, color)?;
            }
        }
    }
    Ok(())
}

/// Log one retrieval event per hit; session and branch come from the
/// environment of the calling agent
fn record_hits(root: &Path, hits: &[SearchHit]) -> Result<()> {
    let now = Utc::now();
    let session = std::env::var("KDEX_SESSION").ok().filter(|s| !s.is_empty());
    let branch = std::env::var("KDEX_BRANCH").ok().filter(|s| !s.is_empty());

    let events: Vec<usage::RetrievalEvent> = hits
        .iter()
        .map(|hit| usage::RetrievalEvent {
            ts: now,
            path: hit.path.clone(),
            heading: (!hit.heading.is_empty()).then(|| hit.heading.clone()),
            session: session.clone(),
            branch: branch.clone(),
        })
        .collect();
    usage::append_events(&get_events_path(root), &events).context("Failed to record retrieval events")
}
