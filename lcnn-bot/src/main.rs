//! lcnn-bot - LCCN ↔ Wikidata reconciliation bot
//!
//! Subcommands:
//! - `run`: walk the change feed and reconcile fresh records
//! - `prune`: drop ledger entries past the retention window
//! - `check-duplicates`: report LCCNs held by more than one item

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lcnn_common::config::{
    config_file_path, get_user_agent, load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lcnn_bot::config::{resolve_genai_api_key, resolve_wikibase_credentials};
use lcnn_bot::db::{init_database_pool, Ledger};
use lcnn_bot::services::{AiMatcher, DryRunApplier, GeminiClient, LocClient, SparqlClient, WikibaseClient};
use lcnn_bot::types::MutationApplier;
use lcnn_bot::utils::RetryPolicy;
use lcnn_bot::workflow::{Collaborators, Reconciler, ReconcilerSettings, RecordOutcome, RunReporter};

const MODULE_NAME: &str = "lcnn-bot";

/// Command-line arguments for lcnn-bot
#[derive(Parser, Debug)]
#[command(name = "lcnn-bot")]
#[command(about = "Reconcile LC name authority records with Wikidata")]
#[command(version)]
struct Cli {
    /// Folder holding the ledger database and reports
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config dir>/lcnn/lcnn-bot.toml)
    #[arg(long, global = true, env = "LCNN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the change feed and reconcile fresh records
    Run(RunArgs),
    /// Remove ledger entries older than the retention window
    Prune,
    /// Report LCCNs carried by more than one item
    CheckDuplicates {
        #[arg(required = true)]
        lccns: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of feed pages to walk
    #[arg(long, env = "LCNN_PAGES")]
    pages: Option<u32>,

    /// Concurrent records per page
    #[arg(long, env = "LCNN_WORKERS")]
    workers: Option<usize>,

    /// Decide and report without writing to Wikidata
    #[arg(long)]
    dry_run: bool,

    /// Report file (default: <root>/reports/<date>.xml)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not consult the language model
    #[arg(long)]
    no_ai: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(|| config_file_path(MODULE_NAME));
    let config = match &config_path {
        Some(path) => load_toml_config(path).context("Failed to load configuration")?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting lcnn-bot {}", lcnn_bot::build_info());

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_toml(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root().display());

    let ledger_path = initializer.ledger_path();
    let pool = init_database_pool(&ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;
    let ledger = Ledger::new(pool);
    let retention = chrono::Duration::days(config.pipeline.retention_days);

    match cli.command {
        Command::Prune => {
            ledger.prune(chrono::Utc::now(), retention).await?;
        }
        Command::CheckDuplicates { lccns } => {
            let mut settings = ReconcilerSettings::from_config(&config);
            settings.consistency_delay = Duration::ZERO;
            let reconciler = build_reconciler(&config, &initializer, ledger, settings, true, false)?;

            let flagged = reconciler.check_for_duplicate_claims(&lccns).await;
            let mut reporter = RunReporter::new();
            for (lccn, decision) in flagged {
                reporter.record(RecordOutcome::new(&lccn, decision));
            }
            reporter.log_summary();
        }
        Command::Run(args) => {
            let mut settings = ReconcilerSettings::from_config(&config);
            if let Some(pages) = args.pages {
                settings.max_pages = pages;
            }
            if let Some(workers) = args.workers {
                settings.workers = workers.max(1);
            }
            let use_ai = config.ai.enabled && !args.no_ai;
            settings.auto_eval = use_ai;
            settings.mark_seen = !args.dry_run;

            info!(
                pages = settings.max_pages,
                workers = settings.workers,
                dry_run = args.dry_run,
                ai = use_ai,
                "Run settings"
            );

            let reconciler = build_reconciler(&config, &initializer, ledger, settings, args.dry_run, use_ai)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Received Ctrl+C, finishing in-flight records");
                    on_signal.cancel();
                }
            });

            let mut reporter = RunReporter::new();
            reconciler.run(&cancel, &mut reporter).await;
            reporter.log_summary();

            let today = chrono::Utc::now().date_naive();
            let report_path = args.report.unwrap_or_else(|| initializer.report_path(today));
            reporter.write_to(&report_path, today)?;

            reconciler.ledger().prune(chrono::Utc::now(), retention).await?;
        }
    }

    Ok(())
}

/// Wire the HTTP clients into a reconciler
fn build_reconciler(
    config: &TomlConfig,
    initializer: &RootFolderInitializer,
    ledger: Ledger,
    settings: ReconcilerSettings,
    dry_run: bool,
    use_ai: bool,
) -> Result<Reconciler> {
    let user_agent = get_user_agent();
    let retry = RetryPolicy::with_attempts(config.pipeline.transient_attempts);

    let credentials = match resolve_wikibase_credentials(config, initializer.root()) {
        Ok(credentials) => Some(credentials),
        Err(e) if dry_run => {
            info!("No Wikidata credentials ({}), continuing read-only", e);
            None
        }
        Err(e) => return Err(e).context("Wikidata credentials are required unless --dry-run is given"),
    };

    let loc = Arc::new(LocClient::new(
        &config.feed.base_url,
        config.feed.requests_per_second,
        &user_agent,
        retry,
    )?);
    let sparql = Arc::new(SparqlClient::new(
        &config.wikibase.sparql_url,
        &config.wikibase.identifier_property,
        &config.wikibase.cross_reference_property,
        &user_agent,
        retry,
    )?);
    let wikibase = Arc::new(WikibaseClient::new(
        &config.wikibase,
        credentials,
        sparql.clone(),
        &user_agent,
        retry,
    )?);

    let applier: Arc<dyn MutationApplier> = if dry_run {
        Arc::new(DryRunApplier::new())
    } else {
        wikibase.clone()
    };

    let matcher = if use_ai {
        let api_key = resolve_genai_api_key(config).context("Gemini API key is required unless --no-ai is given")?;
        let model = Arc::new(GeminiClient::new(&config.ai.base_url, &config.ai.model, api_key, &user_agent)?);
        Some(AiMatcher::new(model, wikibase.clone()))
    } else {
        None
    };

    let collaborators = Collaborators {
        feed: loc.clone(),
        fetcher: loc,
        resolver: sparql.clone(),
        snapshots: wikibase,
        applier,
        claim_index: sparql,
        matcher,
    };

    Ok(Reconciler::new(collaborators, ledger, settings))
}
