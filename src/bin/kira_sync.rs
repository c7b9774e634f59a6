use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_uniprot_sync::app::App;
use kira_uniprot_sync::config::{ConfigLoader, ResolvedConfig};
use kira_uniprot_sync::error::KiraError;
use kira_uniprot_sync::feed::SwissProtFeed;
use kira_uniprot_sync::output::{JsonOutput, LogProgress};
use kira_uniprot_sync::resolver::HttpStatusResolver;
use kira_uniprot_sync::store::MemoryStore;

#[derive(Parser)]
#[command(name = "kira-sync")]
#[command(about = "Reconcile a UniProt SwissProt release against the curated knowledge store")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process the SwissProt feed, clean up obsolete instances and write reports")]
    Run(RunArgs),
    #[command(about = "Show identity index sizes for the current store")]
    Index(IndexArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    /// Keep every change in memory; the store snapshot is left untouched.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct IndexArgs {
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig | KiraError::ConfigRead(_) | KiraError::ConfigParse(_) => 2,
        KiraError::EnsemblHttp(_)
        | KiraError::EnsemblStatus { .. }
        | KiraError::UniprotHttp(_)
        | KiraError::ServiceUnavailable(_)
        | KiraError::RetriesExhausted { .. }
        | KiraError::StoreUnavailable(_)
        | KiraError::Snapshot(_)
        | KiraError::MissingReferenceDatabase(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_update(args),
        Commands::Index(args) => run_index(args),
    }
}

fn run_update(args: RunArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let mut store = MemoryStore::open(&config.store_snapshot)?;
    if args.dry_run {
        info!(snapshot = %config.store_snapshot, "dry run, snapshot will not be written");
        store = store.detached();
    }
    let resolver = build_resolver(&config)?;
    let skip_list = config.load_skip_list()?;
    let feed = SwissProtFeed::open(&config.update_directory)?;
    let now = chrono::Local::now().naive_local();

    let mut app = App::new(store, resolver);
    let summary = app.run(&config, feed, &skip_list, now, &LogProgress)?;
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

fn run_index(args: IndexArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let store = MemoryStore::open(&config.store_snapshot)?.detached();
    let app = App::new(store, build_resolver(&config)?);
    let result = app.index(&JsonOutput)?;
    JsonOutput::print_index(&result).into_diagnostic()?;
    Ok(())
}

fn build_resolver(config: &ResolvedConfig) -> Result<HttpStatusResolver, KiraError> {
    HttpStatusResolver::with_base_urls(
        config
            .ensembl_base_url
            .as_deref()
            .unwrap_or(HttpStatusResolver::ENSEMBL_LOOKUP_BASE),
        config
            .uniprot_base_url
            .as_deref()
            .unwrap_or(HttpStatusResolver::UNIPROT_BASE),
    )
}
