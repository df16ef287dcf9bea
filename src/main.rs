use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use company_enricher::apis::{ClientFactory, SourceSelection};
use company_enricher::config::{Credentials, EnrichConfig};
use company_enricher::constants::{DEFAULT_INPUT_FILE, PROGRESS_FILE};
use company_enricher::error::EnrichError;
use company_enricher::infra::decision_prompt::TerminalDecisions;
use company_enricher::infra::http_client::build_client;
use company_enricher::logging::init_logging;
use company_enricher::observability::metrics::install_recorder;
use company_enricher::pipeline::ingestion::rate_limiter::SourceLimiters;
use company_enricher::pipeline::processing::currency::CurrencyConverter;
use company_enricher::pipeline::processing::merge::Merger;
use company_enricher::pipeline::processing::validate::{ValidatedField, Validator};
use company_enricher::pipeline::storage::output::OutputStore;
use company_enricher::pipeline::storage::progress::ProgressStore;
use company_enricher::pipeline::{Orchestrator, RunSummary};
use company_enricher::types::SourceTag;
use company_enricher::{export, input};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "company_enricher")]
#[command(about = "Enrich a list of companies with firmographic data from LinkedIn, Diffbot and Perplexity")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Flags for the default `enrich` command
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, merge, validate and persist firmographics (default)
    Enrich(RunArgs),
    /// Write the spreadsheet-style CSV sheets from firmographics.json
    Export {
        /// firmographics.json to read (default: <output-dir>/firmographics.json)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Directory for the CSV sheets
        #[arg(long, default_value = "output/sheets")]
        output_dir: PathBuf,
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Query LinkedIn only
    #[arg(long, conflicts_with = "diffbot_only")]
    linkedin_only: bool,
    /// Query Diffbot only
    #[arg(long)]
    diffbot_only: bool,
    /// Ask Perplexity to confirm employee counts
    #[arg(long)]
    validate_employees: bool,
    /// Ask Perplexity to confirm headquarters locations
    #[arg(long)]
    validate_location: bool,
    /// Ask Perplexity to confirm revenue
    #[arg(long)]
    validate_revenue: bool,
    /// Ask on the terminal about suspected duplicates and validation corrections
    #[arg(long)]
    human_validation: bool,
    /// Skip companies already checkpointed as done
    #[arg(long)]
    resume: bool,
    #[arg(long)]
    verbose: bool,
    /// Target currency for revenue (ISO 4217)
    #[arg(long)]
    default_currency: Option<String>,
    /// Input CSV
    #[arg(long, default_value = DEFAULT_INPUT_FILE)]
    input: PathBuf,
    /// Output directory (overrides the config file)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write a Prometheus text snapshot of the run's metrics to this file
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl RunArgs {
    fn selection(&self) -> SourceSelection {
        if self.linkedin_only {
            SourceSelection::LinkedinOnly
        } else if self.diffbot_only {
            SourceSelection::DiffbotOnly
        } else {
            SourceSelection::Both
        }
    }

    fn requested_validations(&self) -> BTreeSet<ValidatedField> {
        let mut fields = BTreeSet::new();
        if self.validate_employees {
            fields.insert(ValidatedField::EmployeeCount);
        }
        if self.validate_location {
            fields.insert(ValidatedField::HeadquartersLocation);
        }
        if self.validate_revenue {
            fields.insert(ValidatedField::Revenue);
        }
        fields
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Export {
            input,
            output_dir,
            verbose,
        }) => {
            init_logging(verbose);
            let input = input.unwrap_or_else(|| {
                OutputStore::firmographics_path(&EnrichConfig::default().paths.output_dir)
            });
            match export::export(&input, &output_dir) {
                Ok(paths) => {
                    println!("\n📄 Exported {} sheets to {}", paths.len(), output_dir.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Export failed: {}", e);
                    eprintln!("❌ Export failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Some(Commands::Enrich(args)) => run_enrich(args).await,
        None => run_enrich(cli.run).await,
    }
}

async fn run_enrich(args: RunArgs) -> ExitCode {
    init_logging(args.verbose);

    let run_id = Uuid::new_v4();
    let span = info_span!("run", run_id = %run_id);
    match enrich(args).instrument(span).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.interrupted {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(run_id = %run_id, "Enrichment failed: {:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn enrich(args: RunArgs) -> anyhow::Result<RunSummary> {
    let mut config = EnrichConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(currency) = &args.default_currency {
        config.currency.target = currency.trim().to_uppercase();
        config.validate()?;
    }
    if let Some(dir) = &args.output_dir {
        config.paths.output_dir = dir.clone();
    }

    let metrics = args.metrics_file.as_deref().map(install_recorder).transpose()?;

    let credentials = Credentials::from_env();
    let selection = args.selection();
    let requested = args.requested_validations();
    if !requested.is_empty() {
        // fail before any call is made
        credentials.perplexity()?;
    }

    let companies = input::load_companies(&args.input)?;
    if companies.is_empty() {
        warn!("No companies in {}", args.input.display());
    }

    let limiters = SourceLimiters::from_config(&config.rate_limits);
    let factory = ClientFactory {
        http: build_client(config.timeout()).map_err(|e| EnrichError::Config(e.to_string()))?,
        config: &config,
        credentials: &credentials,
        limiters: &limiters,
    };

    let sources = selection.sources();
    let converter = CurrencyConverter::new(&config.currency);
    let merger = Merger::new(config.precedence_table(), converter.clone());

    let output_dir = &config.paths.output_dir;
    let progress = ProgressStore::open(output_dir.join(PROGRESS_FILE))?;
    let mut raw_sources = sources.clone();
    if credentials.perplexity_token.is_some() {
        raw_sources.push(SourceTag::Perplexity);
    }
    let output = OutputStore::open(output_dir, &raw_sources, args.resume)?;

    let mut orchestrator = Orchestrator::new(merger, progress, output);
    for source in &sources {
        orchestrator = orchestrator.with_source(factory.create_source(*source)?);
    }

    if credentials.perplexity_token.is_some() {
        let perplexity = factory.create_perplexity()?;
        orchestrator = orchestrator
            .with_news_source(perplexity.clone())
            .with_validator(Validator::new(
                perplexity,
                requested,
                config.validation.clone(),
                converter,
            ));
    } else {
        info!("PERPLEXITY_TOKEN not set, skipping news and validation");
    }

    if args.human_validation {
        orchestrator = orchestrator.with_decisions(Arc::new(TerminalDecisions));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️ Ctrl-C received, finishing the current company");
            flag.store(true, Ordering::SeqCst);
        }
    });
    orchestrator = orchestrator.with_cancel_flag(cancel);

    info!(
        sources = ?sources,
        resume = args.resume,
        output_dir = %output_dir.display(),
        "Starting enrichment"
    );
    let result = orchestrator.run(&companies, args.resume).await;
    if let Some(metrics) = &metrics {
        if let Err(e) = metrics.write() {
            warn!("Could not write metrics snapshot: {}", e);
        }
    }
    Ok(result?)
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Enrichment Results:");
    println!("   Total companies: {}", summary.total);
    println!("   Persisted: {}", summary.persisted);
    println!("   Failed: {}", summary.failed);
    println!("   Skipped (already done): {}", summary.skipped);
    if summary.dropped > 0 {
        println!("   Dropped as duplicates: {}", summary.dropped);
    }
    if summary.awaiting_decision > 0 {
        println!("   Awaiting decision: {}", summary.awaiting_decision);
    }
    if summary.interrupted {
        println!("\n⏹️  Run interrupted, rerun with --resume to continue");
    }
}
