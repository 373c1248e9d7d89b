//! `mtc` command-line front end
//!
//! Runs clone plans against a SQLite database and exposes the value rewriter
//! and asset copier on their own.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mtc_core::assets::ensure_writable_dir;
use mtc_core::prelude::*;
use mtc_core::AssetManifest;
use mtc_serial::{decode_with, ClassResolver, ValueRewriter};
use mtc_sqlite::SqliteExecutor;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let db = Arg::new("db")
        .long("db")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("SQLite database holding the tenant tables");
    let config = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Engine configuration (TOML)");
    let value = Arg::new("value").help("Stored value; read from stdin when omitted");

    Command::new("mtc")
        .version(mtc_core::VERSION)
        .about("Clone a tenant's tables and media into another tenant")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("clone")
                .about("Run a clone plan")
                .arg(db.clone())
                .arg(config.clone())
                .arg(
                    Arg::new("plan")
                        .long("plan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Clone plan (JSON or TOML)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the outcome summary as JSON"),
                ),
        )
        .subcommand(
            Command::new("drop-tenant")
                .about("Drop every table of a tenant")
                .arg(db)
                .arg(config.clone())
                .arg(
                    Arg::new("id")
                        .long("id")
                        .required(true)
                        .value_parser(value_parser!(u64))
                        .help("Tenant id"),
                )
                .arg(
                    Arg::new("prefix")
                        .long("prefix")
                        .required(true)
                        .help("Table prefix of the tenant"),
                ),
        )
        .subcommand(
            Command::new("rewrite-value")
                .about("Replace text inside one stored value")
                .arg(Arg::new("from").long("from").required(true).help("Text to find"))
                .arg(Arg::new("to").long("to").required(true).help("Replacement text"))
                .arg(value.clone()),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print the decoded tree of a serialized value as JSON")
                .arg(value),
        )
        .subcommand(
            Command::new("copy-assets")
                .about("Copy the manifest files of one upload tree into another")
                .arg(config)
                .arg(
                    Arg::new("source")
                        .long("source")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Source upload root"),
                )
                .arg(
                    Arg::new("dest")
                        .long("dest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Destination upload root"),
                )
                .arg(
                    Arg::new("manifest")
                        .long("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Asset manifest (JSON or TOML)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<CloneConfig> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => CloneConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CloneConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn open_db(args: &ArgMatches) -> Result<Arc<dyn SqlExecutor>> {
    let path = args.get_one::<PathBuf>("db").context("--db is required")?;
    let db = SqliteExecutor::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(db))
}

/// Positional value, or stdin without its final line break
fn read_value(args: &ArgMatches) -> Result<String> {
    if let Some(value) = args.get_one::<String>("value") {
        return Ok(value.clone());
    }
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).context("reading stdin")?;
    if input.ends_with('\n') {
        input.pop();
        if input.ends_with('\r') {
            input.pop();
        }
    }
    Ok(input)
}

fn read_manifest(path: &Path) -> Result<AssetManifest> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let manifest = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => toml::from_str(&text)?,
    };
    Ok(manifest)
}

async fn run_clone(args: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(args)?;
    let plan_path = args.get_one::<PathBuf>("plan").context("--plan is required")?;
    let plan = ClonePlan::from_path(plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;

    let orchestrator = CloneOrchestrator::new(open_db(args)?, config);
    let outcome = orchestrator.run(&plan).await?;
    let summary = outcome.summary();

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Clone {} into {}", summary.run, summary.dest_prefix);
        println!("  Tables cloned:   {}", summary.tables_cloned);
        println!("  Rows copied:     {}", summary.rows_copied);
        println!("  Rows rewritten:  {}", summary.rows_rewritten);
        println!("  Values skipped:  {}", summary.values_skipped);
        println!("  Assets copied:   {}", summary.assets_copied);
        for (key, reference) in &summary.registered {
            println!("  Registered {key}: {reference}");
        }
        for failure in summary
            .table_failures
            .iter()
            .chain(&summary.column_failures)
            .chain(&summary.asset_failures)
        {
            println!("  FAILED {failure}");
        }
    }

    Ok(if outcome.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_drop(args: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(args)?;
    let id = *args.get_one::<u64>("id").context("--id is required")?;
    let prefix = args.get_one::<String>("prefix").context("--prefix is required")?;
    let tenant = TenantContext::new(TenantId(id), prefix.as_str());

    let cloner = TableSetCloner::new(open_db(args)?, &config);
    let report = cloner.drop_tenant(&tenant).await?;
    for table in &report.dropped {
        println!("dropped {table}");
    }
    for failure in &report.failures {
        warn!(error = %failure, "Drop failed");
    }
    Ok(if report.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn run_rewrite_value(args: &ArgMatches) -> Result<ExitCode> {
    let from = args.get_one::<String>("from").context("--from is required")?;
    let to = args.get_one::<String>("to").context("--to is required")?;
    let raw = read_value(args)?;
    let rewritten = ValueRewriter::new().rewrite(&raw, from, to)?;
    println!("{rewritten}");
    Ok(ExitCode::SUCCESS)
}

fn run_inspect(args: &ArgMatches) -> Result<ExitCode> {
    let raw = read_value(args)?;
    let value = decode_with(raw.trim(), &ClassResolver::default())?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_copy_assets(args: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(args)?;
    let source = args.get_one::<PathBuf>("source").context("--source is required")?;
    let dest = args.get_one::<PathBuf>("dest").context("--dest is required")?;
    let manifest_path = args.get_one::<PathBuf>("manifest").context("--manifest is required")?;
    let manifest = read_manifest(manifest_path)?;
    if manifest.is_empty() {
        bail!("{} lists no assets", manifest_path.display());
    }

    let copier = SelectiveAssetCopier::new(&config.assets);
    ensure_writable_dir(dest, copier.dir_mode()).await?;
    let report = copier.copy(source, dest, &manifest).await?;

    for path in &report.copied {
        println!("{}", path.display());
    }
    info!(
        copied = report.copied.len(),
        ignored = report.ignored,
        directories = report.directories,
        "Assets copied"
    );
    for failure in &report.failures {
        warn!(error = %failure, "Asset copy failed");
    }
    Ok(if report.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("clone", args)) => run_clone(args).await,
        Some(("drop-tenant", args)) => run_drop(args).await,
        Some(("rewrite-value", args)) => run_rewrite_value(args),
        Some(("inspect", args)) => run_inspect(args),
        Some(("copy-assets", args)) => run_copy_assets(args).await,
        _ => unreachable!("subcommand is required"),
    }
}
