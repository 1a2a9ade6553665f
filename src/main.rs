//! GraphGate - governance gates for a graph knowledge base
//!
//! Keeps schema evolution additive, migrations ordered, templates frozen and
//! CI pipeline verdicts auditable:
//! - `lint-schema`: additive-only diff between two schema files
//! - `migrate` / `schema-health`: ordinal ledger, application and parity
//! - `verify-templates` / `gen-manifest`: template registry and manifest
//! - `trust-gate`: commit/hold verdicts from CI evidence bundles
//! - `serve`: the same checks behind a read-only HTTP API

mod config;
mod error;
mod migration;
mod routes;
mod schema;
mod state;
mod templates;
mod trust;

use crate::config::{parse_capabilities, Settings};
use crate::migration::{
    check_health, ensure_database, recreate_database, ApplyOutcome, LedgerOptions,
    MemoryChannel, MigrationLedger, MigrationPlan, SchemaChannel,
};
use crate::routes::create_router;
use crate::schema::{AdditiveLinter, CapabilitySnapshot, RedeclarationPlan};
use crate::state::AppState;
use crate::templates::{
    check_recorded_hashes, load_catalog, save_governance_state, verify_catalog_parallel, Manifest,
    ManifestMeta, TemplateStatus,
};
use crate::trust::{
    append_step_summary, build_diff, build_step_lines, build_summary, build_summary_lines,
    write_sorted_json, RunContext, TrustGateSummary,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "graphgate")]
#[command(about = "Governance gates for schema, migrations, templates and CI trust verdicts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reject non-additive schema changes
    LintSchema(LintArgs),

    /// Apply pending migrations in ordinal order
    Migrate(MigrateArgs),

    /// Compare repository and database schema ordinals
    SchemaHealth(HealthArgs),

    /// Verify the template catalog against the manifest
    VerifyTemplates(VerifyArgs),

    /// Write the manifest for the current template catalog
    GenManifest(GenManifestArgs),

    /// Inspect the catalog and record governance decisions
    Template {
        #[arg(long, env = "TEMPLATE_CATALOG_DIR")]
        catalog: Option<PathBuf>,

        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Trust gate verdicts over CI evidence bundles
    TrustGate {
        #[command(subcommand)]
        command: TrustCommands,
    },

    /// Serve the read-only governance API
    Serve,
}

#[derive(Args)]
struct LintArgs {
    /// Baseline schema file (omit for an empty baseline)
    #[arg(long)]
    old: Option<PathBuf>,

    /// Proposed schema file
    #[arg(long)]
    new: PathBuf,

    /// Also list capabilities a subtype redeclares from its supertypes
    #[arg(long)]
    plan_redeclarations: bool,
}

#[derive(Args)]
struct MigrateArgs {
    #[arg(long, env = "MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    #[arg(long, env = "GRAPH_DATABASE")]
    database: Option<String>,

    /// Apply migrations up to this ordinal
    #[arg(long)]
    target: Option<u32>,

    /// Print planned actions without executing
    #[arg(long)]
    dry_run: bool,

    /// Delete and recreate the database before applying
    #[arg(long)]
    recreate: bool,

    /// Ordinal already applied to the database
    #[arg(long, default_value_t = 0)]
    db_ordinal: u32,

    #[arg(long, env = "GITHUB_SHA", default_value = "unknown")]
    git_commit: String,
}

#[derive(Args)]
struct HealthArgs {
    #[arg(long, env = "MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    #[arg(long, env = "GRAPH_DATABASE")]
    database: Option<String>,

    /// Ordinal reported by the database
    #[arg(long, default_value_t = 0)]
    db_ordinal: u32,
}

#[derive(Args)]
struct VerifyArgs {
    #[arg(long, env = "TEMPLATE_MANIFEST")]
    manifest: Option<PathBuf>,

    #[arg(long, env = "TEMPLATE_CATALOG_DIR")]
    catalog: Option<PathBuf>,

    /// Comma-separated capability names; replaces the configured set
    #[arg(long)]
    forbid: Option<String>,

    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct GenManifestArgs {
    #[arg(long, env = "TEMPLATE_CATALOG_DIR")]
    catalog: Option<PathBuf>,

    #[arg(long, env = "TEMPLATE_MANIFEST")]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// List qualified ids, optionally by status
    List {
        #[arg(long)]
        status: Option<TemplateStatus>,
    },

    /// Highest active version of a template
    Latest { template_id: String },

    /// Freeze a version on its first evidence
    Freeze {
        qualified_id: String,

        #[arg(long)]
        evidence_id: String,

        #[arg(long)]
        claim_id: Option<String>,

        #[arg(long)]
        scope_lock_id: Option<String>,
    },

    /// Mark a version as producing untrustworthy evidence
    Taint {
        qualified_id: String,

        #[arg(long)]
        reason: String,

        #[arg(long)]
        superseded_by: Option<String>,
    },

    /// Stop new use of a version
    Deprecate { qualified_id: String },
}

#[derive(Subcommand)]
enum TrustCommands {
    /// Summarize the commit and hold gates of one bundle
    Summary {
        #[arg(long, env = "TRUST_BUNDLE_DIR")]
        in_dir: Option<PathBuf>,

        #[arg(long)]
        out: PathBuf,
    },

    /// Compare two summary files
    Diff {
        #[arg(long)]
        base: PathBuf,

        #[arg(long)]
        head: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },
}

fn exit_status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::LintSchema(args) => lint_schema(&settings, args),
        Commands::Migrate(args) => migrate(&settings, args).await,
        Commands::SchemaHealth(args) => schema_health(&settings, args).await,
        Commands::VerifyTemplates(args) => verify_templates(&settings, args).await,
        Commands::GenManifest(args) => gen_manifest(&settings, args),
        Commands::Template { catalog, command } => {
            let catalog = catalog.unwrap_or_else(|| settings.templates.catalog_dir.clone());
            template(&catalog, command)
        }
        Commands::TrustGate { command } => trust_gate(&settings, command),
        Commands::Serve => serve(settings).await,
    }
}

fn read_schema(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read schema {}", path.display()))
}

fn lint_schema(settings: &Settings, args: LintArgs) -> anyhow::Result<ExitCode> {
    let old_text = match &args.old {
        Some(path) => read_schema(path)?,
        None => String::new(),
    };
    let new_text = read_schema(&args.new)?;

    let overrides = &settings.overrides;
    if overrides.requested() && !overrides.allowed() {
        warn!("ALLOW_DESTRUCTIVE_SCHEMA is set but GOVERNANCE_ENV is not dev; override ignored");
    }

    let report = AdditiveLinter::lint_texts(&old_text, &new_text, overrides.allowed())
        .context("Baseline schema could not be parsed")?;

    if report.is_clean() {
        println!("[lint-schema] PASS: No destructive schema changes detected.");
    } else {
        println!("[lint-schema] FAIL: Destructive schema changes detected:");
        for violation in &report.violations {
            println!("  - {}", violation);
        }
    }
    if report.bypassed {
        println!(
            "\n[lint-schema] WARNING: Override active (ALLOW_DESTRUCTIVE_SCHEMA=true and GOVERNANCE_ENV=dev). Allowing changes."
        );
    }

    if args.plan_redeclarations {
        match CapabilitySnapshot::extract(&new_text) {
            Ok(snapshot) => {
                let plan = RedeclarationPlan::build(&snapshot);
                println!("\n[lint-schema] Redeclarations ({}):", plan.owns.len() + plan.plays.len());
                for (subtype, attr) in &plan.owns {
                    println!("  - {} owns {}", subtype, attr);
                }
                for (subtype, role) in &plan.plays {
                    println!("  - {} plays {}", subtype, role);
                }
            }
            Err(e) => warn!("No redeclaration plan: {}", e),
        }
    }

    match report.ensure_additive() {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("[lint-schema] {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn migrate(settings: &Settings, args: MigrateArgs) -> anyhow::Result<ExitCode> {
    let dir = args.migrations_dir.unwrap_or_else(|| settings.migrations.dir.clone());
    let database = args.database.unwrap_or_else(|| settings.migrations.database.clone());

    let ledger = match MigrationLedger::discover(
        &dir,
        LedgerOptions {
            allow_gaps: settings.migrations.allow_gaps,
        },
    ) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("[migrate] {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    if ledger.is_empty() {
        println!("[migrate] No migrations found in {}", dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    let channel = MemoryChannel::new();
    channel.seed(&database, args.db_ordinal).await;
    if args.recreate {
        info!("[migrate] Recreating database {}", database);
        recreate_database(&channel, &database).await?;
    } else {
        ensure_database(&channel, &database).await?;
    }

    let current = channel.current_ordinal(&database).await?;
    println!("[migrate] Current DB ordinal: {}", current);
    let plan = MigrationPlan::build(&ledger, current, args.target);

    match plan.execute(&channel, &database, args.dry_run, &args.git_commit).await {
        Ok(outcomes) => {
            for outcome in &outcomes {
                match outcome {
                    ApplyOutcome::Planned {
                        ordinal,
                        filename,
                        sha256_prefix,
                    } => println!("[migrate] DRY RUN: would apply {} {} (sha {})", ordinal, filename, sha256_prefix),
                    ApplyOutcome::Applied(applied) => println!(
                        "[migrate] Applied {} {} (sha {})",
                        applied.ordinal, applied.filename, applied.sha256_prefix
                    ),
                }
            }
            if let Some(last) = channel.versions(&database).await.last() {
                println!(
                    "[migrate] Schema version {} recorded (commit {})",
                    last.ordinal, last.git_commit
                );
            }
            if let Some(snapshot) = channel.snapshot(&database).await {
                println!("[migrate] Schema declares {} types", snapshot.types().len());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("[migrate] {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn schema_health(settings: &Settings, args: HealthArgs) -> anyhow::Result<ExitCode> {
    let dir = args.migrations_dir.unwrap_or_else(|| settings.migrations.dir.clone());
    let database = args.database.unwrap_or_else(|| settings.migrations.database.clone());

    let channel = MemoryChannel::new();
    channel.seed(&database, args.db_ordinal).await;

    match check_health(&dir, &channel, &database).await {
        Ok(health) => {
            println!("[schema-health] {}", health.summary_line());
            Ok(exit_status(health.in_sync()))
        }
        Err(e) => {
            error!("[schema-health] {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn verify_templates(settings: &Settings, args: VerifyArgs) -> anyhow::Result<ExitCode> {
    let manifest_path = args.manifest.unwrap_or_else(|| settings.templates.manifest_path.clone());
    let catalog_dir = args.catalog.unwrap_or_else(|| settings.templates.catalog_dir.clone());
    let forbidden = match &args.forbid {
        Some(raw) => parse_capabilities(raw)?,
        None => settings.templates.forbidden_capabilities.clone(),
    };

    let manifest = match Manifest::load(&manifest_path)? {
        Some(manifest) => manifest,
        None => {
            println!("Note: No manifest found at {}", manifest_path.display());
            println!("      Run: graphgate gen-manifest");
            Manifest::default()
        }
    };
    let registry = match load_catalog(&catalog_dir) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Template catalog failed to load: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("Running template verification checks...");
    let report =
        verify_catalog_parallel(Arc::new(manifest), Arc::new(registry), Arc::new(forbidden)).await?;
    for line in report.render(args.strict) {
        println!("{}", line);
    }
    Ok(exit_status(report.success(args.strict)))
}

fn gen_manifest(settings: &Settings, args: GenManifestArgs) -> anyhow::Result<ExitCode> {
    let catalog_dir = args.catalog.unwrap_or_else(|| settings.templates.catalog_dir.clone());
    let output = args.output.unwrap_or_else(|| settings.templates.manifest_path.clone());

    let registry = load_catalog(&catalog_dir)
        .with_context(|| format!("Failed to load catalog {}", catalog_dir.display()))?;
    let mut manifest = registry.to_manifest();
    manifest.meta = Some(ManifestMeta::now());
    manifest.write(&output)?;

    println!("Generated manifest with {} templates", manifest.len());
    println!("Written to: {}", output.display());
    for (qid, entry) in &manifest.entries {
        let frozen = if entry.frozen { " [FROZEN]" } else { "" };
        println!("  - {}{}", qid, frozen);
    }
    Ok(ExitCode::SUCCESS)
}

fn template(catalog_dir: &Path, command: TemplateCommands) -> anyhow::Result<ExitCode> {
    let mut registry = load_catalog(catalog_dir)
        .with_context(|| format!("Failed to load catalog {}", catalog_dir.display()))?;

    let metadata = match command {
        TemplateCommands::List { status } => {
            let ids = match status {
                Some(status) => registry.list_by_status(status),
                None => registry.list_all(),
            };
            for qid in ids {
                println!("{}", qid);
            }
            return Ok(ExitCode::SUCCESS);
        }
        TemplateCommands::Latest { template_id } => {
            return match registry.latest(&template_id) {
                Some(template) => {
                    println!("{}", template.spec.qualified_id());
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    error!("No active version of {}", template_id);
                    Ok(ExitCode::FAILURE)
                }
            };
        }
        TemplateCommands::Freeze {
            qualified_id,
            evidence_id,
            claim_id,
            scope_lock_id,
        } => {
            if let Err(err) = check_recorded_hashes(&registry, catalog_dir, &qualified_id) {
                error!("Refusing to freeze {}: {}", qualified_id, err);
                return Ok(ExitCode::FAILURE);
            }
            registry.freeze(&qualified_id, &evidence_id, claim_id, scope_lock_id)?
        }
        TemplateCommands::Taint {
            qualified_id,
            reason,
            superseded_by,
        } => registry.taint(&qualified_id, &reason, superseded_by)?,
        TemplateCommands::Deprecate { qualified_id } => registry.deprecate(&qualified_id)?,
    };

    let qid = metadata.qualified_id();
    save_governance_state(catalog_dir, &metadata)?;
    println!(
        "{}: status={} frozen={} tainted={}",
        qid, metadata.status, metadata.frozen, metadata.tainted
    );
    Ok(ExitCode::SUCCESS)
}

fn trust_gate(settings: &Settings, command: TrustCommands) -> anyhow::Result<ExitCode> {
    match command {
        TrustCommands::Summary { in_dir, out } => {
            let root = in_dir.unwrap_or_else(|| settings.trust.bundle_dir.clone());
            let summary = build_summary(&root, RunContext::from_env())?;
            write_sorted_json(&out, &summary)?;

            let lines = build_summary_lines(&summary);
            append_step_summary(&lines)?;
            for line in &lines {
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
        TrustCommands::Diff { base, head, out } => {
            let base = read_summary(&base)?;
            let head = read_summary(&head)?;
            let diff = build_diff(&base, &head);
            write_sorted_json(&out, &diff)?;

            let lines = build_step_lines(&diff);
            append_step_summary(&lines)?;
            for line in &lines {
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_summary(path: &Path) -> anyhow::Result<TrustGateSummary> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read summary {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid summary {}", path.display()))
}

async fn serve(settings: Settings) -> anyhow::Result<ExitCode> {
    info!("Starting GraphGate governance API...");

    let state = Arc::new(AppState::new(settings.clone()).await?);
    let app = create_router(state, &settings);
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Server listening on http://{}", addr);
    info!("   GET  /health");
    info!("   POST /api/schema/lint");
    info!("   GET  /api/migrations");
    info!("   GET  /api/templates/verify");
    info!("   GET  /api/trust-gate/summary");
    info!("   POST /api/trust-gate/diff");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,graphgate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
