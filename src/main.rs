use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use metasweep::{
    config::{self, MetasweepConfig},
    db::DbPool,
    observability,
    retention::{self, MaxAgeOverride, RunCoordinator, RunResult},
};

/// CLI arguments for metasweep
#[derive(Parser, Debug)]
#[command(version, about = "Retention cleanup for workflow metadata databases", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./metasweep.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one cleanup pass over every registered table and exit
    ///
    /// Exits 0 when the run succeeded or only individual deletes failed,
    /// 1 when a table could not be processed and 2 when the run aborted.
    Run {
        /// Trigger payload, e.g. '{"maxDBEntryAgeInDays": 7}'
        #[arg(long, conflicts_with = "max_age_days")]
        conf: Option<String>,
        /// Maximum entry age in days for this run
        #[arg(long, allow_negative_numbers = true)]
        max_age_days: Option<i64>,
        /// Report what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
        /// Write the JSON run report to a file, or `-` for stdout
        #[arg(long)]
        report: Option<String>,
    },
    /// Run the scheduled retention worker until interrupted
    Serve,
    /// Print the tables that will be cleaned up
    Policies,
    /// Count total and expired entries per table without deleting anything
    Inspect {
        /// Maximum entry age in days (defaults to the configured value)
        #[arg(long, allow_negative_numbers = true)]
        max_age_days: Option<i64>,
    },
    /// Validate the configuration and check database connectivity
    Check,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./metasweep.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show enabled compile-time features
    Features,
}

const DEFAULT_CONFIG_FILE: &str = "metasweep.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Run {
            conf,
            max_age_days,
            dry_run,
            report,
        } => {
            let max_age = match (conf, max_age_days) {
                (Some(payload), _) => MaxAgeOverride::from_json_str(&payload),
                (None, Some(days)) => MaxAgeOverride::from_days(i128::from(days)),
                (None, None) => MaxAgeOverride::Absent,
            };
            run_once(args.config.as_deref(), max_age, dry_run, report).await;
        }
        Command::Serve => {
            run_serve(args.config.as_deref()).await;
        }
        Command::Policies => {
            run_policies(args.config.as_deref());
        }
        Command::Inspect { max_age_days } => {
            let max_age = max_age_days
                .map(|days| MaxAgeOverride::from_days(i128::from(days)))
                .unwrap_or(MaxAgeOverride::Absent);
            run_inspect(args.config.as_deref(), max_age).await;
        }
        Command::Check => {
            run_check(args.config.as_deref()).await;
        }
        Command::Init { output, force } => {
            run_init(output, force);
        }
        Command::Schema { output } => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Command::Features => {
            run_features();
        }
    }
}

/// Load the configuration from the explicit path or `./metasweep.toml`.
///
/// Without either, defaults are used, which leaves the database unconfigured.
fn load_config(explicit_path: Option<&str>) -> MetasweepConfig {
    let path = match explicit_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                eprintln!("Config file not found: {}", path.display());
                std::process::exit(1);
            }
            path
        }
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !path.exists() {
                return MetasweepConfig::default();
            }
            path
        }
    };

    match MetasweepConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &MetasweepConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
}

fn load_registry(config: &MetasweepConfig) -> retention::PolicyRegistry {
    match config.retention.registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Invalid retention policies: {}", e);
            std::process::exit(1);
        }
    }
}

/// Build the store pools. Connections open on first use, so an unreachable
/// store is reported by the command itself (an aborted run for `run`).
async fn connect(config: &MetasweepConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!(
            "Error: Database is not configured.\n\
             Add a [database] section to your config file or run 'metasweep init'."
        );
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Invalid database configuration");
            eprintln!("Error: Invalid database configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run one cleanup pass and exit with the run's status code.
async fn run_once(
    explicit_config_path: Option<&str>,
    max_age: MaxAgeOverride,
    dry_run: bool,
    report: Option<String>,
) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);
    let registry = load_registry(&config);
    let db = connect(&config).await;

    let mut run_config = config.retention.run_config().with_override(max_age);
    if dry_run {
        run_config = run_config.with_delete_enabled(false);
    }

    let coordinator =
        RunCoordinator::new(db.retention()).with_options(config.retention.run_options());
    let result = coordinator.run(&registry, &run_config).await;
    retention::log_run_result(&result);
    db.close().await;

    if let Some(target) = report {
        write_report(&result, &target);
    }

    std::process::exit(result.status.exit_code());
}

fn write_report(result: &RunResult, target: &str) {
    let content = match serde_json::to_string_pretty(result) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize run report: {}", e);
            std::process::exit(1);
        }
    };

    if target == "-" {
        println!("{}", content);
    } else if let Err(e) = std::fs::write(target, &content) {
        eprintln!("Failed to write run report to {}: {}", target, e);
        std::process::exit(1);
    } else {
        eprintln!("Run report written to {}", target);
    }
}

/// Run the scheduled worker until Ctrl-C.
async fn run_serve(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);
    let registry = load_registry(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        eprintln!("Error: Failed to initialize metrics: {}", e);
        std::process::exit(1);
    }

    let db = Arc::new(connect(&config).await);

    tokio::select! {
        _ = retention::start_retention_worker(db.clone(), config.retention.clone(), registry) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received, stopping retention worker");
        }
    }

    db.close().await;
}

fn run_policies(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    let registry = load_registry(&config);

    let source = if config.retention.policies.is_some() {
        "configured"
    } else {
        "built-in metadata store defaults"
    };
    println!("Retention policies ({source}):\n");
    println!("  {:<24} {:<20} IDENTITY", "TABLE", "AGE COLUMN");
    for policy in registry.list() {
        let identity: Vec<&str> = policy.identity_columns.iter().map(|c| c.as_str()).collect();
        println!(
            "  {:<24} {:<20} {}",
            policy.entity_kind.as_str(),
            policy.age_attribute.as_str(),
            identity.join(", ")
        );
    }
}

/// Print per-table counts against the cutoff a run would use right now.
async fn run_inspect(explicit_config_path: Option<&str>, max_age: MaxAgeOverride) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);
    let registry = load_registry(&config);
    let db = connect(&config).await;

    let run_config = config.retention.run_config().with_override(max_age);
    let cutoff = retention::resolve_cutoff(&run_config, chrono::Utc::now());

    let stats = match retention::inspect_policies(&*db.retention(), &registry, cutoff.cutoff).await
    {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error: Failed to inspect tables: {}", e);
            db.close().await;
            std::process::exit(1);
        }
    };
    db.close().await;

    println!(
        "Cutoff: {} (max age {} days)\n",
        cutoff.cutoff.to_rfc3339(),
        cutoff.max_age_days
    );
    println!("  {:<24} {:>12} {:>12}", "TABLE", "TOTAL", "EXPIRED");
    for s in &stats {
        println!("  {:<24} {:>12} {:>12}", s.entity_kind, s.total, s.expired);
    }
}

async fn run_check(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);
    let registry = load_registry(&config);
    println!(
        "Configuration OK ({} policies, database: {})",
        registry.len(),
        config.database.kind()
    );

    let db = connect(&config).await;
    let health = db.health_check().await;
    db.close().await;

    match health {
        Ok(()) => println!("Database OK"),
        Err(e) => {
            eprintln!("Error: Database health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Create a default configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::EXAMPLE_CONFIG) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To preview a cleanup without deleting anything, run:");
    println!(
        "  metasweep --config {} run --dry-run",
        output_path.display()
    );
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match MetasweepConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        (
            "database-sqlite",
            "Databases",
            cfg!(feature = "database-sqlite"),
        ),
        (
            "database-postgres",
            "Databases",
            cfg!(feature = "database-postgres"),
        ),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
        ("json-schema", "Export", cfg!(feature = "json-schema")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "standard") {
        "standard"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("metasweep v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" => println!("  (full = standard + prometheus)\n"),
        "standard" => println!("  (standard = minimal + postgres, json-schema)\n"),
        "minimal" => println!("  (minimal = cli + sqlite)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}
