use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dbstrap::{CONFIG_ENV_VAR, CONFIG_NAMESPACE, ConfigSource, DatabaseComponent};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dbstrap")]
#[command(about = "Bootstrap named database connections: models, migrations, and ledger state")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON or YAML). Defaults to $DBSTRAP_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Top-level configuration key holding the connection table.
    #[arg(long, global = true, default_value = CONFIG_NAMESPACE)]
    namespace: String,
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured connections.
    Connections,
    /// Run the full bootstrap and report what each connection ended up with.
    Init,
    /// Apply pending migrations of a connection that does not migrate on init.
    Migrate(ConnectionArgs),
    /// Show applied and pending migrations of a connection.
    Status(ConnectionArgs),
    /// Revert the most recently applied migration of a connection.
    Undo(ConnectionArgs),
    /// List the models registered on a connection.
    Models(ConnectionArgs),
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Connection name from the configuration table.
    name: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match load_component(&cli) {
        Ok(component) => match cli.command {
            Command::Connections => run_connections(&component),
            Command::Init => run_init(&component),
            Command::Migrate(args) => run_migrate(&component, &args),
            Command::Status(args) => run_status(&component, &args),
            Command::Undo(args) => run_undo(&component, &args),
            Command::Models(args) => run_models(&component, &args),
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_component(cli: &Cli) -> Result<DatabaseComponent, String> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .ok_or_else(|| format!("no configuration file: pass --config or set {CONFIG_ENV_VAR}"))?;
    debug!(config = %path.display(), "loading configuration");

    let source = ConfigSource::load(&path)
        .map_err(|e| format!("Failed to load configuration '{}': {e}", path.display()))?;
    Ok(DatabaseComponent::new(source).with_namespace(&cli.namespace))
}

/// Runs `f` against an initialized component and always tears it down.
fn with_initialized<T>(
    component: &DatabaseComponent,
    f: impl FnOnce(&DatabaseComponent) -> Result<T, String>,
) -> Result<T, String> {
    component
        .init()
        .map_err(|e| format!("Bootstrap failed: {e}"))?;
    let result = f(component);
    let teardown = component
        .dinit()
        .map_err(|e| format!("Teardown failed: {e}"));
    let value = result?;
    teardown?;
    Ok(value)
}

fn run_connections(component: &DatabaseComponent) -> Result<(), String> {
    let resolved = component
        .resolved_config()
        .map_err(|e| format!("Invalid configuration: {e}"))?;
    let names = resolved.names();
    if names.is_empty() {
        println!("No connections configured.");
    }

    for name in names {
        let config = resolved
            .connection(&name)
            .map_err(|e| format!("Invalid configuration: {e}"))?
            .ok_or_else(|| format!("connection identifier not found: {name}"))?;
        let setup_dir = config
            .setup_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{name}\tdatabase={}\tsetupDir={setup_dir}\tapplyMigrations={}",
            config.database, config.apply_migrations
        );
    }
    Ok(())
}

fn run_init(component: &DatabaseComponent) -> Result<(), String> {
    with_initialized(component, |component| {
        let names = component.connection_names().map_err(|e| e.to_string())?;
        println!("Bootstrap complete ({} connection(s)):", names.len());
        for name in names {
            if !component.pool().contains(&name) {
                println!("  {name}: deferred (no setupDir)");
                continue;
            }
            let handle = component
                .get_connection(&name)
                .map_err(|e| e.to_string())?;
            let status = component
                .migration_status(&name)
                .map_err(|e| format!("Failed to read ledger of '{name}': {e}"))?;
            println!(
                "  {name}: {} model(s), {} migration(s) applied, {} pending",
                handle.model_names().len(),
                status.applied.len(),
                status.pending.len()
            );
        }
        Ok(())
    })
}

fn run_migrate(component: &DatabaseComponent, args: &ConnectionArgs) -> Result<(), String> {
    with_initialized(component, |component| {
        let report = component
            .apply_migrations(&args.name)
            .map_err(|e| format!("Migration failed: {e}"))?;
        if report.is_noop() {
            println!("No pending migrations for '{}'.", args.name);
        } else {
            println!(
                "Applied {} migration(s) to '{}':",
                report.applied.len(),
                args.name
            );
            for name in &report.applied {
                println!("  {name}");
            }
        }
        Ok(())
    })
}

fn run_status(component: &DatabaseComponent, args: &ConnectionArgs) -> Result<(), String> {
    with_initialized(component, |component| {
        let status = component
            .migration_status(&args.name)
            .map_err(|e| format!("Failed to get migration status: {e}"))?;

        println!("Migration Status ({}):", args.name);
        println!("  Applied: {}", status.applied.len());
        for record in &status.applied {
            let marker = if status.modified.contains(&record.name) {
                " (modified)"
            } else {
                ""
            };
            println!(
                "    {} {}{marker}",
                record.applied_at.as_deref().unwrap_or("-"),
                record.name
            );
        }
        println!("  Pending: {}", status.pending.len());
        for name in &status.pending {
            println!("    {name}");
        }
        if !status.missing.is_empty() {
            println!("  Missing from disk: {}", status.missing.len());
            for name in &status.missing {
                println!("    {name}");
            }
        }
        Ok(())
    })
}

fn run_undo(component: &DatabaseComponent, args: &ConnectionArgs) -> Result<(), String> {
    with_initialized(component, |component| {
        match component
            .undo_migration(&args.name)
            .map_err(|e| format!("Undo failed: {e}"))?
        {
            Some(name) => println!("Reverted {name} on '{}'.", args.name),
            None => println!("Nothing to revert on '{}'.", args.name),
        }
        Ok(())
    })
}

fn run_models(component: &DatabaseComponent, args: &ConnectionArgs) -> Result<(), String> {
    with_initialized(component, |component| {
        let handle = component
            .get_connection(&args.name)
            .map_err(|e| e.to_string())?;
        let models = handle.model_names();
        if models.is_empty() {
            println!("No models registered on '{}'.", args.name);
        }
        for name in models {
            let table = handle
                .model(&name)
                .map(|m| m.table_name().to_string())
                .unwrap_or_default();
            println!("{name}\ttable={table}");
        }
        Ok(())
    })
}
