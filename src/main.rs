//! Keel CLI entrypoint.
//!
//! This is the main entrypoint for the keel command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use keel_deploy::cli::{Cli, Commands, MessageLevel, OutputFormat, OutputFormatter, StateCommands};
use keel_deploy::config::{
    ConfigParser, ConfigValidator, DeployConfig, StateBackend, find_config_file,
};
use keel_deploy::error::{ConfigError, KeelError, Result};
use keel_deploy::provider::{Provider, ProviderRegistry};
use keel_deploy::reconciler::Reconciler;
use keel_deploy::state::{
    LocalStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id,
};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env("KEEL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns whether every operation succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, &formatter).map(|()| true),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply { yes, max_parallel } => {
            cmd_apply(config_path, yes, max_parallel, &formatter).await
        }
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<()> {
    info!("Initializing new keel project in: {}", path.display());

    let config_path = path.join("keel.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        return emit(&formatter.message(
            MessageLevel::Warning,
            &format!(
                "Configuration file already exists: {} (use --force to overwrite)",
                config_path.display()
            ),
        ));
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/keel.deploy.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.lines().any(|l| l.trim() == state_entry);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# keel")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and set KEEL_KUBE_TOKEN");
    eprintln!("  2. Point provider.api_server in keel.deploy.yaml at your cluster");
    eprintln!("  3. Run 'keel validate' to check your configuration");
    eprintln!("  4. Run 'keel plan' to see what will change");
    eprintln!("  5. Run 'keel apply' to reconcile");

    emit(&formatter.message(MessageLevel::Success, "Project initialized"))
}

/// Validate configuration and the resource graph.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, _) = load_config(config_path)?;

    let result = ConfigValidator::new().check(&config);
    emit(&formatter.format_validation(&config, &result, show_warnings))?;
    if !result.is_valid() {
        return Ok(false);
    }

    let graph = keel_deploy::graph::GraphBuilder::new().build(&config.resources)?;
    debug!("Resource graph order: {:?}", graph.topological_order());
    Ok(true)
}

/// Show the reconciliation plan.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let context = Context::load(config_path).await?;
    let plan = context.reconciler().plan().await?;
    emit(&formatter.format_plan(&plan, detailed))?;
    Ok(true)
}

/// Reconcile the platform with the configuration.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    max_parallel: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let context = Context::load(config_path).await?;
    let mut reconciler = context.reconciler();
    if let Some(n) = max_parallel {
        reconciler = reconciler.with_max_parallel(n);
    }

    let plan = reconciler.plan().await?;
    if !plan.has_changes() {
        emit(&formatter.message(MessageLevel::Success, "No changes to apply"))?;
        return Ok(true);
    }

    if !auto_approve {
        eprintln!("{}", OutputFormatter::new(OutputFormat::Text).format_plan(&plan, false));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let report = reconciler.reconcile(cancellation()).await?;
    emit(&formatter.format_report(&report))?;
    Ok(report.is_success())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<bool> {
    let context = Context::load(config_path).await?;
    let report = context.reconciler().check_drift().await?;
    emit(&formatter.format_drift(&report))?;
    Ok(report.is_converged())
}

/// Delete every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let context = Context::load(config_path).await?;
    let Some(state) = context.store.load().await? else {
        emit(&formatter.message(MessageLevel::Success, "Nothing to destroy"))?;
        return Ok(true);
    };
    if state.resources.is_empty() {
        emit(&formatter.message(MessageLevel::Success, "Nothing to destroy"))?;
        return Ok(true);
    }

    if !auto_approve {
        eprintln!("The following resources will be deleted:");
        for id in state.resources.keys() {
            eprintln!("  - {id}");
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destroy cancelled.");
            return Ok(true);
        }
    }

    let report = context.reconciler().destroy(cancellation()).await?;
    emit(&formatter.format_report(&report))?;
    Ok(report.is_success())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (config, config_file) = load_config(config_path)?;
    let store = create_state_store(&config, &config_file).await?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => emit(&formatter.format_state(&state))?,
            None => emit(&formatter.message(MessageLevel::Warning, "No state found"))?,
        },
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            emit(&formatter.format_lock(&lock))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                emit(&formatter.message(MessageLevel::Success, "State forcefully unlocked"))?;
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.message(MessageLevel::Success, "State unlocked"))?;
            } else {
                emit(&formatter.message(MessageLevel::Error, "Provide --lock-id or use --force"))?;
                return Ok(false);
            }
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Configuration, state store and provider for one command.
struct Context {
    config: DeployConfig,
    store: Arc<dyn StateStore>,
    provider: Arc<dyn Provider>,
}

impl Context {
    async fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config, config_file) = load_config(config_path)?;
        ConfigValidator::new().validate(&config)?;

        let store = create_state_store(&config, &config_file).await?;
        let provider: Arc<dyn Provider> =
            Arc::new(ProviderRegistry::from_config(&config, ConfigParser::kube_token())?);
        Ok(Self {
            config,
            store,
            provider,
        })
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(&self.config, Arc::clone(&self.store), Arc::clone(&self.provider))
    }
}

/// Loads `.env` and the configuration with environment overrides.
fn load_config(config_path: Option<&Path>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file(".")?,
    };
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    Ok((config, config_file))
}

fn base_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Creates the state store the configuration selects.
async fn create_state_store(config: &DeployConfig, config_file: &Path) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir(config_file).join(STATE_DIR), PathBuf::from);
            Arc::new(LocalStateStore::with_base_dir(dir))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                KeelError::Config(ConfigError::validation("S3 bucket not configured", "state.bucket"))
            })?;
            Arc::new(
                S3StateStore::new(bucket, config.state.prefix.as_deref(), config.state.region.as_deref())
                    .await,
            )
        }
    };
    Ok(store)
}

/// Returns a cancellation signal that flips on Ctrl-C.
fn cancellation() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight operations");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r"
project:
  name: voting
provider:
  backend: memory
resources:
  - kind: deployment
    name: db
    spec:
      image: postgres:15-alpine
  - kind: service
    name: db
    depends_on: [deployment/db]
    spec:
      selector:
        app: db
      ports:
        - name: postgres
          port: 5432
          target_port: 5432
";

    #[tokio::test]
    async fn test_context_reconciles_through_registry() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("keel.deploy.yaml");
        std::fs::write(&config_file, CONFIG).unwrap();

        let ctx = Context::load(Some(&config_file)).await.unwrap();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let report = ctx.reconciler().reconcile(cancel_rx).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.entries.len(), 2);
        assert!(dir.path().join(STATE_DIR).exists());
    }
}
