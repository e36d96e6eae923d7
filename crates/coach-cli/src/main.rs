//! Learning coach CLI
//!
//! Runs the HTTP API and offers a few operator commands.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use coach_orchestrator::agents::{ResourceCache, VectorStore};
use coach_orchestrator::analytics::learner_report;
use coach_orchestrator::{
    create_router, AgentRegistry, AppState, Config, JwtKeys, LlmClient, Orchestrator, Services, Store,
};
use coach_report::ReportFormat;
use coach_sandbox::{
    ContainerManager, ExecutionBackend, ExecutionRequest, Language, SecureCodeRunner, UnavailableBackend,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 8000;

/// Agentic learning coach
///
/// Personalised programming curricula, sandboxed exercise grading and
/// progress tracking behind a REST API.
#[derive(Parser, Debug)]
#[command(name = "coach")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: coach.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Check configuration, database, Docker and LLM settings
    Check,

    /// Run a source file once in the sandbox and print the result
    Run {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Language (python or javascript); guessed from the extension when omitted
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Issue a bearer token for a user id
    Token {
        /// User id to put in the token subject
        #[arg(value_name = "USER_ID")]
        user_id: String,
    },

    /// Render a learner's progress report
    Report {
        /// Learner id
        #[arg(value_name = "USER_ID")]
        user_id: String,

        /// Output format: json or markdown
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match load_config(args.config.as_deref()) {
        Ok(config) => match args.command {
            Command::Serve { host, port } => serve(config, &host, port).await,
            Command::Check => check(&config).await,
            Command::Run { file, language } => run_file(&config, &file, language.as_deref()).await,
            Command::Token { user_id } => issue_token(&config, &user_id),
            Command::Report {
                user_id,
                format,
                output,
            } => render_report(&config, &user_id, &format, output.as_deref()).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads the config file, overlays the environment and validates the result.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };
    config.apply_env()?;
    config.validate()?;
    tracing::debug!(?config, "Configuration loaded");
    Ok(config)
}

/// Connects to Docker, falling back to a backend that never executes.
async fn sandbox_backend(config: &Config) -> Arc<dyn ExecutionBackend> {
    if !config.sandbox.enabled {
        tracing::warn!("Sandbox disabled in configuration; submissions will not be executed");
        return Arc::new(UnavailableBackend::new("sandbox disabled in configuration"));
    }
    let manager = match ContainerManager::new() {
        Ok(manager) => manager
            .with_image(Language::Python, &config.sandbox.python_image)
            .with_image(Language::JavaScript, &config.sandbox.javascript_image),
        Err(e) => {
            tracing::warn!(error = %e, "Docker client unavailable; submissions will not be executed");
            return Arc::new(UnavailableBackend::new(e.to_string()));
        }
    };
    if let Err(e) = manager.health_check().await {
        tracing::warn!(error = %e, "Docker daemon unreachable; submissions will not be executed");
        return Arc::new(UnavailableBackend::new(e.to_string()));
    }
    match manager.sweep_orphans().await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Removed orphaned sandbox containers"),
        Err(e) => tracing::warn!(error = %e, "Failed to sweep orphaned sandbox containers"),
    }
    Arc::new(manager)
}

async fn build_services(config: &Config) -> anyhow::Result<Services> {
    let store = Store::open(&config.database_url)?;
    let backend = sandbox_backend(config).await;
    let vector_store = config
        .vector_store_url
        .as_ref()
        .map(|url| VectorStore::new(url, Duration::from_millis(config.llm_timeout_ms)));
    Ok(Services {
        store,
        llm: LlmClient::from_config(config),
        runner: SecureCodeRunner::new(backend, config.sandbox.limits.clone()),
        resources: ResourceCache::new(Duration::from_secs(config.resource_cache_ttl_secs)),
        vector_store,
    })
}

async fn serve(config: Config, host: &str, port: u16) -> anyhow::Result<()> {
    let secret = config.require_jwt_secret()?.to_string();
    let keys = JwtKeys::new(&secret, config.token_ttl_hours);
    let services = build_services(&config).await?;

    println!("Learning coach starting");
    println!("  Database: {}", config.database_url);
    println!("  LLM provider: {}", services.llm.name());
    println!("  Sandbox backend: {}", services.runner.backend_name());

    let orchestrator = Orchestrator::new(
        services,
        AgentRegistry::standard(),
        Duration::from_millis(config.agent_timeout_ms),
        config.breaker,
    );
    let router = create_router(AppState::new(config, orchestrator, keys));

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        anyhow::anyhow!("Invalid bind address '{host}:{port}': {e}\n\nSuggestion: Use an IP address for --host")
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Check if port {port} is already in use or try a different port with --port"
        )
    })?;
    println!("HTTP API server running on http://{addr}");
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
        })
        .await?;

    println!("Server stopped");
    Ok(())
}

async fn check(config: &Config) -> anyhow::Result<()> {
    println!("Configuration:");
    println!("  Database: {}", config.database_url);
    println!("  LLM provider: {}", config.llm_provider);
    println!(
        "  Vector store: {}",
        config.vector_store_url.as_deref().unwrap_or("(curated catalogue only)")
    );
    println!("  Secrets: {:?}", config.secrets);

    let mut problems = Vec::new();

    match Store::open(&config.database_url) {
        Ok(store) => match store.ping().await {
            Ok(()) => println!("Database: ok"),
            Err(e) => problems.push(format!("database: {e}")),
        },
        Err(e) => problems.push(format!("database: {e}")),
    }

    if let Err(e) = config.require_jwt_secret() {
        problems.push(format!("jwt: {e}"));
    } else {
        println!("JWT secret: ok");
    }

    let backend = sandbox_backend(config).await;
    if backend.is_available().await {
        println!("Sandbox: {} available", backend.name());
    } else {
        println!("Sandbox: unavailable (submissions will be stored but not executed)");
    }

    let llm = LlmClient::from_config(config);
    println!("LLM client: {}", llm.name());

    if problems.is_empty() {
        println!("All checks passed");
        Ok(())
    } else {
        anyhow::bail!("{} check(s) failed:\n  {}", problems.len(), problems.join("\n  "))
    }
}

async fn run_file(config: &Config, file: &Path, language: Option<&str>) -> anyhow::Result<()> {
    let language = match language {
        Some(tag) => Language::parse(tag)
            .ok_or_else(|| anyhow::anyhow!("Unknown language '{tag}'\n\nSuggestion: Use 'python' or 'javascript'"))?,
        None => match file.extension().and_then(|e| e.to_str()) {
            Some("py") => Language::Python,
            Some("js" | "mjs") => Language::JavaScript,
            _ => anyhow::bail!(
                "Cannot guess the language of '{}'\n\nSuggestion: Pass --language python or --language javascript",
                file.display()
            ),
        },
    };
    let code = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {e}", file.display()))?;

    let runner = SecureCodeRunner::new(sandbox_backend(config).await, config.sandbox.limits.clone());
    let result = runner.execute(ExecutionRequest::new(code, language)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn issue_token(config: &Config, user_id: &str) -> anyhow::Result<()> {
    let keys = JwtKeys::new(config.require_jwt_secret()?, config.token_ttl_hours);
    println!("{}", keys.issue(user_id)?);
    Ok(())
}

async fn render_report(config: &Config, user_id: &str, format: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let format = ReportFormat::parse(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown format '{format}'\n\nSuggestion: Use 'json' or 'markdown'"))?;
    let services = Services {
        store: Store::open(&config.database_url)?,
        llm: LlmClient::Disabled,
        runner: SecureCodeRunner::new(
            Arc::new(UnavailableBackend::new("not needed for reports")),
            config.sandbox.limits.clone(),
        ),
        resources: ResourceCache::new(Duration::from_secs(config.resource_cache_ttl_secs)),
        vector_store: None,
    };
    let report = learner_report(&services, user_id, chrono::Utc::now()).await?;
    let rendered = report.render(format)?;

    match output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to write '{}': {e}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
