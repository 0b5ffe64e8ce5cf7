use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use swb_domain::config::{Config, ConfigSeverity};
use swb_gateway::api;
use swb_gateway::runtime::scheduler::SchedulerWorker;
use swb_gateway::runtime::supervisor::container::{ContainerRuntime, DockerRuntime, StubRuntime};
use swb_gateway::state::AppState;
use swb_providers::{LlmRouter, ProviderRegistry};

#[derive(Parser)]
#[command(name = "switchboard", about = "Modular AI agent platform gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "switchboard.toml")]
    config: std::path::PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Validate the config file and exit.
    ConfigValidate,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigValidate) => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swb_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Switchboard starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM providers & router ───────────────────────────────────────
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if providers.is_empty() {
        tracing::warn!("no LLM providers initialized — agent turns will fail until configured");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }
    let llm = Arc::new(LlmRouter::from_config(providers, &config.llm));

    // ── Container runtime ────────────────────────────────────────────
    let containers: Arc<dyn ContainerRuntime> = match DockerRuntime::connect().await {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Docker unavailable — tasks will run against the in-memory stub runtime"
            );
            StubRuntime::new()
        }
    };

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.server.api_token_env,
                "API bearer-token auth DISABLED — set the env var to enable"
            );
            None
        }
    };

    // ── App state ────────────────────────────────────────────────────
    let state = AppState::build(config.clone(), llm, containers, api_token_hash);

    // ── Module discovery ─────────────────────────────────────────────
    state.registry.refresh().await;
    tracing::info!(
        modules = state.registry.module_count(),
        failing = state.registry.module_errors().len(),
        "module registry ready"
    );
    {
        let state = state.clone();
        let period = std::time::Duration::from_secs(config.modules.cache_ttl_secs.max(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // skip the immediate tick
            loop {
                interval.tick().await;
                state.registry.refresh().await;
            }
        });
    }

    // ── Scheduler worker ─────────────────────────────────────────────
    {
        let state = state.clone();
        let tick = std::time::Duration::from_secs(config.scheduler.tick_secs.max(1));
        let worker = SchedulerWorker::new(config.scheduler.max_concurrent_jobs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                worker.tick(&state).await;
            }
        });
        tracing::info!(tick_secs = config.scheduler.tick_secs, "scheduler worker started");
    }

    // ── Periodic sweeps (terminal idle, lock pruning) ────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let closed = state.terminals.sweep_idle();
                if closed > 0 {
                    tracing::info!(closed, "idle terminal sessions closed");
                }
                state.conversation_locks.prune_idle();
            }
        });
    }

    // ── Router & bind ────────────────────────────────────────────────
    let max_concurrent = std::env::var("SWB_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    let app = api::router(state)
        .layer(build_cors_layer(&config.server.allowed_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Switchboard listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. A trailing
/// `:*` wildcard matches any port on that host; a literal `"*"` allows all
/// origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
