use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use conclave_domain::config::{Config, ConfigSeverity};
use conclave_domain::store::MemoryConversationStore;
use conclave_gateway::cli::{Cli, Command, ConfigCommand};
use conclave_gateway::state::{AgentDirectory, AppState, ControlMap, TicketStore};
use conclave_gateway::{api, cli};
use conclave_providers::ProviderRegistry;
use conclave_registry::{ConnectionRegistry, PushTokenStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path);
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("conclave {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,conclave_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("conclave starting");

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

    let store: Arc<dyn conclave_domain::store::ConversationStore> =
        Arc::new(MemoryConversationStore::new());
    tracing::info!(dsn = %config.server.store_dsn, "conversation store ready");

    let providers = Arc::new(
        ProviderRegistry::from_configs(&config.providers).context("initializing providers")?,
    );
    if providers.is_empty() {
        tracing::warn!("no providers initialized — only agents using the Mock adapter can run");
    } else {
        tracing::info!(providers = providers.len(), "provider registry ready");
    }

    let registry = Arc::new(ConnectionRegistry::new());
    let push_tokens = Arc::new(PushTokenStore::new());
    let delivery = Arc::new(
        conclave_delivery::DeliveryCoordinator::new(
            registry.clone(),
            push_tokens.clone(),
            config.push.clone(),
        )
        .context("initializing delivery coordinator")?,
    );
    tracing::info!(push_enabled = config.push.enabled, "delivery coordinator ready");

    let state = AppState {
        config: config.clone(),
        store,
        providers,
        agents: Arc::new(AgentDirectory::new()),
        registry: registry.clone(),
        push_tokens,
        delivery,
        control: Arc::new(ControlMap::new()),
        tickets: Arc::new(TicketStore::new()),
    };

    // Periodic idle-session pruning.
    {
        let registry = registry.clone();
        let idle_timeout = config.server.session_idle_timeout_secs as i64;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                registry.prune_stale(idle_timeout);
            }
        });
    }
    tracing::info!("idle-session sweeper started (30s tick)");

    let cors_layer = build_cors_layer(&config.server.allowed_origins);
    let max_concurrent = config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "conclave listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. An empty
/// list or a literal `"*"` entry allows every origin (dev mode);
/// otherwise only the exact listed origins are allowed.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS allows all origins — set server.allowed_origins to restrict");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let exact: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %o, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(exact))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
