use std::sync::Arc;

use anyhow::Context as _;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use roster_onboard::config::{FlowConfig, ServerConfig};
use roster_onboard::directory::{Directory, HttpDirectory};
use roster_onboard::llm::{LlmConfig, create_provider};
use roster_onboard::onboarding::{
    FlowRouteState, SessionDeps, SessionManager, flow_routes, spawn_expiry_sweep,
};
use roster_onboard::parser::LlmEntityParser;

const SESSION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().context("loading configuration")?;

    eprintln!("📋 Roster Onboard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Directory: {}", config.directory_url);
    eprintln!("   API: http://0.0.0.0:{}/api/flows", config.port);

    // ── LLM + parser ────────────────────────────────────────────────────
    let llm_config = LlmConfig {
        backend: config.llm_backend,
        api_key: config.llm_api_key.clone(),
        model: config.model.clone(),
    };
    let llm = create_provider(&llm_config).context("creating LLM provider")?;

    let flow_config = FlowConfig::default();
    let parser = Arc::new(LlmEntityParser::new(llm, &flow_config));

    // ── Directory ───────────────────────────────────────────────────────
    let directory: Arc<dyn Directory> = Arc::new(
        HttpDirectory::new(&config.directory_url, config.directory_token.clone())
            .context("creating directory client")?,
    );

    // ── Sessions + routes ───────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(SessionDeps::new(
        parser,
        directory,
        flow_config,
    )));
    let _sweep_handle = spawn_expiry_sweep(Arc::clone(&sessions), SESSION_SWEEP_INTERVAL);

    let app = flow_routes(FlowRouteState { sessions }).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Roster Onboard listening");

    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}
