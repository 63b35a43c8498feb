use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prompt_firewall::{api, config, proxy, AppState};

#[derive(Debug, Parser)]
#[command(name = "pfproxy", about = "Local security proxy for LLM API traffic")]
struct Cli {
    /// Proxy listener port (overrides PF_PROXY_PORT).
    #[arg(long)]
    proxy_port: Option<u16>,
    /// Admin API / stream listener port (overrides PF_ADMIN_PORT).
    #[arg(long)]
    admin_port: Option<u16>,
    /// Data directory for policy, access rules, and the budget db
    /// (overrides PF_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "prompt_firewall=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    let mut cfg = config::load()?;
    if let Some(port) = args.proxy_port {
        cfg.proxy_port = port;
    }
    if let Some(port) = args.admin_port {
        cfg.admin_port = port;
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }

    print_banner(&cfg);

    let state = Arc::new(AppState::new(cfg.clone())?);

    let proxy_app = axum::Router::new()
        .fallback(proxy::handler::proxy_handler)
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer(&cfg.cors_origins));

    let admin_app = api::admin_router(state.clone())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer(&cfg.cors_origins));

    let proxy_addr = SocketAddr::from(([127, 0, 0, 1], cfg.proxy_port));
    let admin_addr = SocketAddr::from(([127, 0, 0, 1], cfg.admin_port));

    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr)
        .await
        .with_context(|| format!("binding proxy listener on {proxy_addr}"))?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("binding admin listener on {admin_addr}"))?;

    tracing::info!(%proxy_addr, %admin_addr, "prompt firewall listening");

    tokio::try_join!(
        async { axum::serve(proxy_listener, proxy_app).await },
        async { axum::serve(admin_listener, admin_app).await },
    )?;

    Ok(())
}

/// CORS for the dashboard: the configured origins, or everything when `*`
/// is listed. Preflight is answered by the layer itself.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-target-url"),
            HeaderName::from_static("x-api-key"),
        ]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

fn print_banner(cfg: &config::Config) {
    println!("  prompt-firewall");
    println!("  proxy  -> http://127.0.0.1:{}", cfg.proxy_port);
    println!("  admin  -> http://127.0.0.1:{}/api", cfg.admin_port);
    println!("  stream -> ws://127.0.0.1:{}/ws", cfg.admin_port);
    if cfg.api_key_generated {
        println!("  api key (generated) -> {}", cfg.api_key);
    } else {
        println!("  api key -> from PF_API_KEY");
    }
    println!("  cors   -> {}", cfg.cors_origins.join(", "));
}
