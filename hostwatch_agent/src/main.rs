use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use hostwatch_agent::state::AppState;
use hostwatch_agent::{history, parse_port, router, tls};

const DEFAULT_PORT: u16 = 3000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_port(args.iter().cloned(), DEFAULT_PORT);
    let tls_enabled = args.iter().any(|a| a == "--enableTLS");

    let state = AppState::new();
    // process-lifetime samplers feeding the cpu/memory/network history
    let _recorders = history::spawn_recorders(state.clone());

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, tls = tls_enabled, "hostwatch agent listening");

    if tls_enabled {
        let (cert, key) = tls::ensure_self_signed_cert()?;
        let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
        axum_server::bind_rustls(addr, config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }
    Ok(())
}
