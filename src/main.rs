use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use coloring_printer::{AppState, Config, router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::from_env().context("invalid configuration")?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;

    let bind_address = config.bind_address();
    let state = AppState::new(config);
    let printer = state.service.printer();
    info!(
        output_dir = %state.output_dir().display(),
        printing_enabled = printer.is_enabled(),
        print_facility = %printer.facility(),
        page_size = printer.page_size().unwrap_or("none"),
        "Starting coloring page server"
    );

    let app = router(state);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
