use std::net::SocketAddr;

use task_source::{router, AppState, Config};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medfleet_core::logging::init();

    let config = Config::from_env();
    let state = if config.seed {
        AppState::seeded().await
    } else {
        AppState::new()
    };

    let app = router(state);
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, seeded = config.seed, "Task source listening");

    axum::serve(listener, app).await?;
    Ok(())
}
