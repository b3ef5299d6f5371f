mod routes;

use routes::AppState;
use saloncontrol::{ControlHub, MediaLibrary, ProgressStore};
use salonserver::{ws_handler, Broadcaster, LoggingOptions, ServerBuilder};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = salonconfig::get_config();
    salonserver::init_logging(&LoggingOptions::from_config());

    // ========== Control plane ==========
    let progress = Arc::new(ProgressStore::load(config.get_progress_path()));
    let hub = Arc::new(ControlHub::from_config(progress.clone()));
    let library = Arc::new(MediaLibrary::from_config(progress.clone()));
    let broadcaster = Broadcaster::new(hub.clone());

    let state = AppState {
        hub,
        library,
        progress,
        broadcaster: broadcaster.clone(),
    };

    // ========== HTTP surface ==========
    let mut server = ServerBuilder::new_configured().build();
    let server_info = server.info();
    server
        .add_route("/info", move || {
            let info = server_info.clone();
            async move {
                serde_json::json!({
                    "name": info.name,
                    "version": env!("CARGO_PKG_VERSION"),
                    "httpPort": info.http_port,
                })
            }
        })
        .await;
    server.add_router("/api", routes::api_router(state)).await;
    server
        .add_handler_with_state("/ws", ws_handler, broadcaster)
        .await;

    server.start().await;
    info!("SalonTV is ready, press Ctrl+C to stop");
    server.wait().await;

    Ok(())
}
