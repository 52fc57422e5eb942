use crate::web::api::{health_handler, upload_handler, AppState};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(
    host: IpAddr,
    port: u16,
    state: Arc<AppState>,
    max_upload_bytes: usize,
) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires non-blocking sockets
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    };

    let app = router(state, max_upload_bytes);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Tilescope server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
