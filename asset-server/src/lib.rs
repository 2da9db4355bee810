//! Static server for the prebuilt UMD bundles the notebook host hands out.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::{debug, error, info, warn};

pub fn router(dir: PathBuf) -> Router {
    Router::new()
        .route("/bundles/:file", get(bundle))
        .layer(Extension(Arc::new(dir)))
}

pub async fn serve(addr: SocketAddr, dir: PathBuf) -> anyhow::Result<()> {
    info!(%addr, dir = ?dir, "serving bundles");
    axum::Server::try_bind(&addr)?
        .serve(router(dir).into_make_service())
        .await?;
    Ok(())
}

/// Serves `dir` on an ephemeral localhost port in the background.
pub async fn spawn_local(dir: PathBuf) -> anyhow::Result<SocketAddr> {
    let server = axum::Server::try_bind(&SocketAddr::from(([127, 0, 0, 1], 0)))?
        .serve(router(dir).into_make_service());
    let addr = server.local_addr();
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("asset server stopped: {e}");
        }
    });
    Ok(addr)
}

async fn bundle(
    Path(file): Path<String>,
    Extension(dir): Extension<Arc<PathBuf>>,
) -> Result<impl IntoResponse, StatusCode> {
    if file.starts_with('.') || file.contains(['/', '\\']) {
        warn!(file = %file, "rejected bundle path");
        return Err(StatusCode::BAD_REQUEST);
    }
    match tokio::fs::read_to_string(dir.join(&file)).await {
        Ok(text) => {
            debug!(file = %file, bytes = text.len(), "bundle served");
            Ok(([(header::CONTENT_TYPE, "application/javascript")], text))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(file = %file, "reading bundle failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
