use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use tracing::{error, info, warn};

/// One line per request with method, path, status and latency. Bodies are
/// not buffered; uploads run to several MiB and belong on disk, not in logs.
pub async fn print_request_response(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let res = next.run(req).await;

    let status = res.status().as_u16();
    let ms = start.elapsed().as_millis();
    if res.status().is_success() {
        if ms > 500 {
            warn!("[{} {}] [{}] {}ms", method, uri, status, ms);
        } else {
            info!("[{} {}] [{}] {}ms", method, uri, status, ms);
        }
    } else if res.status().is_client_error() {
        warn!("[{} {}] [{}] {}ms", method, uri, status, ms);
    } else {
        error!("[{} {}] [{}] {}ms", method, uri, status, ms);
    }

    res
}
