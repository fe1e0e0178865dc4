//! Prometheus metrics endpoint.
//!
//! A run is a finite batch job, so the endpoint is opt-in and only lives as
//! long as the process. The listener is bound before the run starts, so a
//! taken port fails the run up front instead of going unnoticed.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

use crate::error::{BindSnafu, MetricsError, PrometheusInitSnafu};

/// Bind `addr`, install the Prometheus recorder and serve `/metrics` and
/// `/health` in the background.
///
/// Returns the bound address, which differs from `addr` when port 0 is used.
pub async fn init(addr: SocketAddr) -> Result<SocketAddr, MetricsError> {
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
    let bound = listener.local_addr().context(BindSnafu { addr })?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(serve(listener, handle));
    Ok(bound)
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn serve(listener: TcpListener, handle: PrometheusHandle) {
    if let Err(e) = axum::serve(listener, router(handle)).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit;
    use crate::metrics::events::FileRead;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_body(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_recorded_events() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            emit!(FileRead {
                source: "song_data"
            });
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, handle));

        let metrics = get_body(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("starflake_files_read_total{source=\"song_data\"} 1"));

        let health = get_body(addr, "/health").await;
        assert!(health.ends_with("ok\n"));
    }
}
