//! Minimal HTTP server exposing `/metrics` (Prometheus text format) and
//! `/health` (liveness) (§10.5). Runs as its own `tokio` task for the life
//! of the process; it shares the metrics registry with the rest of the
//! worker but has no other coupling to the ladder/executor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::metrics::LadderMetrics;

pub struct MetricsServer {
    listen_addr: SocketAddr,
    metrics: Arc<LadderMetrics>,
}

impl MetricsServer {
    pub fn new(listen_addr: SocketAddr, metrics: Arc<LadderMetrics>) -> Self {
        Self { listen_addr, metrics }
    }

    /// Serves until the process exits or the listener errors out. Intended
    /// to be spawned as a background task; a bind failure is fatal enough to
    /// propagate up to `main`.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await.context("failed to bind metrics server")?;
        info!(addr = %self.listen_addr, "metrics server listening on /metrics and /health");

        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "metrics server: failed to accept connection");
                    continue;
                }
            };

            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = metrics.clone();
                    async move { Ok::<_, hyper::Error>(handle(req, metrics)) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(remote = %remote, error = %e, "metrics server connection closed with error");
                }
            });
        }
    }
}

fn handle(req: Request<hyper::body::Incoming>, metrics: Arc<LadderMetrics>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/health" | "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK")))
            .expect("static health response is well-formed"),
        "/metrics" => match encode(&metrics) {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .expect("encoded metrics body is well-formed"),
            Err(e) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(format!("metrics encode error: {e}"))))
                .expect("error response is well-formed"),
        },
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .expect("404 response is well-formed"),
    }
}

fn encode(metrics: &LadderMetrics) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metrics.registry().gather(), &mut buffer).context("encode prometheus metrics")?;
    String::from_utf8(buffer).context("metrics output was not valid utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_gathered_metrics_as_prometheus_text() {
        let metrics = Arc::new(LadderMetrics::new().unwrap());
        metrics.submits_total.with_label_values(&["success"]).inc();
        let text = encode(&metrics).unwrap();
        assert!(text.contains("ladder_mm_submits_total"));
        assert!(text.contains("HELP"));
    }
}
