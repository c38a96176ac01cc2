//! Prometheus metrics for the FinanceX HTTP services.
//!
//! Exposes:
//! - `financex_request_duration_seconds` (histogram by route)
//! - `financex_request_total` (counter by route and status)
//! - `financex_request_inflight` (gauge by route)
//! - `financex_ingested_items_total` (counter by data type)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // 10ms up to ~80s; chat requests sit near the top.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "financex_request_duration_seconds",
        "HTTP request duration in seconds",
        &["route"],
        buckets
    )
    .expect("failed to register request duration histogram")
});

static REQUEST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "financex_request_total",
        "Total HTTP requests by status",
        &["route", "status"]
    )
    .expect("failed to register request counter")
});

static REQUEST_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "financex_request_inflight",
        "Number of in-flight HTTP requests",
        &["route"]
    )
    .expect("failed to register inflight gauge")
});

static INGESTED_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "financex_ingested_items_total",
        "Data items added to the knowledge graph",
        &["data_type"]
    )
    .expect("failed to register ingestion counter")
});

fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&REQUEST_DURATION);
    Lazy::force(&REQUEST_TOTAL);
    Lazy::force(&REQUEST_INFLIGHT);
    Lazy::force(&INGESTED_ITEMS);
}

/// One in-flight request. The inflight gauge is released on drop, so a
/// request whose handler is cancelled still leaves the gauge.
#[must_use = "dropping the guard ends the request immediately"]
pub struct InflightRequest {
    route: String,
    started: Instant,
}

impl InflightRequest {
    /// Record duration and outcome.
    pub fn finish(self, success: bool) {
        record_request_result(&self.route, self.started.elapsed(), success);
    }
}

impl Drop for InflightRequest {
    fn drop(&mut self) {
        REQUEST_INFLIGHT.with_label_values(&[&self.route]).dec();
    }
}

pub fn record_request_start(route: &str) -> InflightRequest {
    init_collectors();
    REQUEST_INFLIGHT.with_label_values(&[route]).inc();
    InflightRequest {
        route: route.to_string(),
        started: Instant::now(),
    }
}

fn record_request_result(route: &str, duration: Duration, success: bool) {
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration.as_secs_f64());
    REQUEST_TOTAL
        .with_label_values(&[route, if success { "ok" } else { "error" }])
        .inc();
}

pub fn record_ingested_items(data_type: &str, count: usize) {
    init_collectors();
    INGESTED_ITEMS
        .with_label_values(&[data_type])
        .inc_by(count as u64);
}

fn plain_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "encode error",
        ));
    }

    let mut response = plain_response(StatusCode::OK, buffer);
    if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(plain_response(StatusCode::NOT_FOUND, Bytes::new())),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn scrape() -> String {
        let response = metrics_response().await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn successful_request_moves_gauge_and_counters() {
        let route = "/test/metrics/ok";

        let request = record_request_start(route);
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 1);

        request.finish(true);

        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 0);
        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "ok"]).get(), 1);
        assert_eq!(
            REQUEST_DURATION.with_label_values(&[route]).get_sample_count(),
            1
        );
    }

    #[test]
    fn failed_request_counts_as_error() {
        let route = "/test/metrics/error";

        record_request_start(route).finish(false);
        record_request_result(route, Duration::from_secs(2), false);

        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "error"]).get(), 2);
        assert!(REQUEST_DURATION.with_label_values(&[route]).get_sample_sum() >= 2.0);
    }

    #[test]
    fn cancelled_request_releases_gauge() {
        let route = "/test/metrics/cancelled";

        let request = record_request_start(route);
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 1);
        drop(request);

        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 0);
        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "ok"]).get(), 0);
        assert_eq!(REQUEST_TOTAL.with_label_values(&[route, "error"]).get(), 0);
    }

    #[tokio::test]
    async fn aborted_handler_future_releases_gauge() {
        let route = "/test/metrics/aborted";
        let handler = tokio::spawn(async move {
            let request = record_request_start(route);
            std::future::pending::<()>().await;
            request.finish(true);
        });
        tokio::task::yield_now().await;
        while REQUEST_INFLIGHT.with_label_values(&[route]).get() == 0 {
            tokio::task::yield_now().await;
        }

        handler.abort();
        assert!(handler.await.unwrap_err().is_cancelled());
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[route]).get(), 0);
    }

    #[test]
    fn routes_are_tracked_separately() {
        let (a, b) = ("/test/metrics/a", "/test/metrics/b");

        let first = record_request_start(a);
        let second = record_request_start(b);
        first.finish(true);

        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[a]).get(), 0);
        assert_eq!(REQUEST_INFLIGHT.with_label_values(&[b]).get(), 1);

        second.finish(true);
    }

    #[test]
    fn ingestion_counter_accumulates() {
        record_ingested_items("test_invoice", 3);
        record_ingested_items("test_invoice", 2);
        assert_eq!(INGESTED_ITEMS.with_label_values(&["test_invoice"]).get(), 5);
    }

    #[tokio::test]
    async fn scrape_exposes_request_metrics() {
        let route = "/test/metrics/scrape";
        record_request_start(route).finish(true);

        let text = scrape().await;
        assert!(text.contains("financex_request_total"));
        assert!(text.contains("financex_request_duration_seconds"));
        assert!(text.contains(route));
    }

    #[tokio::test]
    async fn scrape_sets_text_content_type() {
        init_collectors();
        let response = metrics_response().await.unwrap();
        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
