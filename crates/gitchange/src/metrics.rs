//! Process-global Prometheus registry and the REST integration series.
//!
//! The registry is created once and only ever appended to; recording sites
//! reach it through [`metrics`]. The axum router exposes `/metrics` and a
//! trivial `/healthz`.

use std::sync::LazyLock;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// `condition_result` label values.
pub const CONDITION_SUCCESS: &str = "success";
pub const CONDITION_HTTP_STATUS_FAILED: &str = "http_status_failed";
pub const CONDITION_JSON_FAILED: &str = "json_condition_failed";

/// `error_type` label values.
pub const ERROR_PROCESSING_FAILED: &str = "processing_failed";
pub const ERROR_CONDITION_EXTRACTION_FAILED: &str = "condition_field_extraction_failed";
pub const ERROR_DATA_EXTRACTION_FAILED: &str = "data_field_extraction_failed";

/// The REST integration metric family.
pub struct Metrics {
    pub registry: Registry,
    /// `gitchange_rest_api_requests_total{controller, url, method, status_code}`
    pub rest_requests: IntCounterVec,
    /// `gitchange_rest_api_request_duration_seconds{controller, url, method}`
    pub rest_request_duration: HistogramVec,
    /// `gitchange_rest_api_response_size_bytes{controller, url}`
    pub rest_response_size: HistogramVec,
    /// `gitchange_rest_api_condition_checks_total{controller, condition_result}`
    pub condition_checks: IntCounterVec,
    /// `gitchange_rest_api_json_parsing_errors_total{controller, error_type}`
    pub json_parsing_errors: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let rest_requests = IntCounterVec::new(
            Opts::new(
                "gitchange_rest_api_requests_total",
                "REST API requests issued by the operator.",
            ),
            &["controller", "url", "method", "status_code"],
        )
        .expect("rest_requests metric definition");

        let rest_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gitchange_rest_api_request_duration_seconds",
                "REST API request latency in seconds.",
            ),
            &["controller", "url", "method"],
        )
        .expect("rest_request_duration metric definition");

        let rest_response_size = HistogramVec::new(
            HistogramOpts::new(
                "gitchange_rest_api_response_size_bytes",
                "REST API response body size in bytes.",
            )
            .buckets(prometheus::exponential_buckets(64.0, 4.0, 10).expect("bucket layout")),
            &["controller", "url"],
        )
        .expect("rest_response_size metric definition");

        let condition_checks = IntCounterVec::new(
            Opts::new(
                "gitchange_rest_api_condition_checks_total",
                "REST API condition evaluations by outcome.",
            ),
            &["controller", "condition_result"],
        )
        .expect("condition_checks metric definition");

        let json_parsing_errors = IntCounterVec::new(
            Opts::new(
                "gitchange_rest_api_json_parsing_errors_total",
                "REST API response processing failures by type.",
            ),
            &["controller", "error_type"],
        )
        .expect("json_parsing_errors metric definition");

        for collector in [&rest_requests, &condition_checks, &json_parsing_errors] {
            registry
                .register(Box::new(collector.clone()))
                .expect("register counter family");
        }
        for collector in [&rest_request_duration, &rest_response_size] {
            registry
                .register(Box::new(collector.clone()))
                .expect("register histogram family");
        }

        Self {
            registry,
            rest_requests,
            rest_request_duration,
            rest_response_size,
            condition_checks,
            json_parsing_errors,
        }
    }
}

static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// The process-global metric family.
pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Router serving `/metrics` and `/healthz`.
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(|| async { "ok" }))
}

async fn render_metrics() -> Result<String, StatusCode> {
    TextEncoder::new()
        .encode_to_string(&metrics().registry.gather())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
