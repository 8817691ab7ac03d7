//! Request metrics middleware.
//!
//! Metrics are emitted as `tracing` events under the
//! `district_atlas::metrics` target so they can be aggregated from logs.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use tracing::{info, info_span, Span};

/// Header carrying a caller-supplied correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Correlation id of a request: the caller's header, or a fresh UUID.
pub fn request_id(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Span for one request. [`metrics_middleware`] runs inside it and emits the
/// single completion event.
pub fn request_span(request: &Request) -> Span {
    info_span!(
        "request",
        request_id = %request_id(request),
        method = %request.method(),
        path = %normalize_path(request.uri().path()),
    )
}

/// Record method, normalized path, status and latency of every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    info!(
        target: "district_atlas::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request_metric"
    );
    response
}

/// Record the result of a build.
pub fn record_build_metrics(layers: usize, districts: usize, failed_layers: usize, latency_ms: u64) {
    info!(
        target: "district_atlas::metrics",
        metric_type = "build",
        layers,
        districts,
        failed_layers,
        latency_ms,
        "build_metric"
    );
}

/// Record the result of a lookup.
pub fn record_lookup(claims: usize) {
    let result = if claims > 0 { "found" } else { "not_found" };
    info!(
        target: "district_atlas::metrics",
        metric_type = "lookup",
        result,
        claims,
        "lookup_metric"
    );
}

// Generation numbers in paths would explode metric cardinality.
fn normalize_path(path: &str) -> String {
    static GENERATION: OnceLock<Option<Regex>> = OnceLock::new();
    match GENERATION.get_or_init(|| Regex::new(r"/[0-9]+(/|$)").ok()) {
        Some(re) => re.replace_all(path, "/:generation$1").to_string(),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_request_id_prefers_header() {
        let request = axum::http::Request::builder()
            .uri("/health")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_id(&request), "abc-123");
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let request = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let id = request_id(&request);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_ne!(id, request_id(&request));
    }

    #[test]
    fn test_normalize_path_replaces_generation() {
        assert_eq!(normalize_path("/api/atlas/42"), "/api/atlas/:generation");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/api/atlas/current"), "/api/atlas/current");
        assert_eq!(normalize_path("/health"), "/health");
    }
}
