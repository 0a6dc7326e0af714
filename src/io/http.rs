//! Operational HTTP endpoint
//!
//! Exposes the read side to the dashboard and drives manual transitions:
//! - GET  /metrics          Prometheus text exposition
//! - GET  /health           liveness probe
//! - GET  /occupancy        cached occupancy snapshot as JSON
//! - POST /presence/<id>    manual check-in/out through the engine
//!
//! Uses hyper for the HTTP server.

use crate::domain::types::{MemberId, PresenceOutcome};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::engine::AttendanceEngine;
use crate::services::occupancy::OccupancyCache;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with facility label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    facility: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{facility=\"{facility}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, facility: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{facility=\"{facility}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    facility: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ =
            writeln!(output, "{name}_bucket{{facility=\"{facility}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{facility=\"{facility}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{facility=\"{facility}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{facility=\"{facility}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, facility: &str, capacity: u32) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_capture_metrics(&mut output, facility, &summary);
    write_presence_metrics(&mut output, facility, &summary);
    write_occupancy_metrics(&mut output, facility, capacity, &summary);

    output
}

fn write_capture_metrics(output: &mut String, facility: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "presenced_samples_total",
        "Total sensor samples acquired",
        MetricType::Counter,
        facility,
        summary.samples_total,
    );
    write_gauge_f64(
        output,
        "presenced_samples_per_sec",
        "Samples acquired per second",
        facility,
        summary.samples_per_sec,
    );
    write_metric(
        output,
        "presenced_quality_failures_total",
        "Samples skipped for image quality",
        MetricType::Counter,
        facility,
        summary.quality_failures_total,
    );
    write_metric(
        output,
        "presenced_matches_total",
        "Samples that verified against a template",
        MetricType::Counter,
        facility,
        summary.matches_total,
    );
    write_metric(
        output,
        "presenced_no_match_total",
        "Samples that verified against no template",
        MetricType::Counter,
        facility,
        summary.no_match_total,
    );
    write_metric(
        output,
        "presenced_match_events_dropped_total",
        "Match events dropped due to channel full",
        MetricType::Counter,
        facility,
        summary.match_events_dropped,
    );

    write_histogram(
        output,
        "presenced_scan_latency_us",
        "Candidate scan latency in microseconds",
        facility,
        &summary.scan_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.scan_avg_us,
    );
    write_metric(
        output,
        "presenced_scan_latency_p99_us",
        "99th percentile candidate scan latency",
        MetricType::Gauge,
        facility,
        summary.scan_p99_us,
    );
}

fn write_presence_metrics(output: &mut String, facility: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "presenced_entries_total",
        "Attendance records opened",
        MetricType::Counter,
        facility,
        summary.entries_total,
    );
    write_metric(
        output,
        "presenced_exits_total",
        "Attendance records closed by check-out",
        MetricType::Counter,
        facility,
        summary.exits_total,
    );
    write_metric(
        output,
        "presenced_auto_checkouts_total",
        "Attendance records closed by the midnight sweep",
        MetricType::Counter,
        facility,
        summary.auto_checkouts_total,
    );
    write_metric(
        output,
        "presenced_unknown_member_total",
        "Presence calls for unknown member ids",
        MetricType::Counter,
        facility,
        summary.unknown_member_total,
    );
    write_metric(
        output,
        "presenced_storage_errors_total",
        "Repository failures surfaced to callers",
        MetricType::Counter,
        facility,
        summary.storage_errors_total,
    );
}

fn write_occupancy_metrics(
    output: &mut String,
    facility: &str,
    capacity: u32,
    summary: &MetricsSummary,
) {
    write_metric(
        output,
        "presenced_members_inside",
        "Members currently inside",
        MetricType::Gauge,
        facility,
        summary.members_inside,
    );
    write_metric(
        output,
        "presenced_members_known",
        "Registered members in the roster",
        MetricType::Gauge,
        facility,
        summary.members_known,
    );
    write_metric(
        output,
        "presenced_capacity",
        "Configured facility capacity",
        MetricType::Gauge,
        facility,
        capacity as u64,
    );
    write_metric(
        output,
        "presenced_cache_refreshes_total",
        "Occupancy snapshots recomputed",
        MetricType::Counter,
        facility,
        summary.cache_refreshes_total,
    );
    write_metric(
        output,
        "presenced_cache_hits_total",
        "Occupancy snapshots served from cache",
        MetricType::Counter,
        facility,
        summary.cache_hits_total,
    );
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Shared state for request handling
pub struct HttpState {
    pub metrics: Arc<Metrics>,
    pub occupancy: Arc<OccupancyCache>,
    pub engine: Arc<AttendanceEngine>,
    pub facility_id: String,
    pub capacity: u32,
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body =
                format_prometheus_metrics(&state.metrics, &state.facility_id, state.capacity);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        // Dashboard poll
        (&Method::GET, "/occupancy") => match state.occupancy.snapshot().await {
            Ok(snapshot) => {
                let utilization_pct = if state.capacity > 0 {
                    snapshot.inside as f64 * 100.0 / state.capacity as f64
                } else {
                    0.0
                };
                let body = serde_json::json!({
                    "inside": snapshot.inside,
                    "outside": snapshot.outside,
                    "total_members": snapshot.total_members,
                    "capacity": state.capacity,
                    "utilization_pct": utilization_pct,
                    "last_entry": snapshot.last_entry,
                    "last_exit": snapshot.last_exit,
                })
                .to_string();
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => {
                error!(error = %e, "occupancy_snapshot_failed");
                Ok(json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    r#"{"ok":false,"error":"snapshot_failed"}"#.to_string(),
                ))
            }
        },
        // Manual check-in/out - POST /presence/<member_id>
        (&Method::POST, path) if path.starts_with("/presence/") => {
            let member_id = path.trim_start_matches("/presence/").trim();
            if member_id.is_empty() {
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"ok":false,"error":"missing_member_id"}"#.to_string(),
                ));
            }

            let member_id = MemberId::from(member_id);
            match state.engine.record_presence(&member_id).await {
                Ok(PresenceOutcome::UnknownMember) => Ok(json_response(
                    StatusCode::NOT_FOUND,
                    format!(r#"{{"ok":false,"error":"unknown_member","member_id":"{member_id}"}}"#),
                )),
                Ok(outcome) => {
                    info!(member_id = %member_id, outcome = %outcome.as_str(), "manual_presence");
                    Ok(json_response(
                        StatusCode::OK,
                        format!(
                            r#"{{"ok":true,"outcome":"{}","member_id":"{member_id}"}}"#,
                            outcome.as_str()
                        ),
                    ))
                }
                Err(e) => {
                    error!(member_id = %member_id, error = %e, "manual_presence_failed");
                    Ok(json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        r#"{"ok":false,"error":"storage_failed"}"#.to_string(),
                    ))
                }
            }
        }
        // CORS preflight for the manual endpoint
        (&Method::OPTIONS, path) if path.starts_with("/presence/") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the operational HTTP server
pub async fn start_http_server(
    port: u16,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(state);

    info!(port = %port, facility = %state.facility_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample();
        metrics.record_sample();
        metrics.record_match();
        metrics.record_entry();
        metrics.record_scan_latency(150);
        metrics.set_members_inside(5);
        metrics.set_members_known(40);

        let output = format_prometheus_metrics(&metrics, "clubhouse", 225);

        assert!(output.contains("presenced_samples_total{facility=\"clubhouse\"} 2"));
        assert!(output.contains("presenced_matches_total{facility=\"clubhouse\"} 1"));
        assert!(output.contains("presenced_entries_total{facility=\"clubhouse\"} 1"));
        assert!(output.contains("presenced_scan_latency_us_bucket{facility=\"clubhouse\""));
        assert!(output.contains("presenced_members_inside{facility=\"clubhouse\"} 5"));
        assert!(output.contains("presenced_members_known{facility=\"clubhouse\"} 40"));
        assert!(output.contains("presenced_capacity{facility=\"clubhouse\"} 225"));
    }
}
