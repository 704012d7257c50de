use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Document store metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of document store operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Document store operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    pub static ref TRANSACTION_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "transaction_attempts_total",
        "Transaction attempts by outcome (committed, conflict, exhausted, aborted)",
        &["outcome"]
    )
    .unwrap();

    // Business Metrics
    pub static ref QUIZ_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_submissions_total",
        "Total number of quiz submissions",
        &["outcome"]
    )
    .unwrap();

    pub static ref QUIZ_POOL_GENERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_pool_generations_total",
        "Quiz pool refill attempts per slot",
        &["status"]
    )
    .unwrap();

    pub static ref QUIZ_POOL_CLEANUPS_TOTAL: IntCounter = register_int_counter!(
        "quiz_pool_cleanups_total",
        "Active quizzes removed after their completion day passed"
    )
    .unwrap();

    pub static ref CONTENT_GENERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "content_generation_duration_seconds",
        "Content generator call duration in seconds",
        &["kind", "status"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    pub static ref DAILY_QUIZ_JOB_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "daily_quiz_job_runs_total",
        "Total number of daily quiz regeneration runs",
        &["status"]
    )
    .unwrap();

    pub static ref INCIDENT_QUIZ_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "incident_quiz_submissions_total",
        "Total number of incident quiz answers",
        &["correct"]
    )
    .unwrap();

    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_rejections_total",
        "Requests rejected by the rate limiter",
        &["scope"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track document store operation with metrics
pub async fn track_store_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: time a content generator call
pub async fn track_generation<F, T, E>(kind: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let status = if result.is_ok() { "success" } else { "error" };

    CONTENT_GENERATION_DURATION_SECONDS
        .with_label_values(&[kind, status])
        .observe(start.elapsed().as_secs_f64());

    result
}
