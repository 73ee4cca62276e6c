// Prometheus metrics definitions for the gridsnake backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Snakes currently alive in the arena.
    pub static ref LIVE_PLAYERS: IntGauge =
        IntGauge::new("gridsnake_live_players", "Snakes currently alive").unwrap();

    /// Foods currently on the map.
    pub static ref FOOD_ON_MAP: IntGauge =
        IntGauge::new("gridsnake_food_on_map", "Foods currently on the map").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Rounds resolved since startup.
    pub static ref ROUNDS_TOTAL: IntCounter =
        IntCounter::new("gridsnake_rounds_total", "Rounds resolved").unwrap();

    /// Deaths, by cause (wall, self, other_snake, head_on).
    pub static ref DEATHS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gridsnake_deaths_total", "Snake deaths"),
        &["cause"],
    )
    .unwrap();

    /// Kill credits awarded.
    pub static ref KILLS_TOTAL: IntCounter =
        IntCounter::new("gridsnake_kills_total", "Kill credits awarded").unwrap();

    /// Foods eaten.
    pub static ref FOOD_EATEN_TOTAL: IntCounter =
        IntCounter::new("gridsnake_food_eaten_total", "Foods eaten").unwrap();

    /// Occupancy index rebuilds after an inconsistency.
    pub static ref OCCUPANCY_REBUILDS_TOTAL: IntCounter = IntCounter::new(
        "gridsnake_occupancy_rebuilds_total",
        "Occupancy index rebuilds",
    )
    .unwrap();

    /// API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gridsnake_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Per-round processing time in milliseconds.
    pub static ref TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("gridsnake_tick_duration_ms", "Per-round processing time in ms")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "gridsnake_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(LIVE_PLAYERS.clone()),
        Box::new(FOOD_ON_MAP.clone()),
        Box::new(ROUNDS_TOTAL.clone()),
        Box::new(DEATHS_TOTAL.clone()),
        Box::new(KILLS_TOTAL.clone()),
        Box::new(FOOD_EATEN_TOTAL.clone()),
        Box::new(OCCUPANCY_REBUILDS_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(TICK_DURATION_MS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
