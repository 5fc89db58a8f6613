pub mod config;
pub mod http;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use poller_actor::{AVAILABILITY_GAUGE, CYCLES_COUNTER, UPDATE_DURATION_HISTOGRAM};

pub use config::CollectorConfig;
pub use http::{router, AppState};

const REQUEST_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
/// A full sweep takes roughly one pacing delay per register.
const UPDATE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 45.0, 60.0, 120.0];

/// Installs the global Prometheus recorder and returns the handle `/metrics` renders from.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(UPDATE_DURATION_HISTOGRAM.to_string()),
            UPDATE_BUCKETS,
        )
        .context("configure update duration buckets")?
        .set_buckets_for_metric(
            Matcher::Full(http::REQUEST_DURATION_HISTOGRAM.to_string()),
            REQUEST_BUCKETS,
        )
        .context("configure request duration buckets")?
        .install_recorder()
        .context("install prometheus recorder")?;

    describe_gauge!(
        AVAILABILITY_GAUGE,
        "Shows if the wallbox is available (1 for available, 0 for unavailable)"
    );
    describe_histogram!(
        UPDATE_DURATION_HISTOGRAM,
        Unit::Seconds,
        "Time taken to update register data in seconds"
    );
    describe_counter!(CYCLES_COUNTER, "Poll cycles by outcome");
    describe_counter!(http::REQUESTS_COUNTER, "Total number of requests received");
    describe_histogram!(
        http::REQUEST_DURATION_HISTOGRAM,
        Unit::Seconds,
        "Histogram of response time for handler in seconds"
    );

    Ok(handle)
}
