#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use keba_registers::{decode, Aggregator, DecodeError, RegisterSpec};
use modbus_client::{ClientConfig, Connection, ConnectionError, TransportError};
use state_store::StateStore;
use types::RegisterValue;

pub const AVAILABILITY_GAUGE: &str = "wallbox_availability";
pub const UPDATE_DURATION_HISTOGRAM: &str = "register_update_duration_seconds";
pub const CYCLES_COUNTER: &str = "poll_cycles_total";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between the starts of two consecutive cycles.
    pub poll_interval: Duration,
    /// Pause between two consecutive register reads within a sweep.
    pub pacing_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            pacing_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Connecting,
    Sweeping,
    Publishing,
    Sleeping,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to connect to wallbox: {0}")]
    Connect(#[from] ConnectionError),
    #[error("reading register {address} failed: {source}")]
    Transport {
        address: u16,
        #[source]
        source: TransportError,
    },
    #[error("decoding register {address} failed: {source}")]
    Decode {
        address: u16,
        #[source]
        source: DecodeError,
    },
}

impl CycleError {
    fn outcome(&self) -> &'static str {
        match self {
            CycleError::Connect(_) => "connect_failed",
            CycleError::Transport { .. } => "transport_failed",
            CycleError::Decode { .. } => "decode_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub registers: usize,
    pub elapsed: Duration,
}

/// Drives the conversation with one wallbox and publishes a snapshot per sweep.
///
/// A cycle either publishes a snapshot built from one complete sweep or
/// publishes nothing; a failed read discards the values collected so far.
pub struct Poller {
    client_config: ClientConfig,
    catalog: Vec<RegisterSpec>,
    aggregator: Aggregator,
    store: StateStore,
    shutdown: watch::Receiver<bool>,
    config: SchedulerConfig,
    state: PollState,
}

impl Poller {
    pub fn new(
        client_config: ClientConfig,
        catalog: &[RegisterSpec],
        store: StateStore,
        shutdown: watch::Receiver<bool>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            client_config,
            catalog: catalog.to_vec(),
            aggregator: Aggregator::new(catalog),
            store,
            shutdown,
            config,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub async fn run(mut self) {
        let host = self.client_config.host.clone();
        info!(
            host = %host,
            port = self.client_config.port,
            registers = self.catalog.len(),
            interval_ms = self.config.poll_interval.as_millis(),
            "poller started"
        );

        loop {
            if *self.shutdown.borrow() {
                info!(host = %host, "poller shutdown requested");
                break;
            }

            let cycle_start = Instant::now();
            match self.poll_once().await {
                Ok(report) => {
                    counter!(CYCLES_COUNTER, "outcome" => "ok").increment(1);
                    info!(
                        host = %host,
                        registers = report.registers,
                        elapsed_ms = report.elapsed.as_millis(),
                        "poll cycle complete"
                    );
                }
                Err(err) => {
                    counter!(CYCLES_COUNTER, "outcome" => err.outcome()).increment(1);
                    warn!(host = %host, error = %err, "poll cycle aborted");
                }
            }

            let next_start = cycle_start + self.config.poll_interval;
            let lag = Instant::now().saturating_duration_since(next_start);
            if !lag.is_zero() {
                warn!(host = %host, lag_ms = lag.as_millis(), "poll cycle overran interval");
            }

            tokio::select! {
                _ = sleep_until(next_start) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!(host = %host, "poller shutdown requested");
                        break;
                    }
                }
            }
        }

        self.enter(PollState::Idle);
    }

    /// Runs one full cycle: connect, sweep, publish, disconnect.
    pub async fn poll_once(&mut self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();

        self.enter(PollState::Connecting);
        let mut conn = match modbus_client::connect(&self.client_config).await {
            Ok(conn) => conn,
            Err(err) => {
                self.mark_available(false);
                self.enter(PollState::Sleeping);
                return Err(err.into());
            }
        };
        self.mark_available(true);

        self.enter(PollState::Sweeping);
        let values = match self.sweep(&mut conn).await {
            Ok(values) => values,
            Err(err) => {
                self.mark_available(false);
                self.enter(PollState::Sleeping);
                conn.disconnect().await;
                return Err(err);
            }
        };

        self.enter(PollState::Publishing);
        let snapshot = self.aggregator.aggregate(&values).stamped(Utc::now());
        self.store.publish(snapshot);
        let elapsed = started.elapsed();
        self.store.record_cycle_duration(elapsed);
        histogram!(UPDATE_DURATION_HISTOGRAM).record(elapsed.as_secs_f64());

        self.enter(PollState::Sleeping);
        conn.disconnect().await;

        Ok(CycleReport {
            registers: values.len(),
            elapsed,
        })
    }

    async fn sweep(&self, conn: &mut Connection) -> Result<Vec<RegisterValue>, CycleError> {
        let mut values = Vec::with_capacity(self.catalog.len());

        for (index, spec) in self.catalog.iter().enumerate() {
            if index > 0 && !self.config.pacing_delay.is_zero() {
                sleep(self.config.pacing_delay).await;
            }

            let payload = conn
                .read_holding_register(spec.address)
                .await
                .map_err(|source| CycleError::Transport {
                    address: spec.address,
                    source,
                })?;
            let raw = decode(&payload).map_err(|source| CycleError::Decode {
                address: spec.address,
                source,
            })?;
            debug!(address = spec.address, name = spec.name, raw, "register read");
            values.push(RegisterValue::new(spec.address, raw));
        }

        Ok(values)
    }

    fn mark_available(&self, available: bool) {
        self.store.set_available(available);
        gauge!(AVAILABILITY_GAUGE).set(if available { 1.0 } else { 0.0 });
    }

    fn enter(&mut self, state: PollState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "poller state change");
            self.state = state;
        }
    }
}
