use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn, Level};

use keba_collector::{install_prometheus, router, AppState, CollectorConfig};
use keba_registers::catalog;
use poller_actor::Poller;
use state_store::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_config_arg();
    let config = CollectorConfig::load_with_path(config_path).context("load config failed")?;
    init_tracing(config.debug);
    config.validate().context("config validation failed")?;

    info!(
        host = %config.modbus.host,
        port = config.modbus.port,
        "configured wallbox"
    );
    if config.debug {
        info!("debug logging enabled");
    }

    let prometheus = install_prometheus()?;
    let store = StateStore::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = Poller::new(
        config.modbus.clone(),
        catalog(),
        store.clone(),
        shutdown_rx.clone(),
        config.poller.clone(),
    );
    let poller_handle = tokio::spawn(poller.run());

    let api_port = config.api_port.context("api port missing after validation")?;
    let bind = format!("{}:{}", config.bind_address, api_port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind http listener on {bind}"))?;
    let app = router(AppState {
        store: store.clone(),
        prometheus: Some(prometheus),
        state_wait: config.state_wait(),
    });

    info!("current state on http://<your hostname>:{api_port}/state");
    info!("metrics available at http://<your hostname>:{api_port}/metrics");

    let mut http_shutdown = shutdown_rx.clone();
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*http_shutdown.borrow() {
                    if http_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx.clone());

    let mut server_finished = false;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "ctrl-c handler failed");
            }
            info!("shutdown signal received");
        }
        result = &mut server_handle => {
            server_finished = true;
            match result {
                Ok(Ok(())) => warn!("http server exited"),
                Ok(Err(err)) => warn!(error = %err, "http server failed"),
                Err(err) => warn!(error = %err, "http server task failed"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !server_finished {
        let _ = server_handle.await;
    }
    if let Err(err) = poller_handle.await {
        warn!(error = %err, "poller task join failed");
    }
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
