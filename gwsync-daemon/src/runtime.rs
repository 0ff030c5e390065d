use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use gwsync_core::{AgentConfig, Mode};
use gwsync_sync::{CycleOutcome, LeaseTick, MonitorOutcome, SyncEngine};

use crate::consul::ConsulRegistry;
use crate::error::{io_err, DaemonError};
use crate::logging::init_tracing;
use crate::traefik::TraefikSource;

/// Periods of the daemon loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub resync: Duration,
    pub monitor: Duration,
    /// Session renew period; `None` in tag mode.
    pub lease: Option<Duration>,
    /// Debug log to rotate; `None` when debug logging is off.
    pub debug_log: Option<PathBuf>,
}

impl Schedule {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            resync: config.resync,
            monitor: config.health_check.interval,
            lease: (config.mode == Mode::Kv).then_some(config.health_check.interval),
            debug_log: config.log.debug.then(|| config.log.debug_log.clone()),
        }
    }
}

/// Build the tokio runtime and run the agent until a signal arrives.
pub fn start_blocking(config: AgentConfig) -> Result<(), DaemonError> {
    init_tracing(&config.log)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Wire the HTTP clients into an engine and run it until SIGINT / SIGTERM.
pub async fn run(config: AgentConfig) -> Result<(), DaemonError> {
    let source = Arc::new(TraefikSource::from_config(&config)?);
    let registry = Arc::new(ConsulRegistry::from_config(&config)?);
    tracing::info!(
        mode = %config.mode,
        node = %config.node_name,
        consul = %config.consul_addr,
        rawdata = %source.url(),
        resync_secs = config.resync.as_secs(),
        "gwsync agent starting"
    );

    let engine = Arc::new(SyncEngine::new(&config, source, registry));
    let schedule = Schedule::from_config(&config);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = signal_task(shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let result = run_engine(engine, schedule, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(());
    let signal_result = signal_handle.await;

    result?;
    handle_join("signal_handler", signal_result)
}

/// Start the engine, drive its loops until `shutdown` fires, then stop it.
///
/// Any loop ending (normally or not) shuts the others down.
pub async fn run_engine(
    engine: Arc<SyncEngine>,
    schedule: Schedule,
    shutdown: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    engine.start().await;

    let resync_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let engine = engine.clone();
        let period = schedule.resync;
        tokio::spawn(async move {
            let result = resync_task(engine, period, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let monitor_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let engine = engine.clone();
        let period = schedule.monitor;
        tokio::spawn(async move {
            let result = monitor_task(engine, period, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let lease_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let engine = engine.clone();
        let period = schedule.lease;
        tokio::spawn(async move {
            let result = match period {
                Some(period) => lease_task(engine, period, shutdown_rx).await,
                None => Ok(()),
            };
            if period.is_some() {
                let _ = shutdown.send(());
            }
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let log_path = schedule.debug_log.clone();
        tokio::spawn(async move {
            let Some(log_path) = log_path else {
                return Ok(());
            };
            let result = log_rotation_task(log_path, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let (resync_result, monitor_result, lease_result, rotation_result) =
        tokio::join!(resync_handle, monitor_handle, lease_handle, rotation_handle);

    engine.shutdown().await;

    handle_join("resync", resync_result)?;
    handle_join("monitor", monitor_result)?;
    handle_join("lease", lease_result)?;
    handle_join("log_rotation", rotation_result)?;
    Ok(())
}

async fn resync_task(
    engine: Arc<SyncEngine>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // The first tick completes immediately: the initial cycle runs at start.
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match engine.run_cycle().await {
                    CycleOutcome::Skipped => tracing::debug!("resync skipped while degraded"),
                    CycleOutcome::SourceFailed(_) => {}
                    CycleOutcome::Applied(report) => tracing::debug!(
                        noop = report.is_noop(),
                        "resync cycle complete"
                    ),
                    CycleOutcome::Partial(report) | CycleOutcome::RegistryUnreachable(report) => {
                        tracing::debug!(
                            conflicts = report.conflicts,
                            unreachable = report.unreachable,
                            "resync cycle incomplete"
                        )
                    }
                }
            }
        }
    }
    Ok(())
}

async fn monitor_task(
    engine: Arc<SyncEngine>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // start() already probed

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let MonitorOutcome::Recovered { replay } = engine.monitor_tick().await {
                    tracing::info!(replayed = replay.is_some(), "sync resumed");
                }
            }
        }
    }
    Ok(())
}

async fn lease_task(
    engine: Arc<SyncEngine>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // the session was created by start()

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let LeaseTick::Failed(err) = engine.lease_tick().await {
                    tracing::warn!(error = %err, "session upkeep failed, retrying next tick");
                }
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    log_path: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let log_path = log_path.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_debug_log(&log_path);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

async fn signal_task(mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = wait_for_signal() => {
            let name = signal?;
            tracing::info!(signal = name, "shutting down");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| DaemonError::Signal(e.to_string()))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result
            .map(|()| "SIGINT")
            .map_err(|e| DaemonError::Signal(e.to_string())),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str, DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map(|()| "ctrl-c")
        .map_err(|e| DaemonError::Signal(e.to_string()))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task: task.to_owned(),
            reason: err.to_string(),
        }),
    }
}
