use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use basemerge_core::config::{self, SyncConfig};
use basemerge_sync::pipeline::{self, ProvisionLedger, RunReport, SyncScope};

use crate::error::{io_err, DaemonError};
use crate::paths::{basemerge_root, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Last successful sync per mapping table (Unix seconds).
pub type SyncTimestamps = HashMap<String, u64>;

#[derive(Debug, Clone)]
enum SyncTarget {
    All,
    Target(String),
}

impl SyncTarget {
    fn scope(&self) -> SyncScope {
        match self {
            SyncTarget::All => SyncScope::All,
            SyncTarget::Target(name) => SyncScope::Target(name.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            SyncTarget::All => "all".to_string(),
            SyncTarget::Target(name) => name.clone(),
        }
    }
}

struct SyncJob {
    target: SyncTarget,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub target: String,
    pub source: String,
    pub targets: Vec<String>,
    pub inserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub issues: usize,
    pub failures: Vec<String>,
    pub duration_ms: u128,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, json_logs: bool) -> Result<(), DaemonError> {
    init_tracing(json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
///
/// Every sync request (interval tick, base-file change, socket command) goes
/// through one queue with a single consumer, so syncs never overlap.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&home)?;

    let sync_timestamps: Arc<RwLock<SyncTimestamps>> = Arc::new(RwLock::new(HashMap::new()));
    let started_at_unix = unix_seconds_now();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let sync_tx = sync_tx.clone();
        let period = Duration::from_secs(config.daemon.interval_secs.max(1));
        tokio::spawn(async move {
            let result = scheduler_task(period, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let sync_tx = sync_tx.clone();
        let base_path = config.base_path_at(&home);
        let enabled = config.daemon.watch_base;
        tokio::spawn(async move {
            let result = if enabled {
                watcher_task(base_path, sync_tx, shutdown.subscribe()).await
            } else {
                Ok(())
            };
            if result.is_err() {
                let _ = shutdown.send(());
            }
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let timestamps = sync_timestamps.clone();
        tokio::spawn(async move {
            let result =
                sync_processor_task(home, timestamps, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let sync_tx = sync_tx.clone();
        let timestamps = sync_timestamps.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                timestamps,
                sync_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(sync_tx);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    tracing::info!(
        home = %home.display(),
        interval_secs = config.daemon.interval_secs,
        watch_base = config.daemon.watch_base,
        "basemerge daemon started",
    );

    let (scheduler_result, watcher_result, processor_result, socket_result, signal_result) =
        tokio::join!(
            scheduler_handle,
            watcher_handle,
            processor_handle,
            socket_handle,
            signal_handle
        );

    handle_join("scheduler", scheduler_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn scheduler_task(
    period: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_sync(&sync_tx, SyncTarget::All, "interval").await {
                    Ok(summary) => log_summary(&summary),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled sync failed"),
                }
            }
        }
    }
    Ok(())
}

async fn watcher_task(
    base_path: PathBuf,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(dir) = base_path.parent().map(Path::to_path_buf) else {
        return Err(DaemonError::Protocol(format!(
            "base path has no parent directory: {}",
            base_path.display()
        )));
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) compare equal.
    let dir = fs::canonicalize(&dir).unwrap_or(dir);
    let Some(file_name) = base_path.file_name().map(|n| n.to_os_string()) else {
        return Err(DaemonError::Protocol(format!(
            "base path has no file name: {}",
            base_path.display()
        )));
    };
    let watched = dir.join(file_name);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    // The base file is replaced by rename on save, so watch its directory.
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %watched.display(), "watching base file");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if !event.paths.iter().any(|p| is_base_file(p, &watched)) {
                    continue;
                }
                if !should_process_event(&mut debounce, &watched, Instant::now()) {
                    continue;
                }

                match enqueue_sync(&sync_tx, SyncTarget::All, "watcher").await {
                    Ok(summary) => log_summary(&summary),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "watcher-triggered sync failed"),
                }
            }
        }
    }

    Ok(())
}

async fn sync_processor_task(
    home: PathBuf,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Provision state survives across runs for the daemon's lifetime.
    let mut ledger = ProvisionLedger::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let scope = job.target.scope();
                let home_for_sync = home.clone();
                let mut job_ledger = std::mem::take(&mut ledger);
                let (returned_ledger, sync_result) = tokio::task::spawn_blocking(move || {
                    let result = pipeline::run(&home_for_sync, scope, false, &mut job_ledger);
                    (job_ledger, result)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?;
                ledger = returned_ledger;

                let outcome = match sync_result {
                    Ok(report) => {
                        let now = unix_seconds_now();
                        {
                            let mut ts = timestamps.write().await;
                            for target in &report.targets {
                                ts.insert(target.mapping_table.to_string(), now);
                            }
                        }
                        Ok(build_sync_summary(&job.target, job.source, &report, started.elapsed()))
                    }
                    Err(err) => Err(err.to_string()),
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let timestamps = timestamps.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        timestamps,
                        sync_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let config = config::load_at(&home).ok();
                let payload = build_status_payload(
                    &home,
                    config.as_ref(),
                    timestamps.clone(),
                    started_at_unix,
                )
                .await;
                DaemonResponse::ok(payload)
            }
            "sync" => {
                let target = match request.target.clone() {
                    Some(name) => SyncTarget::Target(name),
                    None => SyncTarget::All,
                };
                match enqueue_sync(&sync_tx, target, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    home: &Path,
    config: Option<&SyncConfig>,
    timestamps: Arc<RwLock<SyncTimestamps>>,
    started_at_unix: u64,
) -> Value {
    let ts_snapshot: SyncTimestamps = {
        let ts = timestamps.read().await;
        ts.clone()
    };

    // Configured targets first, in config order; then anything synced since
    // that is no longer configured.
    let mut names: Vec<String> = config
        .map(|c| c.targets.iter().map(|t| t.mapping_table.to_string()).collect())
        .unwrap_or_default();
    let mut extra: Vec<&String> = ts_snapshot.keys().filter(|k| !names.contains(k)).collect();
    extra.sort();
    names.extend(extra.into_iter().cloned());

    let targets: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "last_sync_at_unix": ts_snapshot.get(name).copied().unwrap_or(0),
            })
        })
        .collect();

    let last_sync_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "last_sync_at_unix": last_sync_at_unix,
        "targets": targets,
        "socket": socket_path(home).display().to_string(),
        "base_path": config.map(|c| c.base_path_at(home).display().to_string()),
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    target: SyncTarget,
    source: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            target,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn build_sync_summary(
    target: &SyncTarget,
    source: &'static str,
    report: &RunReport,
    duration: Duration,
) -> SyncSummary {
    let mut summary = SyncSummary {
        target: target.label(),
        source: source.to_string(),
        targets: Vec::new(),
        inserted: 0,
        deleted: 0,
        unchanged: 0,
        issues: 0,
        failures: Vec::new(),
        duration_ms: duration.as_millis(),
    };
    for t in &report.targets {
        summary.targets.push(t.mapping_table.to_string());
        summary.inserted += t.inserted.written;
        summary.deleted += t.deleted.written;
        summary.unchanged += t.unchanged;
        summary.issues += t.issues.len();
    }
    for f in &report.failures {
        summary
            .failures
            .push(format!("{}: {}", f.mapping_table, f.error));
    }
    summary
}

fn log_summary(summary: &SyncSummary) {
    tracing::info!(
        source = %summary.source,
        target = %summary.target,
        inserted = summary.inserted,
        deleted = summary.deleted,
        unchanged = summary.unchanged,
        issues = summary.issues,
        failures = summary.failures.len(),
        duration_ms = summary.duration_ms,
        "sync completed",
    );
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_base_file(path: &Path, watched: &Path) -> bool {
    if path == watched {
        return true;
    }
    // Events may carry a non-canonical path for the same file.
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
            parent.join(name) == watched
        }
        _ => false,
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = basemerge_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global `tracing` subscriber (also captures `log` records).
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call twice.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
