//! Prometheus-compatible sync metrics
//!
//! Counts what the reconciliation engine and connection do so desyncs and
//! reconnect storms show up on a dashboard. Served over plain HTTP when
//! `METRICS_PORT` is set: `/metrics` (Prometheus text) and `/metrics/json`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::lobby::mirror::ApplyOutcome;

/// Samples kept for apply-time percentiles
const APPLY_HISTORY: usize = 1000;

/// Metrics registry for the lobby client
#[derive(Debug)]
pub struct Metrics {
    // Inbound traffic
    pub messages_received: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub bytes_received: AtomicU64,
    pub messages_sent: AtomicU64,

    // Mirror updates by shape
    pub snapshots_applied: AtomicU64,
    pub diffs_applied: AtomicU64,
    pub patch_streams_applied: AtomicU64,

    // Desync signals
    pub games_dropped: AtomicU64,
    pub stale_skipped: AtomicU64,
    pub resyncs_requested: AtomicU64,

    // Mirror size
    pub games_mirrored: AtomicU64,
    pub games_visible: AtomicU64,

    // Session
    pub alerts_played: AtomicU64,
    pub sessions_launched: AtomicU64,
    pub session_timeouts: AtomicU64,

    // Connection
    pub connected: AtomicU64,
    pub reconnects: AtomicU64,

    // Apply timing (microseconds)
    pub apply_time_us: AtomicU64,
    pub apply_time_p95_us: AtomicU64,
    pub apply_time_p99_us: AtomicU64,
    pub apply_time_max_us: AtomicU64,

    start_time: Instant,

    // Rolling apply times for percentile calculation
    apply_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            diffs_applied: AtomicU64::new(0),
            patch_streams_applied: AtomicU64::new(0),
            games_dropped: AtomicU64::new(0),
            stale_skipped: AtomicU64::new(0),
            resyncs_requested: AtomicU64::new(0),
            games_mirrored: AtomicU64::new(0),
            games_visible: AtomicU64::new(0),
            alerts_played: AtomicU64::new(0),
            sessions_launched: AtomicU64::new(0),
            session_timeouts: AtomicU64::new(0),
            connected: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            apply_time_us: AtomicU64::new(0),
            apply_time_p95_us: AtomicU64::new(0),
            apply_time_p99_us: AtomicU64::new(0),
            apply_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
            apply_history: RwLock::new(VecDeque::with_capacity(APPLY_HISTORY)),
        }
    }

    /// Fold one apply outcome into the desync counters
    pub fn record_outcome(&self, outcome: &ApplyOutcome) {
        self.games_dropped
            .fetch_add(outcome.dropped.len() as u64, Ordering::Relaxed);
        if outcome.stale {
            self.stale_skipped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.resync_needed {
            self.resyncs_requested.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record how long one mirror update took and update percentiles
    pub fn record_apply_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.apply_time_us.store(us, Ordering::Relaxed);

        let mut history = self.apply_history.write();
        history.push_back(us);
        while history.len() > APPLY_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.apply_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.apply_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.apply_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn set_mirror_size(&self, mirrored: usize, visible: usize) {
        self.games_mirrored.store(mirrored as u64, Ordering::Relaxed);
        self.games_visible.store(visible as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("lobby_messages_received_total", "Inbound frames received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("lobby_messages_rejected_total", "Inbound frames that failed validation", "counter",
            self.messages_rejected.load(Ordering::Relaxed));
        metric!("lobby_bytes_received_total", "Inbound bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("lobby_messages_sent_total", "Outbound commands sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));

        metric!("lobby_snapshots_applied_total", "Full snapshots applied", "counter",
            self.snapshots_applied.load(Ordering::Relaxed));
        metric!("lobby_diffs_applied_total", "Update/delete diffs applied", "counter",
            self.diffs_applied.load(Ordering::Relaxed));
        metric!("lobby_patch_streams_applied_total", "Patch streams applied", "counter",
            self.patch_streams_applied.load(Ordering::Relaxed));

        metric!("lobby_games_dropped_total", "Games dropped after a malformed update", "counter",
            self.games_dropped.load(Ordering::Relaxed));
        metric!("lobby_stale_skipped_total", "Patch streams skipped as already seen", "counter",
            self.stale_skipped.load(Ordering::Relaxed));
        metric!("lobby_resyncs_requested_total", "Full list resyncs requested", "counter",
            self.resyncs_requested.load(Ordering::Relaxed));

        metric!("lobby_games_mirrored", "Games in the local mirror", "gauge",
            self.games_mirrored.load(Ordering::Relaxed));
        metric!("lobby_games_visible", "Games visible to the viewer", "gauge",
            self.games_visible.load(Ordering::Relaxed));

        metric!("lobby_alerts_played_total", "Lobby alerts played", "counter",
            self.alerts_played.load(Ordering::Relaxed));
        metric!("lobby_sessions_launched_total", "Game sessions launched", "counter",
            self.sessions_launched.load(Ordering::Relaxed));
        metric!("lobby_session_timeouts_total", "Sessions closed by server timeout", "counter",
            self.session_timeouts.load(Ordering::Relaxed));

        metric!("lobby_connected", "Connected to the lobby server (0/1)", "gauge",
            self.connected.load(Ordering::Relaxed));
        metric!("lobby_reconnects_total", "Reconnect attempts", "counter",
            self.reconnects.load(Ordering::Relaxed));

        metric!("lobby_apply_time_microseconds", "Last mirror update apply time", "gauge",
            self.apply_time_us.load(Ordering::Relaxed));
        metric!("lobby_apply_time_p95_microseconds", "95th percentile apply time", "gauge",
            self.apply_time_p95_us.load(Ordering::Relaxed));
        metric!("lobby_apply_time_p99_microseconds", "99th percentile apply time", "gauge",
            self.apply_time_p99_us.load(Ordering::Relaxed));
        metric!("lobby_apply_time_max_microseconds", "Maximum apply time", "gauge",
            self.apply_time_max_us.load(Ordering::Relaxed));

        metric!("lobby_uptime_seconds", "Client uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON form of the same counters
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "traffic": {
                "messages_received": load(&self.messages_received),
                "messages_rejected": load(&self.messages_rejected),
                "bytes_received": load(&self.bytes_received),
                "messages_sent": load(&self.messages_sent),
            },
            "mirror": {
                "snapshots_applied": load(&self.snapshots_applied),
                "diffs_applied": load(&self.diffs_applied),
                "patch_streams_applied": load(&self.patch_streams_applied),
                "games_dropped": load(&self.games_dropped),
                "stale_skipped": load(&self.stale_skipped),
                "resyncs_requested": load(&self.resyncs_requested),
                "games_mirrored": load(&self.games_mirrored),
                "games_visible": load(&self.games_visible),
            },
            "session": {
                "alerts_played": load(&self.alerts_played),
                "sessions_launched": load(&self.sessions_launched),
                "session_timeouts": load(&self.session_timeouts),
            },
            "connection": {
                "connected": load(&self.connected) == 1,
                "reconnects": load(&self.reconnects),
            },
            "performance": {
                "apply_time_us": load(&self.apply_time_us),
                "apply_time_p95_us": load(&self.apply_time_p95_us),
                "apply_time_p99_us": load(&self.apply_time_p99_us),
                "apply_time_max_us": load(&self.apply_time_max_us),
                "uptime_seconds": self.uptime_seconds(),
            },
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
#[cfg(feature = "metrics_server")]
pub async fn start_metrics_server(
    metrics: std::sync::Arc<Metrics>,
    port: u16,
) -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = http_response(&metrics, &request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

/// Route one request line to a full HTTP response
#[cfg(feature = "metrics_server")]
fn http_response(metrics: &Metrics, request: &str) -> String {
    let ok = |content_type: &str, body: &str| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    };

    // Longest prefix first
    if request.starts_with("GET /metrics/json") {
        ok("application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ok("text/plain; version=0.0.4", &metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ok("text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}
