//! Prometheus-compatible metrics endpoint
//!
//! Exposes match server counters in Prometheus text format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

const SWEEP_HISTORY: usize = 600;

/// Metrics registry for the match server
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub sessions_active: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_ended: AtomicU64,
    pub negotiations_active: AtomicU64,

    // Commands
    pub commands_accepted: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub ai_actions: AtomicU64,

    // Fan-out
    pub connections_active: AtomicU64,
    pub pushes_sent: AtomicU64,
    pub push_failures: AtomicU64,

    // Persistence
    pub persistence_failures: AtomicU64,

    // Sweep timing (microseconds)
    pub sweep_time_us: AtomicU64,
    pub sweep_time_p95_us: AtomicU64,
    pub sweep_time_p99_us: AtomicU64,
    pub sweep_count: AtomicU64,
    pub sessions_advanced: AtomicU64,

    start_time: Instant,
    sweep_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            negotiations_active: AtomicU64::new(0),
            commands_accepted: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            ai_actions: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            pushes_sent: AtomicU64::new(0),
            push_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            sweep_time_us: AtomicU64::new(0),
            sweep_time_p95_us: AtomicU64::new(0),
            sweep_time_p99_us: AtomicU64::new(0),
            sweep_count: AtomicU64::new(0),
            sessions_advanced: AtomicU64::new(0),
            start_time: Instant::now(),
            sweep_history: RwLock::new(VecDeque::with_capacity(SWEEP_HISTORY)),
        }
    }

    /// Record a heartbeat sweep and update percentiles
    pub fn record_sweep(&self, duration: Duration, advanced: usize) {
        let us = duration.as_micros() as u64;
        self.sweep_time_us.store(us, Ordering::Relaxed);
        self.sweep_count.fetch_add(1, Ordering::Relaxed);
        self.sessions_advanced
            .fetch_add(advanced as u64, Ordering::Relaxed);

        let mut history = self.sweep_history.write();
        history.push_back(us);
        while history.len() > SWEEP_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95 = (sorted.len() as f32 * 0.95) as usize;
            let p99 = (sorted.len() as f32 * 0.99) as usize;
            self.sweep_time_p95_us
                .store(sorted[p95.min(sorted.len() - 1)], Ordering::Relaxed);
            self.sweep_time_p99_us
                .store(sorted[p99.min(sorted.len() - 1)], Ordering::Relaxed);
        }
    }

    pub fn record_command(&self, accepted: bool) {
        let counter = if accepted {
            &self.commands_accepted
        } else {
            &self.commands_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("baduk_sessions_active", "Live sessions in memory", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("baduk_sessions_created_total", "Sessions created", "counter",
            self.sessions_created.load(Ordering::Relaxed));
        metric!("baduk_sessions_ended_total", "Sessions that reached a result", "counter",
            self.sessions_ended.load(Ordering::Relaxed));
        metric!("baduk_negotiations_active", "Open negotiations", "gauge",
            self.negotiations_active.load(Ordering::Relaxed));

        metric!("baduk_commands_accepted_total", "Commands applied", "counter",
            self.commands_accepted.load(Ordering::Relaxed));
        metric!("baduk_commands_rejected_total", "Commands rejected without mutation", "counter",
            self.commands_rejected.load(Ordering::Relaxed));
        metric!("baduk_ai_actions_total", "Actions taken by the AI seat", "counter",
            self.ai_actions.load(Ordering::Relaxed));

        metric!("baduk_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("baduk_pushes_sent_total", "Push messages delivered to connections", "counter",
            self.pushes_sent.load(Ordering::Relaxed));
        metric!("baduk_push_failures_total", "Push messages with no live connection", "counter",
            self.push_failures.load(Ordering::Relaxed));
        metric!("baduk_persistence_failures_total", "Failed write-behind saves", "counter",
            self.persistence_failures.load(Ordering::Relaxed));

        metric!("baduk_sweep_time_microseconds", "Last heartbeat sweep duration", "gauge",
            self.sweep_time_us.load(Ordering::Relaxed));
        metric!("baduk_sweep_time_p95_microseconds", "95th percentile sweep duration", "gauge",
            self.sweep_time_p95_us.load(Ordering::Relaxed));
        metric!("baduk_sweep_time_p99_microseconds", "99th percentile sweep duration", "gauge",
            self.sweep_time_p99_us.load(Ordering::Relaxed));
        metric!("baduk_sweep_count", "Heartbeat sweeps run", "counter",
            self.sweep_count.load(Ordering::Relaxed));
        metric!("baduk_sessions_advanced_total", "Sessions changed by a sweep", "counter",
            self.sessions_advanced.load(Ordering::Relaxed));
        metric!("baduk_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
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
                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK".to_string()
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sweep() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_sweep(Duration::from_micros(100 + i * 10), 2);
        }
        assert_eq!(metrics.sweep_count.load(Ordering::Relaxed), 100);
        assert_eq!(metrics.sessions_advanced.load(Ordering::Relaxed), 200);
        assert!(metrics.sweep_time_p99_us.load(Ordering::Relaxed)
            >= metrics.sweep_time_p95_us.load(Ordering::Relaxed));
    }

    #[test]
    fn test_record_command() {
        let metrics = Metrics::new();
        metrics.record_command(true);
        metrics.record_command(false);
        metrics.record_command(false);
        assert_eq!(metrics.commands_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.commands_rejected.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.sessions_active.store(12, Ordering::Relaxed);
        let output = metrics.to_prometheus();
        assert!(output.contains("baduk_sessions_active 12"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE baduk_sweep_count counter"));
    }
}
