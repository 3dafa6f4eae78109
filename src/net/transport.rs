//! WebTransport server implementation
//!
//! One bidirectional stream per connection carries length-prefixed JSON
//! both ways: commands and their replies, plus server pushes. Pushes are
//! queued on a per-connection channel and written by a dedicated task so
//! the engine never waits on a slow client.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::engine::{EngineError, MatchEngine};
use crate::game::error::ErrorKind;
use crate::game::state::UserId;
use crate::metrics::Metrics;
use crate::net::broadcast::ConnectionRegistry;
#[cfg(feature = "dos_ratelimit")]
use crate::net::dos_protection::DoSError;
use crate::net::dos_protection::{ConnectionGuard, ConnectionId, DoSConfig};
use crate::net::framing::{encode_frame, read_message, write_frame, FramingError};
use crate::net::protocol::{
    decode_command, ClientCommand, ClientResponse, CommandReply, LobbyCommand, ServerMessage,
};
use crate::net::tls::TlsConfig;
use crate::util::time::now_millis;

struct Outbox {
    conn: ConnectionId,
    tx: UnboundedSender<Vec<u8>>,
}

/// Identity -> outbound queue of its live connection
#[derive(Default)]
pub struct Connections {
    outboxes: RwLock<HashMap<UserId, Outbox>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to a connection. A newer connection replaces an older one.
    pub fn register(&self, user: UserId, conn: ConnectionId, tx: UnboundedSender<Vec<u8>>) {
        if let Some(old) = self.outboxes.write().insert(user, Outbox { conn, tx }) {
            if old.conn != conn {
                tracing::info!("User {} moved from conn {} to conn {}", user, old.conn, conn);
            }
        }
    }

    /// Unbind `user` if `conn` is still the one bound. True if it was.
    pub fn unregister(&self, user: UserId, conn: ConnectionId) -> bool {
        let mut outboxes = self.outboxes.write();
        match outboxes.get(&user) {
            Some(outbox) if outbox.conn == conn => {
                outboxes.remove(&user);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.outboxes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.read().is_empty()
    }
}

impl ConnectionRegistry for Connections {
    fn push(&self, user: UserId, message: &ServerMessage) -> bool {
        let outboxes = self.outboxes.read();
        let Some(outbox) = outboxes.get(&user) else {
            return false;
        };
        match encode_frame(message) {
            Ok(frame) => outbox.tx.send(frame).is_ok(),
            Err(e) => {
                tracing::warn!("Failed to encode {} for {}: {}", message.tag(), user, e);
                false
            }
        }
    }

    fn connected_users(&self) -> Vec<UserId> {
        self.outboxes.read().keys().copied().collect()
    }
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    engine: Arc<MatchEngine>,
    connections: Arc<Connections>,
    guard: Arc<Mutex<ConnectionGuard>>,
    metrics: Arc<Metrics>,
}

impl WebTransportServer {
    pub async fn new(
        config: ServerConfig,
        engine: Arc<MatchEngine>,
        connections: Arc<Connections>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;
        let guard = Arc::new(Mutex::new(ConnectionGuard::new(DoSConfig::from(&config))));

        Ok(Self {
            config,
            tls_config,
            engine,
            connections,
            guard,
            metrics,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        &self.tls_config.cert_hash
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;
        use wtransport::ServerConfig;

        let bind_addr = self.bind_addr();
        let server_config = ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;

        tracing::info!("WebTransport server listening on {}", bind_addr);

        start_sweep_loop(
            self.engine.clone(),
            self.guard.clone(),
            Duration::from_millis(self.config.sweep_interval_ms),
        );

        loop {
            let incoming = server.accept().await;
            let ctx = ConnectionContext {
                engine: self.engine.clone(),
                connections: self.connections.clone(),
                guard: self.guard.clone(),
                metrics: self.metrics.clone(),
            };

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, ctx).await {
                    tracing::warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Periodic deadline resolution for sessions nobody is talking to
fn start_sweep_loop(engine: Arc<MatchEngine>, guard: Arc<Mutex<ConnectionGuard>>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let engine = engine.clone();
            match tokio::task::spawn_blocking(move || engine.sweep(now_millis())).await {
                Ok(0) => {}
                Ok(advanced) => tracing::debug!("Sweep advanced {} sessions", advanced),
                Err(e) => tracing::error!("Sweep task failed: {}", e),
            }
            let pruned = guard.lock().prune_bans(Instant::now());
            if pruned > 0 {
                tracing::debug!("Lifted {} expired bans", pruned);
            }
        }
    });
}

struct ConnectionContext {
    engine: Arc<MatchEngine>,
    connections: Arc<Connections>,
    guard: Arc<Mutex<ConnectionGuard>>,
    metrics: Arc<Metrics>,
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    ctx: ConnectionContext,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    tracing::debug!(
        "Session request from {}, path: {}",
        session_request.authority(),
        session_request.path()
    );
    let connection = session_request.accept().await?;
    let client_ip = connection.remote_address().ip();

    let conn_id = match ctx.guard.lock().admit(client_ip, Instant::now()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Connection from {} rejected: {}", client_ip, e);
            return Err(anyhow::anyhow!("Connection rejected: {}", e));
        }
    };
    ctx.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("Connection accepted from {} (conn_id: {})", client_ip, conn_id);

    let result = serve_stream(&connection, conn_id, &ctx).await;

    ctx.guard.lock().release(conn_id);
    ctx.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!("Connection {} closed", conn_id);
    result
}

async fn serve_stream(
    connection: &wtransport::Connection,
    conn_id: ConnectionId,
    ctx: &ConnectionContext,
) -> anyhow::Result<()> {
    let (mut send, mut recv) = connection.accept_bi().await?;
    let (tx, mut rx) = unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut send, &frame).await {
                tracing::debug!("Stream write error: {}", e);
                break;
            }
        }
    });

    let mut bound: Option<UserId> = None;
    loop {
        let body = match read_message(&mut recv).await {
            Ok(body) => body,
            Err(FramingError::ConnectionClosed) => break,
            Err(e) => {
                tracing::debug!("Stream read error on conn {}: {}", conn_id, e);
                break;
            }
        };

        #[cfg(feature = "dos_ratelimit")]
        {
            let check = ctx.guard.lock().check_command(conn_id, body.len(), Instant::now());
            match check {
                Ok(()) => {}
                Err(DoSError::ViolationLimitExceeded) => {
                    tracing::warn!("Too many violations, disconnecting conn_id: {}", conn_id);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Dropped command on conn {}: {}", conn_id, e);
                    reply(&tx, CommandReply::err(None, e, ErrorKind::Validation));
                    continue;
                }
            }
        }

        let envelope = match decode_command(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Failed to decode command on conn {}: {}", conn_id, e);
                reply(&tx, CommandReply::err(None, e, ErrorKind::Validation));
                continue;
            }
        };
        let request_id = envelope.request_id;

        let response = match (envelope.command, bound) {
            (ClientCommand::Lobby(LobbyCommand::Hello { user_id, nickname }), None) => {
                let engine = ctx.engine.clone();
                let result =
                    tokio::task::spawn_blocking(move || engine.connect(user_id, &nickname)).await?;
                result.map(|user| {
                    ctx.connections.register(user.id, conn_id, tx.clone());
                    bound = Some(user.id);
                    ClientResponse::User { user }
                })
            }
            (_, None) => Err(EngineError::NotIdentified),
            (command, Some(user)) => {
                let engine = ctx.engine.clone();
                tokio::task::spawn_blocking(move || {
                    engine.handle_command(user, command, now_millis())
                })
                .await?
            }
        };

        let command_reply = match response {
            Ok(response) => CommandReply::ok(request_id, response),
            Err(e) => CommandReply::err(request_id, &e, e.kind()),
        };
        reply(&tx, command_reply);
    }

    if let Some(user) = bound {
        if ctx.connections.unregister(user, conn_id) {
            let engine = ctx.engine.clone();
            tokio::task::spawn_blocking(move || engine.disconnect(user, now_millis())).await?;
        }
    }
    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn reply(tx: &UnboundedSender<Vec<u8>>, reply: CommandReply) {
    match encode_frame(&ServerMessage::CommandResult(reply)) {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => tracing::warn!("Failed to encode command result: {}", e),
    }
}
