//! TCP server implementation.

use crate::config::Config;
use crate::database::Database;
use crate::error::ServerError;
use crate::handler::Handler;
use crate::session::Session;
use dnpwire_link::{Link, LinkError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed to write one response.
    pub response_timeout: Duration,
    /// Noise tolerated per received message.
    pub max_resync_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            response_timeout: config.network.response_timeout(),
            max_resync_bytes: config.network.max_resync_bytes,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub discarded_bytes: AtomicU64,
}

/// Outstation TCP server.
pub struct Server {
    config: ServerConfig,
    handler: Arc<Handler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Handler) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Builds the database, handler and server described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let db = Arc::new(Database::new(&config.points));
        let handler = Handler::new(db, config.station.clone());
        Self::new(ServerConfig::from_config(config), handler)
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves masters connecting to `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Outstation {} listening on {}",
            self.handler.station().address,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    handler,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                match result {
                                    Err(e) if !e.is_disconnect() => {
                                        tracing::warn!("Connection {} error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(e) => tracing::debug!("Connection {} ended: {}", addr, e),
                                    Ok(()) => {}
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Master disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Runs one master session until it disconnects, idles out or the
    /// server shuts down.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<Handler>,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true).ok();
        let mut session = Session::new(addr);
        tracing::info!("Master connected: {} (session {})", addr, session.id);

        // The receive timeout doubles as the idle timeout.
        let mut link = Link::new(stream)
            .with_timeout(Some(config.idle_timeout))
            .with_max_resync_bytes(config.max_resync_bytes);

        loop {
            let before = link.stats().discarded_bytes;
            let received = tokio::select! {
                received = link.receive() => received,
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            };

            let mut request = match received {
                Ok(request) => request,
                Err(LinkError::Timeout) => {
                    tracing::debug!("[{}] Idle timeout", addr);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            let discarded = link.stats().discarded_bytes.saturating_sub(before);
            if discarded > 0 {
                stats.discarded_bytes.fetch_add(discarded, Ordering::Relaxed);
            }

            if !handler.accepts(&request) {
                tracing::warn!(
                    "[{}] Ignoring {:?} from {} to {}",
                    addr,
                    request.control,
                    request.source,
                    request.dest
                );
                continue;
            }

            stats.requests_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "[{}] Request: {:?} (seq={}, {} bytes)",
                addr,
                request.control,
                request.application_seq,
                request.user_data().len()
            );

            let Some(mut response) = handler.handle(&mut session, &mut request) else {
                continue;
            };

            tokio::time::timeout(config.response_timeout, link.send(&mut response))
                .await
                .map_err(|_| ServerError::ResponseTimeout)??;
            tracing::debug!(
                "[{}] Response: {} bytes, indicators {:?}",
                addr,
                response.wire().len(),
                response.indicators.names()
            );
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}
