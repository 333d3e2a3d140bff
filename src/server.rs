use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{info, warn};

use crate::config::{BridgeConfig, ChannelConfig};
use crate::process_manager::ProcessManager;
use crate::protocol::{
    error_frame, parse_frame_text, parse_request, success_frame, ChannelProtocol, CommandProtocol,
    DispatchOutcome, StatusProtocol,
};

/// Command-channel state surfaced through the status channel, so a page
/// can diagnose missing or invalid certificate material before ever
/// touching the TLS endpoint.
#[derive(Default)]
pub struct ChannelHealth {
    command_listening: AtomicBool,
    command_port: AtomicU32,
    last_command_error: Mutex<Option<String>>,
}

impl ChannelHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_command_bound(&self, port: u16) {
        self.command_listening.store(true, Ordering::SeqCst);
        self.command_port.store(u32::from(port), Ordering::SeqCst);
        let mut guard = self.last_command_error.lock().await;
        *guard = None;
    }

    pub async fn record_command_failure(&self, message: String) {
        self.command_listening.store(false, Ordering::SeqCst);
        let mut guard = self.last_command_error.lock().await;
        *guard = Some(message);
    }

    pub async fn snapshot(&self) -> Value {
        let port = self.command_port.load(Ordering::SeqCst);
        let last_error = { self.last_command_error.lock().await.clone() };
        json!({
            "listening": self.command_listening.load(Ordering::SeqCst),
            "port": if port == 0 { Value::Null } else { Value::from(port) },
            "last_error": last_error,
        })
    }
}

/// Owns both channel listeners and drives them from one cooperative
/// reactor. The status channel binds first and stays reachable even when
/// the command channel cannot come up, so certificate problems are
/// diagnosable instead of silently fatal.
pub struct BridgeServer {
    config: BridgeConfig,
    manager: Arc<dyn ProcessManager>,
    health: Arc<ChannelHealth>,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig, manager: Arc<dyn ProcessManager>) -> Self {
        Self {
            config,
            manager,
            health: Arc::new(ChannelHealth::new()),
        }
    }

    pub fn health(&self) -> Arc<ChannelHealth> {
        self.health.clone()
    }

    pub async fn run_forever(&self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let queue_capacity = self.config.server.event_queue_capacity.max(8);
        let host = self.config.server.bind_host.clone();

        let status_channel = self.config.status_channel();
        let status_listener = TcpListener::bind((host.as_str(), status_channel.port))
            .await
            .with_context(|| {
                format!(
                    "failed binding status channel listener on {host}:{}",
                    status_channel.port
                )
            })?;
        let status_addr = status_listener
            .local_addr()
            .context("failed reading status channel address")?;
        info!("status channel listening on ws://{status_addr}");
        let status_protocol: Arc<dyn ChannelProtocol> =
            Arc::new(StatusProtocol::new(self.health.clone()));

        let command = match self.bind_command_channel(&host).await {
            Ok((listener, acceptor)) => {
                let addr = listener
                    .local_addr()
                    .context("failed reading command channel address")?;
                info!("command channel listening on wss://{addr}");
                self.health.record_command_bound(addr.port()).await;
                Some((listener, acceptor))
            }
            Err(err) => {
                warn!("command channel unavailable, bridge is status-only: {err:#}");
                self.health.record_command_failure(format!("{err:#}")).await;
                None
            }
        };
        let (command_listener, command_acceptor) = match command {
            Some((listener, acceptor)) => (Some(listener), Some(acceptor)),
            None => (None, None),
        };
        let command_protocol: Arc<dyn ChannelProtocol> =
            Arc::new(CommandProtocol::new(self.manager.clone()));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = status_listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let protocol = status_protocol.clone();
                        tokio::spawn(async move {
                            if let Err(err) =
                                handle_plain_connection(stream, remote_addr, protocol, queue_capacity).await
                            {
                                warn!("status channel connection failed: {err:#}");
                            }
                        });
                    }
                    Err(err) => warn!("status channel accept failed: {err}"),
                },
                accepted = accept_on(command_listener.as_ref()) => match accepted {
                    Ok((stream, remote_addr)) => {
                        if let Some(acceptor) = command_acceptor.clone() {
                            let protocol = command_protocol.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_tls_connection(
                                    stream,
                                    remote_addr,
                                    acceptor,
                                    protocol,
                                    queue_capacity,
                                )
                                .await
                                {
                                    warn!("command channel connection failed: {err:#}");
                                }
                            });
                        }
                    }
                    Err(err) => warn!("command channel accept failed: {err}"),
                },
            }
        }

        Ok(())
    }

    async fn bind_command_channel(&self, host: &str) -> Result<(TcpListener, TlsAcceptor)> {
        let ChannelConfig { port, tls } = self.config.command_channel();
        let tls = tls.ok_or_else(|| anyhow!("command channel requires TLS material"))?;
        let acceptor = load_tls_acceptor(&tls.key_path, &tls.cert_path)?;
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed binding command channel listener on {host}:{port}"))?;
        Ok((listener, acceptor))
    }
}

fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Builds the TLS context from PEM key + certificate files. Both files
/// must be present and parseable for the command channel to bind.
pub fn load_tls_acceptor(key_path: &Path, cert_path: &Path) -> Result<TlsAcceptor> {
    ensure_crypto_provider();

    let cert_file = File::open(cert_path)
        .with_context(|| format!("failed opening TLS certificate {}", cert_path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed parsing TLS certificate {}", cert_path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", cert_path.display());
    }

    let key_file = File::open(key_path)
        .with_context(|| format!("failed opening TLS key {}", key_path.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("failed parsing TLS key {}", key_path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", key_path.display()))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed building TLS server context")?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

async fn accept_on(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn handle_plain_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    protocol: Arc<dyn ChannelProtocol>,
    queue_capacity: usize,
) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("websocket upgrade failed for {remote_addr}"))?;
    drive_session(ws, remote_addr, protocol, queue_capacity).await
}

async fn handle_tls_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    acceptor: TlsAcceptor,
    protocol: Arc<dyn ChannelProtocol>,
    queue_capacity: usize,
) -> Result<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .with_context(|| format!("TLS handshake failed for {remote_addr}"))?;
    let ws = accept_async(tls_stream)
        .await
        .with_context(|| format!("websocket upgrade failed for {remote_addr}"))?;
    drive_session(ws, remote_addr, protocol, queue_capacity).await
}

/// Reads frames off one connection and dispatches every request on its
/// own task, responses funneled through a bounded outbound queue. A slow
/// toolkit command must never stall the reactor or other requests on the
/// same connection.
async fn drive_session<S>(
    ws: WebSocketStream<S>,
    remote_addr: SocketAddr,
    protocol: Arc<dyn ChannelProtocol>,
    queue_capacity: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let channel = protocol.channel_name();
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(queue_capacity);
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(inbound) = read.next().await {
        let inbound = inbound.context("websocket inbound error")?;
        match inbound {
            Message::Text(text) => {
                let frame = match parse_frame_text(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("invalid JSON frame on {channel} channel from {remote_addr}: {err}");
                        continue;
                    }
                };
                let Some(request) = parse_request(&frame) else {
                    warn!("non-request frame on {channel} channel from {remote_addr}");
                    continue;
                };

                let protocol = protocol.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let response = match protocol.handle_request(&request).await {
                        DispatchOutcome::Handled(result) => success_frame(&request.id, result),
                        DispatchOutcome::Error { code, message } => {
                            error_frame(&request.id, code, &message)
                        }
                        DispatchOutcome::NotHandled => error_frame(
                            &request.id,
                            400,
                            &format!("unknown method: {}", request.method),
                        ),
                    };
                    let _ = out_tx.send(Message::Text(response.to_string())).await;
                });
            }
            Message::Ping(payload) => {
                let _ = out_tx.try_send(Message::Pong(payload));
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
