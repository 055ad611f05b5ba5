//! TCP relay server example
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                  # binds to 0.0.0.0:9000
//!   cargo run --example relay_server 127.0.0.1:9001   # binds to 127.0.0.1:9001
//!   RUST_LOG=nomux_relay=debug cargo run --example relay_server
//!
//! ## Framing
//!
//! Every message from the sender is a 4-byte big-endian length followed by
//! that many bytes. The first message is the RTMP destination URL in UTF-8;
//! every following message is one NoMux packet.
//!
//! The server answers with newline-terminated status lines:
//!
//! ```text
//! ready
//! live,301,30,1536,10.03,1254.2,1,120,100
//! stopped,no activity
//! ```
//!
//! ffmpeg must be on the PATH.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use nomux_relay::registry::{RegistryConfig, SessionRegistry, StreamKey};
use nomux_relay::session::{RelayConfig, RelayEvent, RelayEventKind};
use nomux_relay::Error;

/// Largest accepted message; NoMux packets are far smaller
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:9000".to_string())
        .parse()?;

    let relay = RelayConfig::default().inactivity_timeout(Duration::from_secs(30));
    let registry = SessionRegistry::with_config(
        RegistryConfig::default()
            .relay(relay)
            .max_sessions(16),
    );
    let cleanup = registry.spawn_cleanup_task();

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Relay server listening");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        _ = accept_loop(&listener, &registry) => {}
    }

    cleanup.abort();
    registry.stop_all().await;
    Ok(())
}

async fn accept_loop(listener: &TcpListener, registry: &Arc<SessionRegistry>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, peer_addr, registry).await {
                        tracing::debug!(peer = %peer_addr, error = %e, "Connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Option<Bytes>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf.freeze()))
}

async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true)?;
    let (mut reader, writer) = socket.into_split();

    let Some(url) = read_frame(&mut reader).await? else {
        return Ok(());
    };
    let key = StreamKey::new(String::from_utf8(url.to_vec())?.trim().to_string());

    let (session, created) = registry.get_or_create(&key).await?;
    tracing::info!(
        peer = %peer_addr,
        stream = %key,
        session_id = session.id(),
        created = created,
        "Sender connected"
    );

    let status_task = tokio::spawn(forward_status(session.subscribe(), writer));

    // Stop reading once the session ends on its own
    let stopped = Arc::new(Notify::new());
    let listener = {
        let stopped = Arc::clone(&stopped);
        session
            .events()
            .subscribe(RelayEventKind::Stopped, move |_| stopped.notify_one())
    };

    while !session.is_stopped() {
        let packet = tokio::select! {
            _ = stopped.notified() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Read failed");
                    break;
                }
            },
        };
        match session.feed(packet).await {
            Ok(_) => {}
            Err(Error::Protocol(_)) => {}
            Err(Error::SessionStopped) => break,
            Err(e) => {
                tracing::warn!(peer = %peer_addr, error = %e, "Relay failed");
                break;
            }
        }
    }

    tracing::info!(peer = %peer_addr, stream = %key, "Sender disconnected");
    session.events().unsubscribe(listener);
    session.stop().await;
    let _ = status_task.await;
    Ok(())
}

/// Write status lines to the sender until the session stops
async fn forward_status(
    mut events: tokio::sync::mpsc::UnboundedReceiver<RelayEvent>,
    mut writer: OwnedWriteHalf,
) {
    while let Some(event) = events.recv().await {
        let last = matches!(event, RelayEvent::Stopped(_));
        if let Some(line) = event.status_line() {
            if writer.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
        }
        if last {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
