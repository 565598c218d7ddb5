//! ---
//! ezmb_section: "05-networking-external-interfaces"
//! ezmb_subsection: "binary"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "TCP listener and per-connection pumps."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
use std::future::Future;
use std::net::SocketAddr;

use ezmb_logging::{ezmb_debug, ezmb_info, ezmb_warn, hex_dump, LogContext};
use ezmb_plugin::Direction;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{enabled, info, warn, Level};

use crate::context::GatewayContext;

const READ_BUFFER: usize = 10 * 1024;

/// Accept clients until `shutdown` resolves.
pub async fn serve(listener: TcpListener, ctx: GatewayContext, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_client(stream, peer, ctx.clone()));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
            _ = &mut shutdown => break,
        }
    }
    info!("listener stopped");
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, ctx: GatewayContext) {
    let peer_label = peer.to_string();
    let log_ctx = LogContext::new()
        .with_uid(ctx.endpoint().id())
        .with_device(&peer_label);
    let mut outbound = ctx.subscribe_clients();
    ezmb_info!(
        context = log_ctx,
        "client connected ({} total)",
        ctx.connected_clients()
    );

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    ezmb_info!(context = log_ctx, "connection closed");
                    break;
                }
                Ok(n) => {
                    ezmb_debug!(context = log_ctx, "client -> bus, {} bytes", n);
                    if enabled!(Level::DEBUG) {
                        ezmb_debug!(context = log_ctx, "\n{}", hex_dump(&buf[..n]));
                    }
                    ctx.stage(Direction::South, buf[..n].to_vec());
                }
                Err(err) => {
                    ezmb_warn!(context = log_ctx, "connection error: {}", err);
                    break;
                }
            },
            message = outbound.recv() => match message {
                Ok(bytes) => {
                    if let Err(err) = writer.write_all(&bytes).await {
                        ezmb_warn!(context = log_ctx, "write to client failed: {}", err);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    ezmb_warn!(context = log_ctx, "client lagging; skipped {} payloads", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
