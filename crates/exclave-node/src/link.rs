//! Link transport abstraction.
//!
//! The engine only needs two things from the network: a fire-and-forget
//! outbound send to a named address, and an inbound stream of opaque
//! text lines. Delivery is assumed to be eventual, non-duplicating, and
//! non-corrupting; no ordering across peers is required because the
//! protocol's total order is explicit in message content.
//!
//! Production uses [`TcpLink`] (newline-delimited text over TCP); tests
//! use an in-memory channel implementation of the same trait.
//!
//! NOTE: inbound delivery is payload-only. The sender id is parsed from
//! the message itself, never inferred from the connection's peer
//! address, which is not trustworthy for protocol decisions.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tracing::{debug, warn};

/// Outbound half of a point-to-point link.
///
/// `send` is fire-and-forget from the engine's perspective: failures are
/// the transport's concern and the protocol has no retry logic of its
/// own.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Send one payload line to the peer at `to` (an opaque address
    /// string such as `host:port`).
    async fn send(&self, to: &str, payload: String) -> io::Result<()>;
}

/// TCP link: one newline-delimited text line per message.
///
/// Binding starts an accept loop that feeds every received line into
/// the inbound channel. Outbound sends open a short-lived connection
/// per message; the protocol's message rate is a handful of lines per
/// section, so connection reuse is not worth the state.
pub struct TcpLink {
    local: SocketAddr,
}

impl TcpLink {
    /// Bind the local address and start accepting inbound messages.
    ///
    /// Returns the link and the inbound payload stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be bound.
    pub async fn bind(
        local: &str,
        inbound_capacity: usize,
    ) -> io::Result<(Self, mpsc::Receiver<String>)> {
        let listener = TcpListener::bind(local).await?;
        let local = listener.local_addr()?;
        debug!(%local, "link listening");
        let (tx, rx) = mpsc::channel(inbound_capacity);
        tokio::spawn(accept_loop(listener, tx));
        Ok((Self { local }, rx))
    }

    /// Address the accept loop is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[async_trait]
impl Link for TcpLink {
    async fn send(&self, to: &str, payload: String) -> io::Result<()> {
        let mut stream = TcpStream::connect(to).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.shutdown().await
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<String>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stream).lines();
                    loop {
                        match lines.next_line().await {
                            Ok(Some(line)) => {
                                if tx.send(line).await.is_err() {
                                    // Node stopped; drop the connection.
                                    return;
                                }
                            },
                            Ok(None) => return,
                            Err(error) => {
                                warn!(%peer, %error, "inbound connection failed");
                                return;
                            },
                        }
                    }
                });
            },
            Err(error) => {
                warn!(%error, "accept failed");
            },
        }
    }
}
