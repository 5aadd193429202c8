//! The Connection Pair (spec §4.2): one reader fiber and one writer fiber
//! per connected client, each racing its work against the shutdown signal.

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{LineCodec, Message};
use crate::server::{Inbound, Shutdown};

/// Reads lines off the socket, parses them, and forwards each one to the
/// event loop's inbound inbox. Reports hangups and I/O errors to the dead
/// client inbox so the event loop can run the quit procedure.
pub async fn run_reader(
    mut framed: FramedRead<OwnedReadHalf, LineCodec>,
    client_id: u64,
    inbound_tx: mpsc::Sender<Inbound>,
    dead_tx: mpsc::Sender<u64>,
    mut shutdown: Shutdown,
    _shutdown_complete: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            next = framed.next() => {
                match next {
                    Some(Ok(message)) => {
                        tokio::select! {
                            _ = inbound_tx.send(Inbound { client_id, message }) => {}
                            _ = shutdown.recv() => {
                                return;
                            }
                        }
                    }
                    Some(Err(error)) => {
                        tracing::debug!(client_id, %error, "read error");
                        tokio::select! {
                            _ = dead_tx.send(client_id) => {}
                            _ = shutdown.recv() => {}
                        }
                        return;
                    }
                    None => {
                        tracing::debug!(client_id, "client closed connection");
                        tokio::select! {
                            _ = dead_tx.send(client_id) => {}
                            _ = shutdown.recv() => {}
                        }
                        return;
                    }
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

/// Drains the client's outbox onto the socket until the event loop drops
/// its sender (closing the channel), then half-closes the socket.
pub async fn run_writer(
    mut framed: FramedWrite<OwnedWriteHalf, LineCodec>,
    mut outbox: mpsc::Receiver<Message>,
    client_id: u64,
    dead_tx: mpsc::Sender<u64>,
    mut shutdown: Shutdown,
    _shutdown_complete: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            message = outbox.recv() => {
                match message {
                    Some(message) => {
                        if let Err(error) = framed.send(message).await {
                            tracing::debug!(client_id, %error, "write error");
                            tokio::select! {
                                _ = dead_tx.send(client_id) => {}
                                _ = shutdown.recv() => {}
                            }
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                // Keep draining whatever is already queued so the client
                // sees its QUIT/ERROR lines before the socket closes.
                while let Ok(message) = outbox.try_recv() {
                    let _ = framed.send(message).await;
                }
                break;
            }
        }
    }

    let mut socket = framed.into_inner();
    use tokio::io::AsyncWriteExt;
    let _ = socket.shutdown().await;
}
