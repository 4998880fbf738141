//! Bidirectional console bridging.
//!
//! A [`ConsoleChannel`] is a pair of bounded byte pipes bound to a domain's
//! console stream. [`bridge`] pumps it against an external full-duplex
//! transport (the API layer uses a WebSocket) with first-exit semantics:
//! when either direction ends - transport closed, hypervisor stream error,
//! channel dropped - the whole session tears down.
//!
//! Both pipes have capacity one, so a blocked writer naturally pauses its
//! reader; there are no internal unbounded queues.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read chunk size for both directions.
pub const CONSOLE_CHUNK: usize = 1024;

/// The external-facing side of a console session.
pub struct ConsoleChannel {
    /// Bytes flowing console → external
    pub output: mpsc::Receiver<Bytes>,
    /// Bytes flowing external → console
    pub input: mpsc::Sender<Bytes>,
}

/// The hypervisor-facing side of a console session.
pub struct ConsoleEndpoints {
    /// Sink for bytes read from the domain console
    pub to_external: mpsc::Sender<Bytes>,
    /// Source of bytes to write to the domain console
    pub from_external: mpsc::Receiver<Bytes>,
}

/// Create the bounded pipe pair backing one console session.
pub fn channel_pair() -> (ConsoleChannel, ConsoleEndpoints) {
    let (out_tx, out_rx) = mpsc::channel(1);
    let (in_tx, in_rx) = mpsc::channel(1);
    (
        ConsoleChannel {
            output: out_rx,
            input: in_tx,
        },
        ConsoleEndpoints {
            to_external: out_tx,
            from_external: in_rx,
        },
    )
}

/// An external full-duplex byte transport.
#[async_trait]
pub trait ConsoleTransport: Send {
    /// Send bytes to the external peer. Errors terminate the session.
    async fn send(&mut self, data: Bytes) -> std::io::Result<()>;

    /// Receive bytes from the external peer. `None` means the peer closed.
    async fn recv(&mut self) -> Option<std::io::Result<Bytes>>;
}

/// Pump a console channel against an external transport until either side
/// terminates.
///
/// Dropping the channel on return signals the hypervisor side to release its
/// stream.
pub async fn bridge<T: ConsoleTransport>(mut channel: ConsoleChannel, mut transport: T) {
    loop {
        tokio::select! {
            outbound = channel.output.recv() => {
                match outbound {
                    Some(data) => {
                        if let Err(e) = transport.send(data).await {
                            warn!(error = %e, "Console transport write failed");
                            break;
                        }
                    }
                    // Hypervisor stream ended
                    None => break,
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Some(Ok(data)) => {
                        if channel.input.send(data).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Console transport read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    debug!("Console session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// In-memory transport for exercising the bridge.
    struct PipeTransport {
        tx: mpsc::Sender<Bytes>,
        rx: mpsc::Receiver<Bytes>,
    }

    fn pipe_transport() -> (PipeTransport, mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        let (peer_tx, rx) = mpsc::channel(8);
        let (tx, peer_rx) = mpsc::channel(8);
        (PipeTransport { tx, rx }, peer_tx, peer_rx)
    }

    #[async_trait]
    impl ConsoleTransport for PipeTransport {
        async fn send(&mut self, data: Bytes) -> std::io::Result<()> {
            self.tx
                .send(data)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))
        }

        async fn recv(&mut self) -> Option<std::io::Result<Bytes>> {
            self.rx.recv().await.map(Ok)
        }
    }

    /// Guest side that prints a banner and then echoes input.
    fn spawn_echo_guest(mut endpoints: ConsoleEndpoints) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let _ = endpoints
                .to_external
                .send(Bytes::from_static(b"login: "))
                .await;
            while let Some(data) = endpoints.from_external.recv().await {
                if endpoints.to_external.send(data).await.is_err() {
                    break;
                }
            }
        })
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let (channel, endpoints) = channel_pair();
        let guest = spawn_echo_guest(endpoints);
        let (transport, peer_tx, mut peer_rx) = pipe_transport();

        let session = tokio::spawn(bridge(channel, transport));

        let banner = peer_rx.recv().await.unwrap();
        assert_eq!(&banner[..], b"login: ");

        peer_tx.send(Bytes::from_static(b"0123456789abcdef")).await.unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(1), peer_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed[..], b"0123456789abcdef");

        // Closing the external side tears the whole session down
        drop(peer_tx);
        drop(peer_rx);
        tokio::time::timeout(Duration::from_millis(500), session)
            .await
            .expect("bridge should stop when the transport closes")
            .unwrap();
        tokio::time::timeout(Duration::from_millis(500), guest)
            .await
            .expect("guest side should observe channel closure")
            .unwrap();
    }

    #[tokio::test]
    async fn hypervisor_side_termination_stops_bridge() {
        let (channel, endpoints) = channel_pair();
        let (transport, _peer_tx, _peer_rx) = pipe_transport();

        let session = tokio::spawn(bridge(channel, transport));

        // Dropping the endpoints emulates a hypervisor-side stream error
        drop(endpoints);

        tokio::time::timeout(Duration::from_millis(500), session)
            .await
            .expect("bridge should stop when the console stream ends")
            .unwrap();
    }
}
