//! Module that contains the peer descriptors and the outbound side of the network.

use crate::{error::TransportError, log, ProcessId};
use color_print::cformat;
use futures::SinkExt;
use std::{collections::HashMap, error::Error, fmt, str::FromStr, time::Duration};
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{sleep, timeout},
};
use tokio_util::codec::{Framed, LinesCodec};

/// Static description of another process. The local process is never part of its own peer list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: ProcessId,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(id: ProcessId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.host, self.port)
    }
}

/// Parses the `id:host:port` descriptor used on the command line.
impl FromStr for Peer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(id), Some(host), Some(port)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected `id:host:port`, got `{s}`"));
        };

        let id = id
            .parse()
            .map_err(|_| format!("invalid peer id `{id}` in `{s}`"))?;
        let port = port
            .parse()
            .map_err(|_| format!("invalid port `{port}` in `{s}`"))?;
        if host.is_empty() {
            return Err(format!("missing host in `{s}`"));
        }

        Ok(Self::new(id, host, port))
    }
}

/// Outbound half of the network as seen by the protocol core.
///
/// `send` must not block: the core calls it from inside the serialized actor. Lines sent to the
/// same peer must be delivered in the order they were sent.
pub trait PeerTransport: Send + Sync {
    fn send(&self, peer: &Peer, line: String) -> Result<(), TransportError>;
}

/// Transport that keeps one long-lived TCP connection per peer.
///
/// Each peer gets a queue drained by its own writer task, so lines to one peer leave in order
/// and a slow peer never holds up the others.
pub struct TcpTransport {
    queues: HashMap<ProcessId, UnboundedSender<String>>,
}

impl TcpTransport {
    /// Function that spawns one writer task per peer. Must be called from inside a tokio runtime.
    pub fn new(peers: &[Peer]) -> Self {
        let queues = peers
            .iter()
            .map(|peer| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(Self::write_to_peer(peer.clone(), rx));
                (peer.id, tx)
            })
            .collect();

        Self { queues }
    }

    async fn write_to_peer(peer: Peer, mut queue: UnboundedReceiver<String>) {
        let mut connection: Option<Framed<TcpStream, LinesCodec>> = None;

        while let Some(line) = queue.recv().await {
            if connection.is_none() {
                match TcpStream::connect(peer.address()).await {
                    Ok(stream) => connection = Some(Framed::new(stream, LinesCodec::new())),
                    Err(e) => {
                        log::warn(&cformat!(
                            "Couldn't connect to peer <bold>{}</bold>, dropping `{line}`: {e}",
                            peer.id
                        ));
                        continue;
                    }
                }
            }

            if let Some(lines) = connection.as_mut() {
                if let Err(e) = lines.send(line.as_str()).await {
                    log::warn(&cformat!(
                        "Couldn't send to peer <bold>{}</bold>, dropping `{line}`: {e}",
                        peer.id
                    ));
                    connection = None;
                }
            }
        }
    }
}

impl PeerTransport for TcpTransport {
    fn send(&self, peer: &Peer, line: String) -> Result<(), TransportError> {
        self.queues
            .get(&peer.id)
            .ok_or(TransportError::UnknownPeer(peer.id))?
            .send(line)
            .map_err(|_| TransportError::Closed(peer.id))
    }
}

/// Function that blocks until every peer accepts a TCP connection.
pub async fn wait_for_peers(
    peers: &[Peer],
    connect_timeout: Duration,
    retry_interval: Duration,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if peers.is_empty() {
        return Ok(());
    }

    log::info("Waiting for peers to become available...");

    loop {
        let mut missing = None;
        for peer in peers {
            match timeout(connect_timeout, TcpStream::connect(peer.address())).await {
                Ok(Ok(_)) => {}
                _ => {
                    missing = Some(peer.id);
                    break;
                }
            }
        }

        match missing {
            None => break,
            Some(id) => {
                log::info(&cformat!(
                    "Peer <bold>{id}</bold> is not ready yet, waiting..."
                ));
                sleep(retry_interval).await;
            }
        }
    }

    log::info(&cformat!("All <bold>{}</bold> peers are ready!", peers.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor() {
        let peer: Peer = "2:localhost:8002".parse().unwrap();
        assert_eq!(peer, Peer::new(2, "localhost", 8002));
        assert_eq!(peer.address(), "localhost:8002");
        assert_eq!(peer.to_string(), "2:localhost:8002");
    }

    #[test]
    fn rejects_bad_descriptors() {
        assert!("2:localhost".parse::<Peer>().is_err());
        assert!("x:localhost:8002".parse::<Peer>().is_err());
        assert!("2:localhost:port".parse::<Peer>().is_err());
        assert!("2::8002".parse::<Peer>().is_err());
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let transport = TcpTransport::new(&[]);
        let result = transport.send(&Peer::new(4, "localhost", 1), "REPLY 1 1".into());
        assert!(matches!(result, Err(TransportError::UnknownPeer(4))));
    }
}
