//! Module that contains the inbound side of the network.

use crate::log;
use color_print::cformat;
use futures::StreamExt;
use std::{error::Error, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};

/// Receives every line read from any peer connection. Must return quickly: it runs on the
/// connection's reader task.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_message(&self, line: String);
}

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub async fn bind(address: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Box<dyn Error + Send + Sync>> {
        Ok(self.listener.local_addr()?)
    }

    async fn handle<H: InboundHandler>(
        stream: TcpStream,
        address: SocketAddr,
        handler: Arc<H>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut lines = Framed::new(stream, LinesCodec::new());

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => handler.on_message(line),
                Err(e) => {
                    log::warn(&cformat!(
                        "Dropping connection from <bold>{address}</bold>: {e}"
                    ));
                    break;
                }
            }
        }

        Ok(())
    }

    /// Function that accepts connections forever, reading each on its own task.
    pub async fn run<H: InboundHandler>(
        self,
        handler: H,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let handler = Arc::new(handler);

        loop {
            let (peer_stream, peer_address) = self.listener.accept().await?;
            log::debug(&cformat!(
                "Accepted a <bold>connection</bold> from {peer_address}."
            ));

            let handler = handler.clone();
            let _handle = tokio::spawn(async move {
                if let Err(e) = Self::handle(peer_stream, peer_address, handler).await {
                    log::error(&format!("{e}"));
                };
            });
        }
    }
}
