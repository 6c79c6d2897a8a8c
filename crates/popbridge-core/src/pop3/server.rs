//! POP3 Server
//!
//! Accepts plain or TLS-wrapped connections and runs one session per
//! connection on its own task.

use super::codec::Pop3Codec;
use super::response::{Pop3Response, Response};
use super::session::Pop3Session;
use crate::auth::CredentialVerifier;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use popbridge_common::Config;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// POP3 server configuration
#[derive(Debug, Clone)]
pub struct Pop3Config {
    /// Listen address and port
    pub bind: String,
    /// Server name for greeting
    pub server_name: String,
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            bind: "localhost:110".to_string(),
            server_name: "popbridge".to_string(),
        }
    }
}

impl Pop3Config {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind: config.bind_address(),
            server_name: config.server.server_name.clone(),
        }
    }
}

/// POP3 Server
pub struct Pop3Server<V: CredentialVerifier> {
    config: Pop3Config,
    verifier: Arc<V>,
    tls: Option<TlsAcceptor>,
}

impl<V: CredentialVerifier> Pop3Server<V> {
    /// Create a new POP3 server
    pub fn new(config: Pop3Config, verifier: V) -> Self {
        Self {
            config,
            verifier: Arc::new(verifier),
            tls: None,
        }
    }

    /// Wrap every connection in TLS from the first byte
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Start the POP3 server and run until `shutdown` completes
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            address = %listener.local_addr()?,
            tls = self.tls.is_some(),
            "POP3 server listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("POP3 server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr),
                    Err(e) => error!("POP3 accept error: {}", e),
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        let session = Pop3Session::new(self.verifier.clone());
        let tls = self.tls.clone();
        let server_name = self.config.server_name.clone();
        let span = info_span!("pop3", session = %session.id(), peer = %addr);

        tokio::spawn(
            async move {
                info!("New POP3 connection");
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => handle_connection(stream, session, &server_name).await,
                        Err(e) => {
                            warn!("TLS handshake failed: {}", e);
                            return;
                        }
                    },
                    None => handle_connection(stream, session, &server_name).await,
                };

                match result {
                    Ok(()) => info!("POP3 connection closed"),
                    Err(e) => debug!("POP3 connection ended: {}", e),
                }
            }
            .instrument(span),
        );
    }
}

/// Drive one session over a connected stream until QUIT or disconnect
pub async fn handle_connection<S, V>(
    stream: S,
    mut session: Pop3Session<V>,
    server_name: &str,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    V: CredentialVerifier,
{
    let mut framed = Framed::new(stream, Pop3Codec::new());
    framed.send(Pop3Response::greeting(server_name)).await?;

    while let Some(line) = framed.next().await {
        let reply = session.handle_line(&line?).await;

        match &reply.response {
            Response::Multi { status, lines } => {
                debug!(status = %status, lines = lines.len(), "POP3 reply")
            }
            Response::Line(status) => debug!(status = %status, "POP3 reply"),
        }

        framed.send(reply.response).await?;
        if reply.quit {
            break;
        }
    }

    Ok(())
}
