//! TLS-terminating listener
//!
//! [`TlsListener`] wraps any [`Listener`] and hands out streams that have
//! already completed a TLS handshake. Handshakes run concurrently in the
//! background; connections whose handshake fails or times out are dropped
//! and never surface from [`Listener::accept`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::generator::CertificateSource;
use crate::sni::server_config;

/// Pause after a transient accept error (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Something that accepts connections.
///
/// `accept` must be cancel safe: dropping the future before it completes
/// must not lose a connection.
#[async_trait]
pub trait Listener: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Io, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Stop accepting. Later calls to `accept` fail.
    fn close(&mut self);
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener is closed")
}

/// Plain TCP listener
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: Option<TcpListener>,
}

impl TcpAcceptor {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::from_listener(TcpListener::bind(addr).await?))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            inner: Some(listener),
        }
    }
}

#[async_trait]
impl Listener for TcpAcceptor {
    type Io = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let listener = self.inner.as_ref().ok_or_else(closed)?;
        listener.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.as_ref().ok_or_else(closed)?.local_addr()
    }

    fn close(&mut self) {
        self.inner = None;
    }
}

/// TLS listener configuration
#[derive(Debug, Clone)]
pub struct TlsListenerConfig {
    /// Connections that have not finished the handshake by then are dropped
    pub handshake_timeout: Duration,
    /// Completed handshakes waiting for `accept`
    pub backlog: usize,
}

impl Default for TlsListenerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            backlog: 64,
        }
    }
}

type Accepted<L> = (TlsStream<<L as Listener>::Io>, SocketAddr);

/// Listener that terminates TLS on top of another [`Listener`].
pub struct TlsListener<L: Listener> {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Accepted<L>>,
    driver: Option<JoinHandle<()>>,
}

impl<L: Listener> TlsListener<L> {
    /// Start terminating TLS on `inner`. Must be called within a tokio runtime.
    pub fn new(inner: L, acceptor: TlsAcceptor, config: TlsListenerConfig) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        let (tx, incoming) = mpsc::channel(config.backlog.max(1));
        let driver = tokio::spawn(drive(inner, acceptor, config.handshake_timeout, tx));

        Ok(Self {
            local_addr,
            incoming,
            driver: Some(driver),
        })
    }

    /// Start terminating TLS on `inner` with certificates from `source`.
    pub fn with_source(
        inner: L,
        source: Arc<dyn CertificateSource>,
        config: TlsListenerConfig,
    ) -> io::Result<Self> {
        let server_config = server_config(source).map_err(io::Error::other)?;
        Self::new(inner, TlsAcceptor::from(Arc::new(server_config)), config)
    }
}

#[async_trait]
impl<L: Listener> Listener for TlsListener<L> {
    type Io = TlsStream<L::Io>;

    async fn accept(&mut self) -> io::Result<(Self::Io, SocketAddr)> {
        self.incoming.recv().await.ok_or_else(closed)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.incoming.close();
    }
}

impl<L: Listener> Drop for TlsListener<L> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl<L: Listener> std::fmt::Debug for TlsListener<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsListener")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.driver.is_none())
            .finish()
    }
}

/// Accept loop: one handshake task per raw connection.
async fn drive<L: Listener>(
    mut inner: L,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    tx: mpsc::Sender<Accepted<L>>,
) {
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            accepted = inner.accept() => match accepted {
                Ok((io, peer)) => {
                    let acceptor = acceptor.clone();
                    let tx = tx.clone();
                    handshakes.spawn(async move {
                        match tokio::time::timeout(handshake_timeout, acceptor.accept(io)).await {
                            Ok(Ok(stream)) => {
                                // Receiver gone means the listener was closed.
                                let _ = tx.send((stream, peer)).await;
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(peer = %peer, "TLS handshake failed: {}", e);
                            }
                            Err(_) => {
                                tracing::warn!(peer = %peer, "TLS handshake timed out");
                            }
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => break,
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
            _ = tx.closed() => break,
        }
    }

    inner.close();
}
