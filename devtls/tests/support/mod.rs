pub mod ca;

use std::net::SocketAddr;
use std::sync::Arc;

use devtls::{
    CertificateGenerator, CertificateIssuer, Listener, RootCa, TcpAcceptor, TlsListener,
    TlsListenerConfig,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

pub use ca::{TestCa, generate_ca};

pub type Generator = CertificateGenerator<CertificateIssuer>;

pub struct TestServer {
    pub listener: TlsListener<TcpAcceptor>,
    pub addr: SocketAddr,
    pub generator: Arc<Generator>,
}

pub async fn start_server(ca: &TestCa) -> TestServer {
    let root = RootCa::from_pem(ca.cert_pem.as_bytes(), ca.key_pem.as_bytes()).unwrap();
    let generator = Arc::new(CertificateGenerator::new(CertificateIssuer::new(root)));
    let inner = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let listener = TlsListener::with_source(
        inner,
        generator.clone(),
        TlsListenerConfig {
            handshake_timeout: std::time::Duration::from_secs(5),
            ..Default::default()
        },
    )
    .unwrap();
    let addr = listener.local_addr().unwrap();

    TestServer {
        listener,
        addr,
        generator,
    }
}

pub fn client_config(ca: &TestCa) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(ca.cert_der.clone()).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    Arc::new(config)
}

pub async fn connect(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    TlsConnector::from(config).connect(server_name, tcp).await
}
