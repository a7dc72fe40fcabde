//! TLS termination for the API listener.
//!
//! Loads a PEM certificate chain and private key into a rustls server
//! config and wraps accepted TCP connections in TLS. A failed handshake
//! is logged and dropped; the listener keeps accepting.
//! Handshakes run concurrently, each bounded by [`HANDSHAKE_TIMEOUT`].

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse PEM in {}: {source}", path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: pem::PemError,
    },

    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("failed to build TLS config: {0}")]
    Config(#[from] rustls::Error),
}

fn read_pem(path: &Path) -> Result<Vec<pem::Pem>, TlsError> {
    let text = std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    pem::parse_many(text).map_err(|source| TlsError::Pem {
        path: path.to_path_buf(),
        source,
    })
}

/// Builds a server config from PEM files. No client certificates are
/// requested.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let _ = default_provider().install_default();

    let chain: Vec<CertificateDer<'static>> = read_pem(cert_path)?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| CertificateDer::from(p.into_contents()))
        .collect();
    if chain.is_empty() {
        return Err(TlsError::NoCertificate(cert_path.to_path_buf()));
    }

    let key_pem = read_pem(key_path)?
        .into_iter()
        .find(|p| p.tag().ends_with("PRIVATE KEY"))
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;
    let key = PrivateKeyDer::try_from(key_pem.into_contents())
        .map_err(|e| TlsError::InvalidKey(e.to_string()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Upper bound for a client to complete the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Established connections waiting for axum to pick them up.
const READY_BACKLOG: usize = 64;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Accepted = (TlsStream<TcpStream>, SocketAddr);

/// Listener that performs the TLS handshake before handing the stream
/// to axum.
///
/// Each handshake runs in its own task under [`HANDSHAKE_TIMEOUT`], so a
/// client that connects and stays silent never holds up other clients.
pub struct TlsListener {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<Accepted>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(tcp_listener: TcpListener, config: ServerConfig) -> io::Result<Self> {
        Self::with_handshake_timeout(tcp_listener, config, HANDSHAKE_TIMEOUT)
    }

    pub fn with_handshake_timeout(
        tcp_listener: TcpListener,
        config: ServerConfig,
        handshake_timeout: Duration,
    ) -> io::Result<Self> {
        let local_addr = tcp_listener.local_addr()?;
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let (tx, ready) = mpsc::channel(READY_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(tcp_listener, acceptor, handshake_timeout, tx));
        Ok(Self {
            local_addr,
            ready,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    tcp_listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    ready: mpsc::Sender<Accepted>,
) {
    while !ready.is_closed() {
        let (stream, addr) = match tcp_listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "TCP accept error");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    debug!(peer_addr = %addr, "tls connection established");
                    let _ = ready.send((tls_stream, addr)).await;
                }
                Ok(Err(e)) => warn!(peer_addr = %addr, error = %e, "TLS handshake failed"),
                Err(_) => warn!(peer_addr = %addr, "TLS handshake timed out"),
            }
        });
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(accepted) => accepted,
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("tls.crt");
        let key_path = dir.join("tls.key");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_load_server_config() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        let config = load_server_config(&cert, &key).unwrap();
        assert_eq!(config.alpn_protocols.len(), 2);
    }

    #[test]
    fn test_swapped_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        assert!(matches!(
            load_server_config(&key, &cert),
            Err(TlsError::NoCertificate(_))
        ));
    }

    #[test]
    fn test_missing_files() {
        let err = load_server_config(Path::new("/nonexistent/c"), Path::new("/nonexistent/k"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Io { .. }));
    }

    #[tokio::test]
    async fn test_handshake_failure_keeps_listening() {
        use axum::serve::Listener;
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut listener = TlsListener::new(tcp, load_server_config(&cert, &key).unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (_stream, peer) = listener.accept().await;
            peer
        });

        // Plain text is not a ClientHello; the listener must move on.
        let mut plain = TcpStream::connect(addr).await.unwrap();
        plain.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(plain);

        let (local, _tls) = connect(&cert, addr).await;
        assert_eq!(accept.await.unwrap(), local);
    }

    async fn connect(
        cert: &Path,
        addr: SocketAddr,
    ) -> (SocketAddr, tokio_rustls::client::TlsStream<TcpStream>) {
        let mut roots = rustls::RootCertStore::empty();
        roots
            .add(CertificateDer::from(
                pem::parse(std::fs::read(cert).unwrap()).unwrap().into_contents(),
            ))
            .unwrap();
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
        let stream = TcpStream::connect(addr).await.unwrap();
        let local = stream.local_addr().unwrap();
        let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let tls = connector.connect(server_name, stream).await.unwrap();
        (local, tls)
    }

    #[tokio::test]
    async fn test_silent_client_does_not_block_others() {
        use axum::serve::Listener;

        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut listener = TlsListener::new(tcp, load_server_config(&cert, &key).unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        // Connected but never sends a ClientHello.
        let _silent = TcpStream::connect(addr).await.unwrap();

        let served = tokio::time::timeout(Duration::from_secs(5), async {
            let client = tokio::spawn(async move { connect(&cert, addr).await });
            let (_stream, peer) = listener.accept().await;
            let (local, _tls) = client.await.unwrap();
            assert_eq!(peer, local);
        })
        .await;
        assert!(served.is_ok(), "TLS client waited behind a silent connection");
    }

    #[tokio::test]
    async fn test_silent_client_is_dropped_after_timeout() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = TlsListener::with_handshake_timeout(
            tcp,
            load_server_config(&cert, &key).unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        let addr = axum::serve::Listener::local_addr(&listener).unwrap();

        let mut silent = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), silent.read(&mut buf))
            .await
            .expect("server kept the silent connection open");
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}
