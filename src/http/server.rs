//! The plain and TLS HTTP listeners.
//!
//! Both listeners serve the same router. The TLS listener completes the
//! handshake lazily: it reads the ClientHello, mints a certificate for the
//! offered SNI and only then finishes the handshake. A ClientHello without
//! SNI is refused.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use rustls::server::Acceptor;
use rustls::ServerConfig;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tls::CertStore;

/// Keep-alive idle period applied to every accepted connection.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(2);

fn enable_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        debug!(error = %err, "failed to enable TCP keep-alive");
    }
}

/// Serve plain HTTP until the listener fails fatally.
pub async fn run_plain(listener: TcpListener, router: Router) -> Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "HTTP accept failed");
                continue;
            }
        };
        enable_keepalive(&stream);

        let service = TowerToHyperService::new(router.clone());
        tokio::spawn(async move {
            let served = ConnectionBuilder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await;
            if let Err(err) = served {
                debug!(peer = %peer, error = %err, "HTTP connection ended with error");
            }
        });
    }
}

/// Serve HTTPS with per-SNI minted certificates until the listener fails
/// fatally.
pub async fn run_tls(listener: TcpListener, router: Router, certs: Arc<CertStore>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "HTTPS listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "HTTPS accept failed");
                continue;
            }
        };
        enable_keepalive(&stream);

        let router = router.clone();
        let certs = Arc::clone(&certs);
        tokio::spawn(async move {
            if let Err(err) = serve_tls(stream, router, certs).await {
                warn!(peer = %peer, error = %err, "TLS connection failed");
            }
        });
    }
}

async fn serve_tls(stream: TcpStream, router: Router, certs: Arc<CertStore>) -> Result<()> {
    let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;

    let Some(name) = start.client_hello().server_name().map(ToOwned::to_owned) else {
        // Dropping the acceptor aborts the handshake.
        warn!("refusing TLS client without SNI");
        return Ok(());
    };

    // Minting may generate an RSA key; keep that off the async workers.
    let minted = tokio::task::spawn_blocking({
        let certs = Arc::clone(&certs);
        let name = name.clone();
        move || certs.certificate(&name)
    })
    .await??;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(minted.chain, minted.key)?;

    let tls_stream = start.into_stream(Arc::new(config)).await?;
    debug!(sni = %name, "TLS handshake completed");

    let service = TowerToHyperService::new(router);
    ConnectionBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
        .map_err(|err| Error::Http(err.to_string()))
}
