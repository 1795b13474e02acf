//! Daemon assembly.
//!
//! A [`Daemon`] owns the Store, the certificate mint and the list
//! compiler, and hands `Arc` views to the five long-lived tasks: DNS over
//! UDP and TCP, HTTP, HTTPS and the control channel. Listeners are bound
//! before the first compile pass because remote list sources may well
//! resolve through this very daemon.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::blocklist::ListCompiler;
use crate::config::{Addr, Config};
use crate::control::ControlServer;
use crate::dns::{self, discover_upstream, Pipeline, SpoofTarget, UpstreamResolver};
use crate::error::{ConfigError, Error, Result};
use crate::http::{self, HttpState};
use crate::store::Store;
use crate::tls::CertStore;

/// Where upstream resolvers are discovered when `dns-forward` is unset.
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// One daemon instance owning all shared state.
pub struct Daemon {
    config: Arc<Config>,
    store: Arc<Store>,
    certs: Arc<CertStore>,
    compiler: Arc<ListCompiler>,
}

impl Daemon {
    /// Assemble a daemon from a loaded configuration.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(Store::new(Duration::from_secs(config.cache_dns)));
        let certs = Arc::new(CertStore::new(
            &config.cache_dir,
            config.root_cert.clone(),
            config.root_key.clone(),
        ));
        let compiler = Arc::new(ListCompiler::new(Arc::clone(&config))?);

        Ok(Self {
            config,
            store,
            certs,
            compiler,
        })
    }

    /// The shared store, mainly for tests and embedders.
    #[must_use]
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Bind all listeners, start serving, then compile the block lists and
    /// wait for signals. Returns after SIGINT/SIGTERM.
    pub async fn run(self) -> Result<()> {
        let upstream = self.upstream_addr()?;
        let spoof_ip = self
            .config
            .http_listen
            .ip()
            .ok_or_else(|| ConfigError::Validation("http-listen host must be an IP".into()))?;
        let host_ttl = u32::try_from(self.config.cache_hosts).unwrap_or(u32::MAX);

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&self.store),
            UpstreamResolver::new(upstream),
            SpoofTarget::from_ip(spoof_ip),
            host_ttl,
        ));

        let dns_addr = listen_addr(&self.config.dns_listen)?;
        let udp = UdpSocket::bind(dns_addr).await?;
        let tcp = TcpListener::bind(dns_addr).await?;
        let http_listener = TcpListener::bind(listen_addr(&self.config.http_listen)?).await?;
        let https_listener = TcpListener::bind(listen_addr(&self.config.https_listen)?).await?;
        let control_listener = TcpListener::bind(listen_addr(&self.config.control_listen)?).await?;

        info!(upstream = %upstream, "starting trackwall");

        let router = http::router(Arc::new(HttpState {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }));

        tokio::spawn(dns::server::run_udp(udp, Arc::clone(&pipeline)));
        tokio::spawn(dns::server::run_tcp(tcp, pipeline));
        tokio::spawn(http::server::run_plain(http_listener, router.clone()));
        tokio::spawn(http::server::run_tls(
            https_listener,
            router,
            Arc::clone(&self.certs),
        ));
        tokio::spawn(
            Arc::new(ControlServer::new(
                Arc::clone(&self.store),
                Arc::clone(&self.compiler),
            ))
            .run(control_listener),
        );

        if let Err(err) = self.compiler.bootstrap(&self.store).await {
            warn!(error = %err, "block list bootstrap incomplete");
        }
        info!(
            hosts = self.store.hosts.len(),
            regexps = self.store.regexps.len(),
            "serving"
        );

        self.wait_for_signals().await
    }

    /// Block on signals: SIGHUP reloads the lists, SIGINT/SIGTERM return.
    async fn wait_for_signals(&self) -> Result<()> {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    return Ok(());
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received, shutting down");
                    return Ok(());
                }
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading lists");
                    if let Err(err) = self.compiler.refresh(&self.store).await {
                        warn!(error = %err, "list reload failed");
                    }
                }
            }
        }
    }

    fn upstream_addr(&self) -> Result<SocketAddr> {
        match &self.config.dns_forward {
            Some(addr) => listen_addr(addr),
            None => discover_upstream(Path::new(RESOLV_CONF), &self.config.dns_listen.host),
        }
    }
}

fn listen_addr(addr: &Addr) -> Result<SocketAddr> {
    let ip = addr.ip().ok_or_else(|| {
        Error::Config(ConfigError::Validation(format!(
            "{} is not an IP address",
            addr.host
        )))
    })?;
    Ok(SocketAddr::new(ip, addr.port))
}
