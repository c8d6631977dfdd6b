//! Binds a mutual-TLS listener and spawns a connection handler per
//! accepted connection, surviving transient accept errors with
//! exponential backoff.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Installed by tests to learn the listener's bound address before
/// the accept loop starts running; a pure testability seam with no
/// effect on production behavior.
pub type ReadyHook = Box<dyn FnOnce(std::net::SocketAddr) + Send>;

/// Builds the mutual-TLS configuration and runs the accept loop. Only
/// returns on a permanent error; the caller should treat that as
/// fatal.
pub async fn listen_and_serve(config: Arc<Config>, ready: Option<ReadyHook>) -> Result<()> {
    let tls_config = build_tls_config(
        &config.ca_file,
        &config.cert_file,
        &config.key_file,
    )
    .wrap_err("failed to build TLS configuration")?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let addr = ("0.0.0.0", config.port);
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err("failed to bind listener")?;
    info!(port = config.port, "radsec gateway listening");

    if let Some(hook) = ready {
        hook(listener.local_addr()?);
    }

    let dispatcher = Arc::new(Dispatcher {
        auth_host: config.radius.radius_host.clone(),
        auth_port: config.radius.radius_port,
        acct_host: config.radius.radius_acct_host.clone(),
        acct_port: config.radius.radius_acct_port,
        timeout: config.radius.radius_timeout,
    });

    let mut backoff = Duration::ZERO;
    loop {
        match listener.accept().await {
            Ok((tcp_stream, remote)) => {
                backoff = Duration::ZERO;
                let acceptor = acceptor.clone();
                let dispatcher = dispatcher.clone();
                let idle_timeout = config.idle_timeout;
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(tcp_stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(%remote, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    crate::conn::handle_connection(tls_stream, dispatcher, idle_timeout, remote)
                        .await;
                });
            }
            Err(source) => {
                let accept_err = crate::error::AcceptError::Io {
                    source,
                    backtrace: std::backtrace::Backtrace::capture(),
                };
                if accept_err.is_temporary() {
                    backoff = if backoff.is_zero() {
                        INITIAL_BACKOFF
                    } else {
                        (backoff * 2).min(MAX_BACKOFF)
                    };
                    warn!(error = %accept_err, delay = ?backoff, "failed to accept connection");
                    tokio::time::sleep(backoff).await;
                } else {
                    return Err(accept_err).wrap_err("permanent accept error");
                }
            }
        }
    }
}

fn build_tls_config(
    ca_file: &Path,
    cert_file: &Path,
    key_file: &Path,
) -> Result<ServerConfig> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots.add(cert).wrap_err("invalid CA certificate")?;
    }

    let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .wrap_err("failed to build client certificate verifier")?;

    let config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_client_cert_verifier(client_verifier)
    .with_single_cert(certs, key)
    .wrap_err("invalid server certificate/key pair")?;

    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .wrap_err_with(|| format!("failed to parse certificates in {}", path.display()))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .wrap_err_with(|| format!("failed to parse private key in {}", path.display()))?
        .ok_or_else(|| eyre::eyre!("no private key found in {}", path.display()))
}
