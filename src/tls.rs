//! TLS client factory: opens the TCP connection, wraps it in a verified
//! rustls client session and returns a single bidirectional stream type the
//! rest of the agent never has to think about as "TLS" vs. "TCP".

use crate::error::Result;
use pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

pub type AgentStream = TlsStream<TcpStream>;

/// Builds the client TLS configuration the supervisor reuses across
/// reconnect attempts. `root_cert_path` is the CLI-supplied CA bundle; when
/// absent the platform/webpki root store is used instead.
pub fn build_client_config(root_cert_path: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();

    match root_cert_path {
        Some(path) => {
            let pem = std::fs::read(path)?;
            let mut reader = std::io::BufReader::new(pem.as_slice());
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert?;
                let _ = roots.add(cert);
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Opens the TCP connection and performs the TLS handshake, asserting SNI ==
/// `endpoint_host` and verifying the full chain via rustls (`VERIFY_REQUIRED`
/// is rustls's only mode -- there is no opt-out here by construction).
pub async fn connect(
    client_config: Arc<ClientConfig>,
    endpoint_host: &str,
    endpoint_port: u16,
) -> Result<AgentStream> {
    let tcp = TcpStream::connect((endpoint_host, endpoint_port)).await?;
    tcp.set_nodelay(true)?;

    let server_name = ServerName::try_from(endpoint_host.to_string())?;
    let connector = TlsConnector::from(client_config);
    let tls = connector.connect(server_name, tcp).await?;
    Ok(tls)
}
