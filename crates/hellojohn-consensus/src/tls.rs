//! Mutual TLS material for peer traffic.
//!
//! Every node presents a certificate signed by the cluster CA and accepts only
//! peers whose certificates chain to that same CA.
use crate::{ConsensusError, ConsensusResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Intra-cluster requests time out after this long.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PeerTls {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    ca_pem: Vec<u8>,
    /// Name to verify on peer certificates when peers are addressed by IP.
    pub server_name: Option<String>,
}

impl fmt::Debug for PeerTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl PeerTls {
    pub fn from_pem(cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_pem: Vec<u8>, server_name: Option<String>) -> Self {
        Self {
            cert_pem,
            key_pem,
            ca_pem,
            server_name,
        }
    }

    pub fn from_paths(
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
        ca: impl AsRef<Path>,
        server_name: Option<String>,
    ) -> ConsensusResult<Self> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|err| ConsensusError::Tls(format!("reading {}: {err}", path.display())))
        };
        Ok(Self::from_pem(
            read(cert.as_ref())?,
            read(key.as_ref())?,
            read(ca.as_ref())?,
            server_name,
        ))
    }

    fn certs(&self) -> ConsensusResult<Vec<CertificateDer<'static>>> {
        let certs = rustls_pemfile::certs(&mut self.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ConsensusError::Tls(format!("node certificate: {err}")))?;
        if certs.is_empty() {
            return Err(ConsensusError::Tls("node certificate file is empty".to_string()));
        }
        Ok(certs)
    }

    fn key(&self) -> ConsensusResult<PrivateKeyDer<'static>> {
        rustls_pemfile::private_key(&mut self.key_pem.as_slice())
            .map_err(|err| ConsensusError::Tls(format!("node key: {err}")))?
            .ok_or_else(|| ConsensusError::Tls("node key file holds no private key".to_string()))
    }

    fn roots(&self) -> ConsensusResult<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut self.ca_pem.as_slice()) {
            let cert = cert.map_err(|err| ConsensusError::Tls(format!("cluster ca: {err}")))?;
            roots
                .add(cert)
                .map_err(|err| ConsensusError::Tls(format!("cluster ca: {err}")))?;
        }
        if roots.is_empty() {
            return Err(ConsensusError::Tls("cluster ca file is empty".to_string()));
        }
        Ok(roots)
    }

    /// Server side: require and verify a client certificate from the cluster CA.
    pub fn server_config(&self) -> ConsensusResult<Arc<ServerConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(self.roots()?), provider.clone())
            .build()
            .map_err(|err| ConsensusError::Tls(format!("client verifier: {err}")))?;
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|err| ConsensusError::Tls(err.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.certs()?, self.key()?)
            .map_err(|err| ConsensusError::Tls(format!("node certificate: {err}")))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }

    /// Client side: an HTTPS client for `peer_addr` and the base URL to use.
    ///
    /// With a configured server name and an IP peer address, the URL carries
    /// the server name and the client resolves it to the peer's address.
    pub fn client_for(&self, peer_addr: &str) -> ConsensusResult<(reqwest::Client, String)> {
        let mut identity_pem = self.cert_pem.clone();
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(&self.key_pem);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|err| ConsensusError::Tls(format!("client identity: {err}")))?;
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .identity(identity)
            .timeout(PEER_TIMEOUT);
        for cert in rustls_pemfile::certs(&mut self.ca_pem.as_slice()) {
            let cert = cert.map_err(|err| ConsensusError::Tls(format!("cluster ca: {err}")))?;
            let root = reqwest::Certificate::from_der(cert.as_ref())
                .map_err(|err| ConsensusError::Tls(format!("cluster ca: {err}")))?;
            builder = builder.add_root_certificate(root);
        }

        let base = match (&self.server_name, peer_addr.parse::<SocketAddr>()) {
            (Some(name), Ok(addr)) => {
                builder = builder.resolve(name, addr);
                format!("https://{name}:{}", addr.port())
            }
            _ => format!("https://{peer_addr}"),
        };
        let client = builder
            .build()
            .map_err(|err| ConsensusError::Tls(format!("peer client: {err}")))?;
        Ok((client, base))
    }
}

/// Plain HTTP peer client for development clusters without certificates.
pub fn plain_client_for(peer_addr: &str) -> ConsensusResult<(reqwest::Client, String)> {
    let client = reqwest::Client::builder()
        .timeout(PEER_TIMEOUT)
        .build()
        .map_err(|err| ConsensusError::Unavailable(format!("peer client: {err}")))?;
    Ok((client, format!("http://{peer_addr}")))
}
