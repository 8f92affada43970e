//! TLS session implementation

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{
    self, ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::common::{IntoStream, Result, Stream};
use crate::error::Error;

use super::Session;

/// TLS protocol version bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

impl TlsVersion {
    fn supported(&self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Expected peer name (SNI + certificate check)
    pub server_name: Option<String>,
    /// Skip certificate verification
    pub allow_insecure: bool,
    /// ALPN protocols
    pub alpn: Vec<String>,
    /// Extra trust anchors (PEM)
    pub ca_file: Option<String>,
    /// Certificate chain (PEM): client auth, or the server identity
    pub certificate_file: Option<String>,
    /// Private key (PEM) matching `certificate_file`
    pub key_file: Option<String>,
    /// Lowest accepted protocol version (default 1.2)
    pub min_version: Option<TlsVersion>,
    /// Highest accepted protocol version (default 1.3)
    pub max_version: Option<TlsVersion>,
}

impl TlsConfig {
    fn protocol_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>> {
        let min = self.min_version.unwrap_or(TlsVersion::Tls12);
        let max = self.max_version.unwrap_or(TlsVersion::Tls13);

        let versions: Vec<_> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .iter()
            .filter(|v| **v >= min && **v <= max)
            .map(TlsVersion::supported)
            .collect();

        if versions.is_empty() {
            return Err(Error::Config(format!(
                "TLS version bounds are empty: min {:?} > max {:?}",
                min, max
            )));
        }
        Ok(versions)
    }

    fn identity(&self) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
        match (&self.certificate_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(Some((load_certs(cert)?, load_private_key(key)?))),
            (None, None) => Ok(None),
            _ => Err(Error::Config(
                "certificate_file and key_file must be set together".into(),
            )),
        }
    }
}

/// TLS session wrapping streams with rustls
pub struct TlsSession {
    config: TlsConfig,
    connector: TlsConnector,
    acceptor: Option<TlsAcceptor>,
}

impl TlsSession {
    pub fn new(config: TlsConfig) -> Result<Self> {
        let connector = Self::build_connector(&config)?;
        let acceptor = Self::build_acceptor(&config)?;
        Ok(Self {
            config,
            connector,
            acceptor,
        })
    }

    fn build_connector(config: &TlsConfig) -> Result<TlsConnector> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_file) = &config.ca_file {
            for cert in load_certs(ca_file)? {
                root_store
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("Invalid CA certificate: {}", e)))?;
            }
        }

        let builder = ClientConfig::builder_with_protocol_versions(&config.protocol_versions()?)
            .with_root_certificates(root_store);
        let mut tls_config = match config.identity()? {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Tls(format!("Invalid client certificate: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        if !config.alpn.is_empty() {
            tls_config.alpn_protocols = config
                .alpn
                .iter()
                .map(|s| s.as_bytes().to_vec())
                .collect();
        }

        if config.allow_insecure {
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(InsecureVerifier));
        }

        Ok(TlsConnector::from(Arc::new(tls_config)))
    }

    fn build_acceptor(config: &TlsConfig) -> Result<Option<TlsAcceptor>> {
        let Some((certs, key)) = config.identity()? else {
            return Ok(None);
        };

        let mut server_config =
            ServerConfig::builder_with_protocol_versions(&config.protocol_versions()?)
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| Error::Tls(format!("Invalid server certificate: {}", e)))?;
        server_config.alpn_protocols = config
            .alpn
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();

        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open certificate file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("No certificate found in {}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open key file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let keys = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?;

    for item in keys {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::Config("No valid private key found in file".into()))
}

#[async_trait]
impl Session for TlsSession {
    async fn wrap_client(&self, stream: Stream) -> Result<Stream> {
        let server_name = self
            .config
            .server_name
            .as_ref()
            .ok_or_else(|| Error::Config("TLS server name required".into()))?;

        let domain = ServerName::try_from(server_name.clone())
            .map_err(|_| Error::Config(format!("Invalid server name: {}", server_name)))?;

        debug!("TLS: client handshake with {}", server_name);
        let tls_stream = self.connector.connect(domain, stream).await?;
        Ok(tls_stream.into_stream())
    }

    async fn wrap_server(&self, stream: Stream) -> Result<Stream> {
        let acceptor = self.acceptor.as_ref().ok_or_else(|| {
            Error::Config("TLS server requires certificate_file and key_file".into())
        })?;

        debug!("TLS: accepting handshake");
        let tls_stream = acceptor.accept(stream).await?;
        Ok(tls_stream.into_stream())
    }
}

/// Certificate verifier used when `allow_insecure` is set
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
