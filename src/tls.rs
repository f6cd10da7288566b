//! TLS plumbing for the tunnel.
//!
//! The server terminates TLS with a PEM key/certificate pair; the client
//! connects with a verifier that accepts any certificate, since decoy
//! deployments run on self-signed identities and peer authentication is
//! carried by the camouflage secret, not the certificate chain.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Error, Result};

/// Load a PEM certificate chain.
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let mut reader = BufReader::new(
        File::open(path).map_err(|e| Error::tls(format!("{}: {}", path.display(), e)))?,
    );
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::tls(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::tls(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

/// Load a PEM private key.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let path = path.as_ref();
    let mut reader = BufReader::new(
        File::open(path).map_err(|e| Error::tls(format!("{}: {}", path.display(), e)))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| Error::tls(format!("{}: no private key found", path.display())))
}

/// Build the server-side acceptor from key and certificate files.
pub fn make_acceptor(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side connector with certificate verification disabled.
pub fn make_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustingVerifier))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// SNI name for a connect target; IP literals are accepted.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::tls(format!("invalid server name: {host}")))
}

/// Accepts every presented certificate. The tunnel authenticates peers by
/// the shared secret path, never by the certificate.
#[derive(Debug)]
struct TrustingVerifier;

impl rustls::client::danger::ServerCertVerifier for TrustingVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
