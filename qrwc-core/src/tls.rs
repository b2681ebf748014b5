//! WebSocket client TLS configuration, adapted from the grounding crate's
//! `create_tls_client_config` (`knhk-sidecar/src/tls.rs`). Q-SYS Cores
//! commonly serve a self-signed certificate out of the box, so this module
//! carries a `reject_unauthorized: bool` escape hatch rather than forcing
//! client-cert/mTLS semantics the Core-side QRWC transport never uses.

use crate::error::{BridgeError, BridgeResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::SignatureScheme;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub enabled: bool,
    /// When false, the Core's certificate chain and hostname are not
    /// validated -- the only way to talk to a Core's factory self-signed
    /// cert without the operator installing a trusted one first.
    pub reject_unauthorized: bool,
    /// Extra CA certificate to trust in addition to the system roots.
    pub ca_file: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reject_unauthorized: true,
            ca_file: None,
        }
    }
}

impl TlsConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        if let Some(ref ca_file) = self.ca_file {
            if !Path::new(ca_file).exists() {
                return Err(BridgeError::Validation(format!(
                    "CA certificate file not found: {ca_file}"
                )));
            }
        }
        Ok(())
    }
}

/// A verifier that skips chain and hostname validation entirely, used only
/// when `reject_unauthorized` is false. It still requires the handshake
/// itself to succeed (encryption, not authentication, is the remaining
/// guarantee).
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // Accept every scheme rustls knows since signatures are never checked.
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn load_extra_ca(root_store: &mut rustls::RootCertStore, ca_file: &str) -> BridgeResult<()> {
    let ca_data = fs::read(ca_file).map_err(|e| BridgeError::Validation(format!("failed to read CA file {ca_file}: {e}")))?;
    let mut reader = BufReader::new(ca_data.as_slice());
    let ca_certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>().map_err(|e| BridgeError::Validation(format!("failed to parse CA file: {e}")))?;
    for cert in ca_certs {
        root_store.add(cert).map_err(|e| BridgeError::Validation(format!("failed to add CA certificate: {e}")))?;
    }
    Ok(())
}

/// Builds the rustls client config used by the transport's WebSocket
/// connector.
pub fn create_tls_client_config(config: &TlsConfig) -> BridgeResult<rustls::ClientConfig> {
    config.validate()?;

    let mut root_store = rustls::RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for cert in native_certs.certs {
        let _ = root_store.add(cert);
    }
    if let Some(ref ca_file) = config.ca_file {
        load_extra_ca(&mut root_store, ca_file)?;
    }

    if config.reject_unauthorized {
        Ok(rustls::ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth())
    } else {
        tracing::warn!("TLS certificate verification disabled (reject_unauthorized=false)");
        let mut client_config = rustls::ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth();
        client_config.dangerous().set_certificate_verifier(Arc::new(AcceptAnyServerCert));
        Ok(client_config)
    }
}
