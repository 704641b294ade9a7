//! Transport security settings.
//!
//! Every handle is configured with a minimum protocol version and an
//! injected certificate validation policy. The default validates against
//! the bundled webpki trust store; accept-any is available for legacy
//! endpoints but is always logged as insecure.

use crate::error::WsResult;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls::{SupportedProtocolVersion, ALL_VERSIONS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Lowest TLS version the transport will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinTlsVersion {
    #[default]
    Tls12,
    Tls13,
}

impl MinTlsVersion {
    /// Protocol versions allowed at or above this minimum.
    pub fn protocol_versions(&self) -> Vec<&'static SupportedProtocolVersion> {
        match self {
            Self::Tls12 => ALL_VERSIONS.to_vec(),
            Self::Tls13 => vec![&rustls::version::TLS13],
        }
    }
}

/// Serializable choice of certificate validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateValidation {
    /// Validate against the webpki trust store.
    #[default]
    WebPki,
    /// Accept any server certificate. Insecure.
    AcceptAny,
}

/// Certificate validation policy applied to new handles.
#[derive(Clone)]
pub enum CertificatePolicy {
    /// Standard chain validation against the given roots.
    TrustStore(Arc<RootCertStore>),
    /// Accept any certificate (legacy behaviour, insecure).
    AcceptAny,
    /// Caller-supplied verifier.
    Custom(Arc<dyn ServerCertVerifier>),
}

impl CertificatePolicy {
    /// Trust store built from the bundled webpki roots.
    pub fn webpki() -> Self {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self::TrustStore(Arc::new(roots))
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, Self::AcceptAny)
    }
}

impl From<CertificateValidation> for CertificatePolicy {
    fn from(value: CertificateValidation) -> Self {
        match value {
            CertificateValidation::WebPki => Self::webpki(),
            CertificateValidation::AcceptAny => Self::AcceptAny,
        }
    }
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self::webpki()
    }
}

impl fmt::Debug for CertificatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustStore(roots) => write!(f, "TrustStore({} roots)", roots.len()),
            Self::AcceptAny => write!(f, "AcceptAny"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// TLS settings handed to the connector for each new handle.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub min_version: MinTlsVersion,
    pub policy: CertificatePolicy,
}

impl TlsSettings {
    pub fn new(min_version: MinTlsVersion, policy: CertificatePolicy) -> Self {
        Self {
            min_version,
            policy,
        }
    }

    /// Build a rustls client configuration honouring the minimum version and policy.
    pub fn client_config(&self) -> WsResult<Arc<ClientConfig>> {
        crate::init_crypto();

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = self.min_version.protocol_versions();
        let builder =
            ClientConfig::builder_with_provider(provider.clone()).with_protocol_versions(&versions)?;

        let config = match &self.policy {
            CertificatePolicy::TrustStore(roots) => builder
                .with_root_certificates(roots.as_ref().clone())
                .with_no_client_auth(),
            CertificatePolicy::AcceptAny => {
                warn!("Certificate validation disabled, accepting any server certificate");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier { provider }))
                    .with_no_client_auth()
            }
            CertificatePolicy::Custom(verifier) => builder
                .dangerous()
                .with_custom_certificate_verifier(verifier.clone())
                .with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }
}

/// Verifier that trusts every certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyVerifier {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
