//! Transport security policy and rustls configuration.
//!
//! Validation runs before any socket is opened so that a misconfigured node
//! fails at startup rather than on its first dial. Production mode demands
//! mutual TLS on both ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;

use crate::config::{SecurityMode, SessionConfig, TlsConfig};
use edge_core::Transience;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecurityError {
    #[error("invalid security mode {mode:?}")]
    InvalidSecurityMode { mode: String },
    #[error("tls is required")]
    TlsRequired,
    #[error("mutual tls is required in production mode")]
    MtlsRequired,
    #[error("tls cert file is required")]
    CertFileRequired,
    #[error("tls key file is required")]
    KeyFileRequired,
    #[error("tls ca file is required")]
    CaFileRequired,
    #[error("insecure skip verify is not allowed in production mode")]
    InsecureSkipNotAllowed,
    #[error("read {path}: {source}")]
    ReadPem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {reason}")]
    ParsePem { path: PathBuf, reason: String },
    #[error("{path} contains no certificates")]
    NoCertificates { path: PathBuf },
    #[error("invalid tls server name {name:?}")]
    InvalidServerName { name: String },
    #[error("client verifier: {0}")]
    Verifier(String),
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
}

impl SecurityError {
    /// Configuration problems never fix themselves.
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

impl SessionConfig {
    /// Checks the Ghost side (TLS client) settings against the security mode.
    pub fn validate_client_transport(&self) -> Result<(), SecurityError> {
        let tls = &self.tls;
        if self.security_mode == SecurityMode::Production {
            if !tls.enabled {
                return Err(SecurityError::TlsRequired);
            }
            if !tls.mutual {
                return Err(SecurityError::MtlsRequired);
            }
            if tls.insecure_skip_verify {
                return Err(SecurityError::InsecureSkipNotAllowed);
            }
        }
        if tls.mutual && !tls.enabled {
            return Err(SecurityError::TlsRequired);
        }
        if !tls.enabled {
            return Ok(());
        }
        if tls.ca_path().is_none() && !tls.insecure_skip_verify {
            return Err(SecurityError::CaFileRequired);
        }
        if tls.mutual {
            if tls.cert_path().is_none() {
                return Err(SecurityError::CertFileRequired);
            }
            if tls.key_path().is_none() {
                return Err(SecurityError::KeyFileRequired);
            }
        }
        Ok(())
    }

    /// Checks the Mirage side (TLS server) settings against the security mode.
    pub fn validate_server_transport(&self) -> Result<(), SecurityError> {
        let tls = &self.tls;
        if self.security_mode == SecurityMode::Production {
            if !tls.enabled {
                return Err(SecurityError::TlsRequired);
            }
            if !tls.mutual {
                return Err(SecurityError::MtlsRequired);
            }
        }
        if tls.mutual && !tls.enabled {
            return Err(SecurityError::TlsRequired);
        }
        if !tls.enabled {
            return Ok(());
        }
        if tls.cert_path().is_none() {
            return Err(SecurityError::CertFileRequired);
        }
        if tls.key_path().is_none() {
            return Err(SecurityError::KeyFileRequired);
        }
        if tls.mutual && tls.ca_path().is_none() {
            return Err(SecurityError::CaFileRequired);
        }
        Ok(())
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the client config for an already validated [`TlsConfig`].
pub fn client_tls_config(tls: &TlsConfig) -> Result<Arc<ClientConfig>, SecurityError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;
    let builder = if tls.insecure_skip_verify {
        tracing::warn!("tls server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification {
                algorithms: provider.signature_verification_algorithms,
            }))
    } else {
        let ca = tls.ca_path().ok_or(SecurityError::CaFileRequired)?;
        builder.with_root_certificates(load_roots(ca)?)
    };
    let config = if tls.mutual {
        let cert = tls.cert_path().ok_or(SecurityError::CertFileRequired)?;
        let key = tls.key_path().ok_or(SecurityError::KeyFileRequired)?;
        builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
    } else {
        builder.with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Builds the server config for an already validated [`TlsConfig`].
pub fn server_tls_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, SecurityError> {
    let provider = provider();
    let cert = tls.cert_path().ok_or(SecurityError::CertFileRequired)?;
    let key = tls.key_path().ok_or(SecurityError::KeyFileRequired)?;
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;
    let config = if tls.mutual {
        let ca = tls.ca_path().ok_or(SecurityError::CaFileRequired)?;
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(load_roots(ca)?), provider)
                .build()
                .map_err(|err| SecurityError::Verifier(err.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(load_certs(cert)?, load_key(key)?)?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(load_certs(cert)?, load_key(key)?)?
    };
    Ok(Arc::new(config))
}

/// The configured server name, or the host part of `addr`.
pub fn server_name_for(tls: &TlsConfig, addr: &str) -> Result<ServerName<'static>, SecurityError> {
    let name = match tls.server_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => host_of(addr).to_string(),
    };
    ServerName::try_from(name.clone()).map_err(|_| SecurityError::InvalidServerName { name })
}

fn host_of(addr: &str) -> &str {
    let addr = addr.trim();
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

fn read_pem(path: &Path) -> Result<Vec<u8>, SecurityError> {
    std::fs::read(path).map_err(|source| SecurityError::ReadPem {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
    let pem = read_pem(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SecurityError::ParsePem {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if certs.is_empty() {
        return Err(SecurityError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SecurityError> {
    let pem = read_pem(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|err| SecurityError::ParsePem {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn load_roots(path: &Path) -> Result<RootCertStore, SecurityError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct SkipServerVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for SkipServerVerification {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
