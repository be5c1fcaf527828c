//! Client TLS settings for `wss://` routers and their HTTPS login endpoint.
//!
//! With default options both the WebSocket and the login request verify the
//! router against the bundled web PKI roots. Devices that serve a private or
//! self-signed certificate need either an extra trust anchor or, as a last
//! resort, verification switched off.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TLS knobs; all off by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
	/// PEM bundle trusted in addition to the web PKI roots.
	pub ca_file: Option<PathBuf>,
	/// Accepts any server certificate. Overrides `ca_file`.
	pub accept_invalid_certs: bool,
}

impl TlsOptions {
	pub fn trust_ca_file(path: impl Into<PathBuf>) -> Self {
		Self {
			ca_file: Some(path.into()),
			accept_invalid_certs: false,
		}
	}

	pub fn accept_invalid_certs() -> Self {
		Self {
			ca_file: None,
			accept_invalid_certs: true,
		}
	}

	pub fn is_default(&self) -> bool {
		self.ca_file.is_none() && !self.accept_invalid_certs
	}

	/// Certificates from `ca_file`, empty when unset.
	pub fn extra_roots(&self) -> Result<Vec<CertificateDer<'static>>> {
		let Some(path) = &self.ca_file else {
			return Ok(Vec::new());
		};
		let pem = std::fs::read(path)
			.map_err(|e| Error::Tls(format!("cannot read CA file {}: {e}", path.display())))?;
		let certs = CertificateDer::pem_slice_iter(&pem)
			.collect::<std::result::Result<Vec<_>, _>>()
			.map_err(|e| Error::Tls(format!("invalid PEM in {}: {e:?}", path.display())))?;
		if certs.is_empty() {
			return Err(Error::Tls(format!("no certificates in {}", path.display())));
		}
		Ok(certs)
	}

	/// rustls configuration for the WebSocket, or `None` to keep the
	/// transport's own defaults.
	pub fn client_config(&self) -> Result<Option<Arc<ClientConfig>>> {
		if self.is_default() {
			return Ok(None);
		}

		let provider = Arc::new(rustls::crypto::ring::default_provider());
		let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
			.with_safe_default_protocol_versions()
			.map_err(|e| Error::Tls(e.to_string()))?;

		let config = if self.accept_invalid_certs {
			tracing::warn!(target = "wamp.tls", "server certificate verification is disabled");
			builder
				.dangerous()
				.with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
				.with_no_client_auth()
		} else {
			let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
			for cert in self.extra_roots()? {
				roots
					.add(cert)
					.map_err(|e| Error::Tls(format!("unusable CA certificate: {e}")))?;
			}
			builder.with_root_certificates(roots).with_no_client_auth()
		};
		Ok(Some(Arc::new(config)))
	}
}

/// Verifier that trusts every certificate but still checks handshake
/// signatures against the presented key.
#[derive(Debug)]
struct AcceptAnyCert {
	provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> std::result::Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.provider.signature_verification_algorithms.supported_schemes()
	}
}
