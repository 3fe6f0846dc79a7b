//! TLS client configuration for `wss://` endpoints.
//!
//! Server certificates are verified against the bundled web PKI roots, plus
//! an optional PEM file of extra CA certificates for control servers signed
//! by a private authority.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::ChannelError;

/// Build the client config, trusting the web PKI roots and every
/// certificate in `ca_cert` (if given).
pub fn client_config(ca_cert: Option<&Path>) -> Result<Arc<ClientConfig>, ChannelError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_cert {
        let certs = read_certs(path)?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(ChannelError::Tls(format!(
                "no usable CA certificate in {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), added, ignored, "loaded extra CA certificates");
    }

    client_config_with_roots(roots)
}

/// Build the client config trusting exactly `roots`.
pub fn client_config_with_roots(roots: RootCertStore) -> Result<Arc<ClientConfig>, ChannelError> {
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ChannelError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ChannelError> {
    let pem = std::fs::read(path)
        .map_err(|e| ChannelError::Tls(format!("failed to read {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChannelError::Tls(format!("invalid PEM in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_builds() {
        let config = client_config(None).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn extra_ca_is_loaded() {
        let ca = rcgen::generate_simple_self_signed(vec!["control.internal".to_string()]).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ca.cert.pem().as_bytes()).unwrap();

        client_config(Some(file.path())).unwrap();
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let err = client_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("no usable CA certificate"), "got: {err}");
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = client_config(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(matches!(err, ChannelError::Tls(_)));
    }
}
