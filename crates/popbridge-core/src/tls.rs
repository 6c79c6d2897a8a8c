//! TLS support for the POP3 listener

use popbridge_common::config::TlsConfig;
use popbridge_common::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open {} file {}: {}", what, path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn read_certs(reader: &mut dyn BufRead) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = certs(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls("No certificates found".to_string()));
    }
    Ok(certs)
}

fn read_key(reader: &mut dyn BufRead) -> Result<PrivateKeyDer<'static>> {
    private_key(reader)
        .map_err(|e| Error::Tls(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| Error::Tls("No private key found".to_string()))
}

/// Load the certificate chain and key and create an acceptor.
///
/// Inline PEM takes precedence over file paths.
pub fn create_tls_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = match (&tls_config.cert, &tls_config.cert_path) {
        (Some(pem), _) => read_certs(&mut pem.as_bytes())?,
        (None, Some(path)) => read_certs(&mut open(path, "certificate")?)?,
        (None, None) => return Err(Error::Tls("No certificate configured".to_string())),
    };

    info!("Loaded {} certificate(s)", certs.len());

    let key = match (&tls_config.key, &tls_config.key_path) {
        (Some(pem), _) => read_key(&mut pem.as_bytes())?,
        (None, Some(path)) => read_key(&mut open(path, "key")?)?,
        (None, None) => return Err(Error::Tls("No private key configured".to_string())),
    };

    acceptor_from_der(certs, key)
}

/// Create an acceptor from an already decoded certificate chain and key
pub fn acceptor_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("Failed to create TLS config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn self_signed() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn test_inline_pem() {
        let (cert, key) = self_signed();
        let config = TlsConfig {
            cert: Some(cert),
            key: Some(key),
            ..Default::default()
        };
        assert!(create_tls_acceptor(&config).is_ok());
    }

    #[test]
    fn test_pem_files() {
        let (cert, key) = self_signed();
        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file.write_all(key.as_bytes()).unwrap();

        let config = TlsConfig {
            cert_path: Some(cert_file.path().to_path_buf()),
            key_path: Some(key_file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(create_tls_acceptor(&config).is_ok());
    }

    #[test]
    fn test_errors() {
        let config = TlsConfig {
            cert_path: Some("/nonexistent/cert.pem".into()),
            key_path: Some("/nonexistent/key.pem".into()),
            ..Default::default()
        };
        assert!(matches!(create_tls_acceptor(&config), Err(Error::Tls(_))));

        let (cert, _) = self_signed();
        let config = TlsConfig {
            cert: Some(cert),
            key: Some("not a key".to_string()),
            ..Default::default()
        };
        assert!(matches!(create_tls_acceptor(&config), Err(Error::Tls(_))));

        let config = TlsConfig {
            cert: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(create_tls_acceptor(&config), Err(Error::Tls(_))));
    }
}
