// nllb-sidecar: self-signed TLS certificate generation (spec.md §6)
//
// Generates an in-memory self-signed certificate at startup (CN
// "nllb-translation-server", SAN localhost/127.0.0.1), writes it to the
// configured cert/key paths for operator inspection, and builds an
// `axum_server` rustls config from it. Cert-store/ACME provisioning is
// explicitly out of scope (spec.md §1).

use std::fs;
use std::path::Path;

use rcgen::{CertificateParams, DnType, IsCa, KeyPair, SanType};
use sha2::{Digest, Sha256};

use crate::error::{SidecarError, SidecarResult};

pub struct GeneratedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generates a self-signed certificate with CN "nllb-translation-server",
/// O "HypeShelf-Dev", SAN `[localhost, 127.0.0.1]`, valid 365 days.
pub fn generate_self_signed_cert() -> SidecarResult<GeneratedCert> {
    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| SidecarError::TlsError(format!("failed to build cert params: {e}")))?;

    params.distinguished_name.push(DnType::CommonName, "nllb-translation-server");
    params.distinguished_name.push(DnType::OrganizationName, "HypeShelf-Dev");
    params.is_ca = IsCa::ExplicitNoCa;
    params.subject_alt_names = vec![
        SanType::DnsName(
            "localhost"
                .try_into()
                .map_err(|_| SidecarError::TlsError("invalid SAN dns name".into()))?,
        ),
        SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
    ];

    let key_pair = KeyPair::generate()
        .map_err(|e| SidecarError::TlsError(format!("failed to generate key pair: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SidecarError::TlsError(format!("failed to self-sign cert: {e}")))?;

    Ok(GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// SHA-256 fingerprint of the DER-encoded certificate, hex-encoded, for
/// the startup log line an operator can cross-check against a browser's
/// "view certificate" dialog.
pub fn fingerprint(cert_pem: &str) -> String {
    let der = pem_to_der(cert_pem).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&der);
    hex::encode(hasher.finalize())
}

fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    rustls_pemfile::certs(&mut reader).next()?.ok().map(|c| c.to_vec())
}

/// Writes the generated cert/key to disk at the configured paths, so an
/// operator (or a sidecar-adjacent process) can inspect them directly.
pub fn write_to_paths(cert: &GeneratedCert, cert_path: &str, key_path: &str) -> SidecarResult<()> {
    if let Some(parent) = Path::new(cert_path).parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = Path::new(key_path).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(cert_path, &cert.cert_pem)?;
    fs::write(key_path, &cert.key_pem)?;
    Ok(())
}

/// Builds an `axum_server` rustls config from the cert/key PEM bytes on
/// disk, so the same paths used for `write_to_paths` back the listener.
pub async fn load_rustls_config(
    cert_path: &str,
    key_path: &str,
) -> SidecarResult<axum_server::tls_rustls::RustlsConfig> {
    axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| SidecarError::TlsError(format!("failed to load rustls config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cert_contains_pem_markers() {
        let cert = generate_self_signed_cert().unwrap();
        assert!(cert.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn fingerprint_is_stable_for_same_cert() {
        let cert = generate_self_signed_cert().unwrap();
        let fp1 = fingerprint(&cert.cert_pem);
        let fp2 = fingerprint(&cert.cert_pem);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
    }

    #[test]
    fn write_to_paths_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        let cert = generate_self_signed_cert().unwrap();
        write_to_paths(&cert, cert_path.to_str().unwrap(), key_path.to_str().unwrap()).unwrap();
        assert!(cert_path.exists());
        assert!(key_path.exists());
    }
}
