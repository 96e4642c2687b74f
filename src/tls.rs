use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::ServerConfig;

use crate::endpoint::ANY_HOST;

/// TLS key/certificate pair, PEM-encoded, held only in memory.
#[derive(Debug)]
pub struct CertificateBundle {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

impl CertificateBundle {
    /// Read a user-supplied key/cert pair from disk.
    pub fn from_files(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let key = fs::read(key_path)
            .with_context(|| format!("failed to read SSL key {}", key_path.display()))?;
        let cert = fs::read(cert_path)
            .with_context(|| format!("failed to read SSL certificate {}", cert_path.display()))?;
        Ok(Self { key, cert })
    }

    /// Generate a throwaway self-signed certificate for the listen
    /// host. rcgen needs at least one subject-alt-name, so the `*`
    /// sentinel falls back to `localhost`.
    pub fn self_signed(host: &str) -> Result<Self> {
        let subject = if host == ANY_HOST { "localhost" } else { host };
        let certified = generate_simple_self_signed(vec![subject.to_string()])
            .context("failed to generate self-signed certificate")?;
        Ok(Self {
            key: certified.signing_key.serialize_pem().into_bytes(),
            cert: certified.cert.pem().into_bytes(),
        })
    }

    /// Build the rustls server config the listener terminates TLS with.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let certs = rustls_pemfile::certs(&mut self.cert.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse SSL certificate")?;
        let key = rustls_pemfile::private_key(&mut self.key.as_slice())
            .context("failed to parse SSL key")?
            .context("no private key found in SSL key file")?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("failed to assemble TLS server config")?;
        Ok(Arc::new(config))
    }
}
