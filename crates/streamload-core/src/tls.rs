//! Transport trust configuration
//!
//! The driver reads one string setting at startup and turns it into the TLS
//! setup of its HTTP client. Resolution fails open: a bad value or an
//! unreadable certificate falls back to default verification, and every such
//! downgrade is logged.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::{Certificate, ClientBuilder};
use streamload_common::config::SSL_CERT_ENV;
use streamload_common::{LoadError, Result};

/// Values (case-insensitive) that switch certificate verification off.
pub const DISABLED_VALUES: [&str; 8] = ["0", "false", "no", "disable", "disabled", "insecure", "skip", "ignore"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// System trust store, verification on.
    #[default]
    Default,
    /// No certificate verification at all.
    Insecure,
    /// A single PEM bundle used as the only trust roots.
    CaFile(PathBuf),
    /// A directory of PEM certificates trusted alongside the system store.
    CaDir(PathBuf),
}

impl TlsMode {
    pub fn resolve(setting: Option<&str>) -> Self {
        let Some(value) = setting.map(str::trim).filter(|v| !v.is_empty()) else {
            return TlsMode::Default;
        };

        if DISABLED_VALUES.contains(&value.to_ascii_lowercase().as_str()) {
            tracing::warn!(target: "tls", setting = SSL_CERT_ENV, value, "TLS certificate verification DISABLED");
            return TlsMode::Insecure;
        }

        let path = Path::new(value);
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => TlsMode::CaFile(path.to_path_buf()),
            Ok(meta) if meta.is_dir() => TlsMode::CaDir(path.to_path_buf()),
            Ok(_) => {
                tracing::warn!(target: "tls", setting = SSL_CERT_ENV, value, "path is neither a file nor a directory; using default TLS verification");
                TlsMode::Default
            }
            Err(_) => {
                tracing::warn!(target: "tls", setting = SSL_CERT_ENV, value, "path does not exist; using default TLS verification");
                TlsMode::Default
            }
        }
    }
}

/// Loaded trust configuration, the opaque handle a driver builds its client from.
#[derive(Clone, Default)]
pub struct TransportTls {
    mode: TlsMode,
    roots: Vec<Certificate>,
}

impl TransportTls {
    /// Resolves and loads the setting, falling back to [`TlsMode::Default`] on any load error.
    pub fn from_setting(setting: Option<&str>) -> Self {
        match Self::load(TlsMode::resolve(setting)) {
            Ok(tls) => tls,
            Err(e) => {
                tracing::error!(target: "tls", error = %e, "failed to load TLS certificates; using default TLS verification");
                Self::default()
            }
        }
    }

    pub fn load(mode: TlsMode) -> Result<Self> {
        let roots = match &mode {
            TlsMode::Default | TlsMode::Insecure => Vec::new(),
            TlsMode::CaFile(path) => {
                let certs = read_bundle(path)?;
                if certs.is_empty() {
                    return Err(tls_error(path, "no PEM certificates found"));
                }
                certs
            }
            TlsMode::CaDir(dir) => {
                let mut certs = Vec::new();
                for entry in std::fs::read_dir(dir).map_err(|e| tls_error(dir, e))? {
                    let path = entry.map_err(|e| tls_error(dir, e))?.path();
                    if !path.is_file() { continue; }
                    match read_bundle(&path) {
                        Ok(mut found) => certs.append(&mut found),
                        Err(e) => tracing::debug!(target: "tls", error = %e, "skipping unreadable certificate file"),
                    }
                }
                if certs.is_empty() {
                    return Err(tls_error(dir, "no PEM certificates found in directory"));
                }
                certs
            }
        };

        if let TlsMode::CaFile(path) | TlsMode::CaDir(path) = &mode {
            tracing::info!(target: "tls", path = %path.display(), certificates = roots.len(), "using custom CA for TLS verification");
        }
        Ok(Self { mode, roots })
    }

    pub fn mode(&self) -> &TlsMode {
        &self.mode
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn verifies_certificates(&self) -> bool {
        self.mode != TlsMode::Insecure
    }

    /// A client builder carrying this trust configuration and nothing else.
    pub fn client_builder(&self) -> ClientBuilder {
        let mut builder = reqwest::Client::builder().use_rustls_tls();
        match self.mode {
            TlsMode::Insecure => builder = builder.danger_accept_invalid_certs(true),
            TlsMode::CaFile(_) => builder = builder.tls_built_in_root_certs(false),
            TlsMode::Default | TlsMode::CaDir(_) => {}
        }
        for cert in &self.roots {
            builder = builder.add_root_certificate(cert.clone());
        }
        builder
    }
}

impl fmt::Debug for TransportTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportTls")
            .field("mode", &self.mode)
            .field("roots", &self.roots.len())
            .finish()
    }
}

fn read_bundle(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read(path).map_err(|e| tls_error(path, e))?;
    Certificate::from_pem_bundle(&pem).map_err(|e| tls_error(path, e))
}

fn tls_error(path: &Path, reason: impl fmt::Display) -> LoadError {
    LoadError::Tls { path: path.display().to_string(), reason: reason.to_string() }
}
