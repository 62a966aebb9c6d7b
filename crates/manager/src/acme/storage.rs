//! Certificate artifact storage
//!
//! Writes the key and certificate produced by each issuance to the output
//! directory. Every issuance gets its own pair of files; existing files are
//! never overwritten.
//!
//! # Directory Structure
//!
//! ```text
//! certs/
//! ├── example.com-20260301T030000Z.key.pem    # Private key (0600)
//! └── example.com-20260301T030000Z.cert.pem   # Certificate chain
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::StorageError;
use super::records::{CertificateArtifact, IssuedCertificate};

const KEY_SUFFIX: &str = ".key.pem";
const CERT_SUFFIX: &str = ".cert.pem";

/// Certificate artifact writer
#[derive(Debug)]
pub struct CertificateStorage {
    /// Output directory
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Create the storage at `base_path`
    ///
    /// Creates the directory if it doesn't exist and sets restrictive
    /// permissions (0700 on Unix).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or permissions
    /// cannot be set.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        info!(
            certs_path = %base_path.display(),
            "Initialized certificate output directory"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the output directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write the key and certificate for one issuance of `domain`
    ///
    /// Files are named by domain and issuance timestamp.
    pub fn save(
        &self,
        domain: &str,
        issued: &IssuedCertificate,
        issued_at: DateTime<Utc>,
    ) -> Result<CertificateArtifact, StorageError> {
        if domain.is_empty() || domain.contains(['/', '\\']) || domain.starts_with('.') {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to write artifacts for domain {domain:?}"),
            )));
        }

        let stem = format!("{domain}-{}", issued_at.format("%Y%m%dT%H%M%SZ"));
        let key_path = self.base_path.join(format!("{stem}{KEY_SUFFIX}"));
        let cert_path = self.base_path.join(format!("{stem}{CERT_SUFFIX}"));

        write_new(&key_path, issued.key_pem.as_bytes(), 0o600)?;
        if let Err(e) = write_new(&cert_path, issued.cert_pem.as_bytes(), 0o644) {
            // Don't leave a key without its certificate
            let _ = fs::remove_file(&key_path);
            return Err(e);
        }

        info!(
            domain = %domain,
            key = %key_path.display(),
            cert = %cert_path.display(),
            "Saved issued certificate"
        );

        Ok(CertificateArtifact {
            key_path,
            cert_path,
        })
    }

    /// Remove the files of an issuance that could not be recorded
    ///
    /// Missing files are ignored; other failures are logged.
    pub fn discard(&self, artifact: &CertificateArtifact) {
        for path in [&artifact.key_path, &artifact.cert_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed certificate artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove certificate artifact"
                ),
            }
        }
    }

    /// All artifact files written for `domain`, sorted by name
    #[cfg(test)]
    pub fn artifacts_for(&self, domain: &str) -> Result<Vec<PathBuf>, StorageError> {
        let prefix = format!("{domain}-");
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                let owned = name
                    .strip_prefix(&prefix)
                    .and_then(|rest| {
                        rest.strip_suffix(KEY_SUFFIX)
                            .or_else(|| rest.strip_suffix(CERT_SUFFIX))
                    })
                    .is_some_and(is_timestamp);
                if owned {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        debug!(domain = %domain, count = files.len(), "Listed certificate artifacts");
        Ok(files)
    }
}

/// `YYYYmmddTHHMMSSZ`
#[cfg(test)]
fn is_timestamp(stamp: &str) -> bool {
    let bytes = stamp.as_bytes();
    bytes.len() == 16
        && bytes[8] == b'T'
        && bytes[15] == b'Z'
        && bytes[..8].iter().chain(&bytes[9..15]).all(u8::is_ascii_digit)
}

fn write_new(path: &Path, contents: &[u8], mode: u32) -> Result<(), StorageError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
