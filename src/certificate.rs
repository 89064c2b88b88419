//! Minimal certificate store (spec.md §9 supplement: 2.0.1
//! `InstallCertificate`/`DeleteCertificate`/`GetInstalledCertificateIds`
//! need somewhere to persist PEM blobs; no validation/chain-building is
//! in scope, that's a TLS-stack concern).
//!
//! Grounded on `filesystem.rs`'s adapter, the same pattern `journal`
//! uses for its own `tx-*.jsn` files, applied to `cert-*.pem`.

use crate::error::FsError;
use crate::filesystem::FilesystemAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    CentralSystemRootCertificate,
    ManufacturerRootCertificate,
    ChargePointCertificate,
}

fn filename(hash: &str) -> String {
    format!("cert-{hash}.pem")
}

pub struct CertificateStore;

impl CertificateStore {
    /// `InstallCertificate`. `hash` is the caller-supplied fingerprint
    /// used as the stable identifier (spec.md leaves hash computation to
    /// the host; this module only persists under whatever key it's given).
    pub fn install(fs: &dyn FilesystemAdapter, hash: &str, pem: &[u8]) -> Result<(), FsError> {
        fs.write(&filename(hash), pem)
    }

    pub fn get(fs: &dyn FilesystemAdapter, hash: &str) -> Result<Option<Vec<u8>>, FsError> {
        fs.read(&filename(hash))
    }

    /// `DeleteCertificate`.
    pub fn delete(fs: &dyn FilesystemAdapter, hash: &str) -> Result<(), FsError> {
        fs.remove(&filename(hash))
    }

    /// `GetInstalledCertificateIds`.
    pub fn list(fs: &dyn FilesystemAdapter) -> Result<Vec<String>, FsError> {
        let names = fs.list("cert-")?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix("cert-").and_then(|n| n.strip_suffix(".pem")).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    #[test]
    fn install_get_delete_roundtrip() {
        let fs = MemFilesystem::new();
        CertificateStore::install(&fs, "abc123", b"-----BEGIN CERTIFICATE-----").unwrap();
        assert!(CertificateStore::get(&fs, "abc123").unwrap().is_some());
        assert_eq!(CertificateStore::list(&fs).unwrap(), vec!["abc123".to_string()]);
        CertificateStore::delete(&fs, "abc123").unwrap();
        assert!(CertificateStore::get(&fs, "abc123").unwrap().is_none());
    }
}
